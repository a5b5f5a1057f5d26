//! Portable, exact implementations of masked scaled dot-product attention.
//!
//! [`ExactAttention`] leans on the tensor library's batched matmul and
//! softmax; [`ScalarAttention`] spells the same computation out as loops.
//! Each serves as the cross-check for the other.

pub mod exact;
pub mod scalar;

pub use exact::ExactAttention;
pub use scalar::{softmax_in_place, ScalarAttention};

use crate::core::{Attention, BackendSelection};

/// Instantiates the kernel for `backend`.
pub fn kernel_for(backend: BackendSelection) -> Box<dyn Attention> {
    match backend {
        BackendSelection::Tensor => Box::new(ExactAttention::new()),
        BackendSelection::Scalar => Box::new(ScalarAttention::new()),
    }
}
