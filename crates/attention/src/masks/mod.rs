//! Mask utilities shared by attention implementations.
//!
//! Masks are additive `f32` tensors shaped `[seq_len, seq_len]`, identical for
//! every batch element and head. Values are either `0.0` (keep) or
//! `f32::NEG_INFINITY` (discard) so that a max-subtracted softmax assigns
//! exactly zero probability to discarded positions.

pub mod cache;
pub mod causal;

use candle_core::DType;

/// Dtype shared by all additive masks.
pub const MASK_DTYPE: DType = DType::F32;

pub use cache::CausalMaskCache;
pub use causal::{build_causal_mask, causal_mask_values};

#[cfg(test)]
mod tests;
