//! Lightweight validation helpers shared across the pipeline.
//!
//! These routines return the crate [`Result`] so call sites can propagate
//! shape, dtype and device errors without panicking.

use candle_core::{DType, Tensor};

use crate::core::{AttentionError, Result};

/// Dtypes accepted at the public boundary; computation happens in `f32`.
pub const SUPPORTED_DTYPES: [DType; 4] = [DType::F32, DType::F16, DType::BF16, DType::F64];

/// Checks the tensor dtype is one of [`SUPPORTED_DTYPES`].
pub fn expect_float(context: &str, tensor: &Tensor) -> Result<()> {
    let dtype = tensor.dtype();
    if SUPPORTED_DTYPES.contains(&dtype) {
        Ok(())
    } else {
        Err(AttentionError::UnsupportedDType {
            requested: format!("{context}: {dtype:?}"),
        })
    }
}

/// Ensures `tensor` lives on the same device as `reference`.
pub fn expect_same_device(context: &str, tensor: &Tensor, reference: &Tensor) -> Result<()> {
    if tensor.device().same_device(reference.device()) {
        Ok(())
    } else {
        Err(AttentionError::invalid_shape(format!(
            "{context} must reside on the same device as the input"
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with non-zero extents.
pub fn expect_batch_seq_hidden(context: &str, tensor: &Tensor) -> Result<(usize, usize, usize)> {
    match tensor.dims() {
        [batch, seq, hidden] if *batch > 0 && *seq > 0 && *hidden > 0 => {
            Ok((*batch, *seq, *hidden))
        }
        [_, _, _] => Err(AttentionError::invalid_shape(format!(
            "{context} dimensions must be non-zero, got {:?}",
            tensor.dims()
        ))),
        dims => Err(AttentionError::invalid_shape(format!(
            "{context} expected [batch, seq, hidden], got {dims:?}"
        ))),
    }
}
