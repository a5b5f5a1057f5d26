//! Splitting projected activations into heads and merging them back.
//!
//! `[batch, seq, d_out]` is viewed as `[batch, seq, heads, head_dim]` and
//! permuted to `[batch, heads, seq, head_dim]`; merging applies the inverse so
//! heads are concatenated along the feature axis in head order.

use candle_core::Tensor;

use crate::checks;
use crate::core::{AttentionError, Result};

/// `[batch, seq, d_out]` -> `[batch, heads, seq, d_out / heads]`.
pub fn split_heads(tensor: &Tensor, num_heads: usize) -> Result<Tensor> {
    let (batch, seq, width) = checks::expect_batch_seq_hidden("split_heads.input", tensor)?;
    if num_heads == 0 || width % num_heads != 0 {
        return Err(AttentionError::HeadDivisibility {
            d_out: width,
            num_heads,
        });
    }
    let head_dim = width / num_heads;
    let reshaped = tensor.reshape((batch, seq, num_heads, head_dim))?;
    Ok(reshaped.permute((0, 2, 1, 3))?.contiguous()?)
}

/// `[batch, heads, seq, head_dim]` -> `[batch, seq, heads * head_dim]`.
pub fn merge_heads(tensor: &Tensor) -> Result<Tensor> {
    let (batch, heads, seq, head_dim) = tensor.dims4().map_err(|_| {
        AttentionError::invalid_shape(format!(
            "merge_heads expected [batch, heads, seq, head_dim], got {:?}",
            tensor.dims()
        ))
    })?;
    let permuted = tensor.permute((0, 2, 1, 3))?.contiguous()?;
    Ok(permuted.reshape((batch, seq, heads * head_dim))?)
}
