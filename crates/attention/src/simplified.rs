//! Simplified self-attention without trainable weights.
//!
//! Each input vector acts as its own query, key and value: scores are plain
//! dot products `x · xᵀ`, with no scaling and no causal mask, normalised by
//! softmax and used to blend the inputs.

use candle_core::{DType, Tensor};
use candle_nn::ops::softmax_last_dim;

use crate::checks;
use crate::core::{AttentionError, AttentionOutput, Result};

/// Context vectors for `inputs` shaped `[seq, dim]` or `[batch, seq, dim]`.
///
/// The returned context mirrors the input shape and dtype; the weights are
/// `f32` and shaped `[seq, seq]` or `[batch, seq, seq]` accordingly.
pub fn simplified_self_attention(inputs: &Tensor) -> Result<AttentionOutput> {
    checks::expect_float("inputs", inputs)?;
    let unbatched = match inputs.rank() {
        2 => true,
        3 => false,
        _ => {
            return Err(AttentionError::invalid_shape(format!(
                "simplified attention expects [seq, dim] or [batch, seq, dim], got {:?}",
                inputs.dims()
            )))
        }
    };
    let batched = if unbatched {
        inputs.unsqueeze(0)?
    } else {
        inputs.clone()
    };
    checks::expect_batch_seq_hidden("inputs", &batched)?;

    let x = batched.to_dtype(DType::F32)?.contiguous()?;
    let scores = x.matmul(&x.transpose(1, 2)?.contiguous()?)?;
    let weights = softmax_last_dim(&scores)?;
    let context = weights.matmul(&x)?.to_dtype(inputs.dtype())?;

    if unbatched {
        Ok(AttentionOutput {
            context: context.squeeze(0)?,
            weights: weights.squeeze(0)?,
        })
    } else {
        Ok(AttentionOutput { context, weights })
    }
}
