//! Builders for causal attention masks.
//!
//! The resulting tensors have dtype [`MASK_DTYPE`](super::MASK_DTYPE) and shape
//! `[seq_len, seq_len]`. Entries are `0.0` where attention is permitted
//! (`key <= query`) and `f32::NEG_INFINITY` for strictly future keys.

use candle_core::{Device, Result, Tensor};

/// Row-major additive causal mask values for `seq_len` positions.
pub fn causal_mask_values(seq_len: usize) -> Vec<f32> {
    let mut data = vec![0f32; seq_len * seq_len];
    for q in 0..seq_len {
        let row_start = q * seq_len;
        for k in (q + 1)..seq_len {
            data[row_start + k] = f32::NEG_INFINITY;
        }
    }
    data
}

/// Construct a causal mask for the supplied sequence length.
pub fn build_causal_mask(device: &Device, seq_len: usize) -> Result<Tensor> {
    Tensor::from_vec(causal_mask_values(seq_len), (seq_len, seq_len), device)
}
