//! Core traits and types shared across attention implementations.
//!
//! Kernels operate on tensors with layout `[batch, n_heads, seq_len, head_dim]`
//! and receive an additive `[seq_len, seq_len]` causal mask. Reductions are
//! carried out in `f32`.

pub mod config;
pub mod errors;

use candle_core::Tensor;

use crate::dropout::DropoutMask;

pub use config::{BackendSelection, Config, DropoutStage};
pub use errors::{AttentionError, Result};

/// Execution mode of a forward evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Dropout (when configured) is active.
    Train,
    /// Dropout is the identity; the forward pass is deterministic.
    #[default]
    Inference,
}

/// Result of an attention evaluation.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// Context vectors. `[batch, heads, seq, head_dim]` when returned by a
    /// kernel, `[batch, seq, d_out]` when returned by the full pipeline.
    pub context: Tensor,
    /// Row-stochastic weights `[batch, heads, seq, seq]` used for aggregation
    /// (after dropout when dropout targets the weights).
    pub weights: Tensor,
}

/// Per-call parameters handed to a kernel.
#[derive(Debug, Clone, Copy)]
pub struct AttendOptions<'a> {
    /// Multiplier applied to the masked scores, `1 / sqrt(head_dim)`.
    pub scale: f64,
    /// Precomputed keep-mask for training-mode dropout.
    pub dropout: Option<&'a DropoutMask>,
}

impl AttendOptions<'_> {
    /// Options for a deterministic evaluation with the standard scale.
    pub fn deterministic(head_dim: usize) -> Self {
        Self {
            scale: 1.0 / (head_dim as f64).sqrt(),
            dropout: None,
        }
    }
}

/// Unified interface for attention kernels.
///
/// * `q`, `k`, and `v` share the layout `[batch, n_heads, seq_len, head_dim]`
///   and the dtype `f32`.
/// * `mask` is shaped `[seq_len, seq_len]` with `0.0` for permitted and
///   `f32::NEG_INFINITY` for forbidden positions; it is shared by every batch
///   element and head.
/// * Scores are masked, then scaled by [`AttendOptions::scale`], then
///   normalised row-wise with a max-subtracted softmax.
pub trait Attention: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Compute masked scaled dot-product attention.
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: &Tensor,
        options: &AttendOptions<'_>,
    ) -> Result<AttentionOutput>;
}

/// Validates that `q`, `k`, `v` and `mask` agree and returns `(batch, heads, seq, head_dim)`.
pub(crate) fn check_kernel_inputs(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    mask: &Tensor,
) -> Result<(usize, usize, usize, usize)> {
    let (batch, heads, seq, head_dim) = q.dims4().map_err(|_| {
        AttentionError::invalid_shape("q must have shape [batch, heads, seq_len, head_dim]")
    })?;
    for (name, tensor) in [("k", k), ("v", v)] {
        if tensor.dims() != q.dims() {
            return Err(AttentionError::ShapeMismatch {
                context: if name == "k" { "kernel keys" } else { "kernel values" },
                expected: q.dims().to_vec(),
                actual: tensor.dims().to_vec(),
            });
        }
    }
    if mask.dims() != [seq, seq] {
        return Err(AttentionError::ShapeMismatch {
            context: "causal mask",
            expected: vec![seq, seq],
            actual: mask.dims().to_vec(),
        });
    }
    Ok((batch, heads, seq, head_dim))
}
