//! Causal scaled dot-product attention for the transformer project.
//!
//! The crate turns an input batch `[batch, seq, d_in]` and caller-owned
//! projection weights into context vectors `[batch, seq, d_out]`:
//! queries, keys and values are projected, optionally split into heads,
//! scored with dot products, masked so no position sees a later one, scaled by
//! `1/sqrt(head_dim)`, normalised with a stable softmax, aggregated over the
//! values, merged back and optionally passed through an output projection.
//!
//! Dropout is an optional, train-only concern controlled via [`Config`] and a
//! caller-supplied seed. Inference mode is always deterministic.
//!
//! Two kernels implement the score/softmax/aggregate core behind the
//! [`Attention`] trait: [`reference::ExactAttention`] built from tensor ops and
//! [`reference::ScalarAttention`] written as loops and parallelised across the
//! batch x head grid.

pub mod checks;
pub mod core;
pub mod dropout;
pub mod heads;
pub mod masks;
pub mod pipeline;
pub mod projection;
pub mod reference;
pub mod simplified;
pub mod stacked;

pub use self::core::{
    Attention, AttentionError, AttentionOutput, BackendSelection, Config, DropoutStage, Mode,
    Result,
};
pub use dropout::Dropout;
pub use pipeline::{forward, AttentionCore};
pub use projection::{AttentionWeights, Projection, WeightInit};
pub use simplified::simplified_self_attention;
pub use stacked::MultiHeadStack;
