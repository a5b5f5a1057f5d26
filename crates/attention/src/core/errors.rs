//! Error types emitted by the attention core.
//!
//! Every variant describes a programmer or configuration error. Nothing here
//! is retryable: invalid shapes and knobs are surfaced before any numeric work
//! starts and are never coerced (heads are not truncated, widths not padded).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AttentionError>;

/// Attention-specific error category.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// A tensor dimension disagrees with the weights or configuration.
    #[error("shape mismatch for {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The projected width cannot be split evenly across the requested heads.
    #[error("output width {d_out} is not divisible by {num_heads} heads")]
    HeadDivisibility { d_out: usize, num_heads: usize },

    /// Dropout rate outside `[0, 1)`.
    #[error("dropout rate must be in [0, 1), got {rate}")]
    InvalidDropoutRate { rate: f32 },

    /// The supplied tensors do not follow the documented layout.
    #[error("invalid tensor shape: {context}")]
    InvalidShape { context: String },

    /// The kernel does not support the requested data type.
    #[error("unsupported dtype {requested}")]
    UnsupportedDType { requested: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failure propagated from the tensor backend.
    #[error("tensor backend error: {0}")]
    Backend(#[from] candle_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("serde_json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AttentionError {
    pub(crate) fn invalid_shape<S: Into<String>>(context: S) -> Self {
        AttentionError::InvalidShape {
            context: context.into(),
        }
    }

    /// Returns `true` for errors raised by configuration validation alone.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            AttentionError::HeadDivisibility { .. }
                | AttentionError::InvalidDropoutRate { .. }
                | AttentionError::InvalidConfig(_)
        )
    }
}
