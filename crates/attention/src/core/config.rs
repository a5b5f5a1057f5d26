//! Configuration options shared by all attention implementations.
//!
//! The [`Config`] struct captures run-time knobs such as head count, dropout
//! and kernel backend that callers can tune without swapping implementations.
//! It can be built in code, loaded from a TOML/JSON file, or adjusted through
//! environment variables.

use std::{env, fmt, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use super::errors::{AttentionError, Result};

/// Environment variable selecting the kernel backend (`tensor` or `scalar`).
pub const BACKEND_ENV: &str = "ATTENTION_BACKEND";
/// Environment variable selecting the dropout stage (`weights` or `context`).
pub const DROPOUT_STAGE_ENV: &str = "ATTENTION_DROPOUT_STAGE";

/// Kernel used for score computation, normalisation and aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSelection {
    /// Batched matmul and softmax through the tensor library.
    #[default]
    Tensor,
    /// Explicit loops over row-major buffers, parallel across batch and heads.
    Scalar,
}

impl FromStr for BackendSelection {
    type Err = AttentionError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tensor" => Ok(Self::Tensor),
            "scalar" => Ok(Self::Scalar),
            other => Err(AttentionError::InvalidConfig(format!(
                "unknown backend '{other}', expected 'tensor' or 'scalar'"
            ))),
        }
    }
}

impl fmt::Display for BackendSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tensor => f.write_str("tensor"),
            Self::Scalar => f.write_str("scalar"),
        }
    }
}

/// Point in the pipeline where training-mode dropout is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropoutStage {
    /// After softmax, on the `[batch, heads, seq, seq]` attention weights.
    #[default]
    Weights,
    /// After aggregation, on the per-head `[batch, heads, seq, head_dim]` context.
    Context,
}

impl FromStr for DropoutStage {
    type Err = AttentionError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "weights" => Ok(Self::Weights),
            "context" => Ok(Self::Context),
            other => Err(AttentionError::InvalidConfig(format!(
                "unknown dropout stage '{other}', expected 'weights' or 'context'"
            ))),
        }
    }
}

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of heads the projected width is split into.
    pub num_heads: usize,
    /// Probability for dropout applied during training.
    ///
    /// When `None`, dropout is disabled and the computation is deterministic.
    pub dropout_p: Option<f32>,
    /// Where dropout is applied when active.
    pub dropout_stage: DropoutStage,
    /// Kernel implementation for steps 3 through 7 of the forward pass.
    pub backend: BackendSelection,
    /// Longest sequence accepted; `None` leaves the length unbounded.
    pub context_length: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_heads: 1,
            dropout_p: None,
            dropout_stage: DropoutStage::default(),
            backend: BackendSelection::default(),
            context_length: None,
        }
    }
}

impl Config {
    /// Convenience constructor for a head count with every other knob defaulted.
    pub fn with_heads(num_heads: usize) -> Self {
        Self {
            num_heads,
            ..Self::default()
        }
    }

    /// Loads a configuration from `.toml` or `.json` and validates it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: Config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(AttentionError::InvalidConfig(format!(
                    "unsupported configuration extension '{other}'"
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that do not depend on the weight shapes.
    pub fn validate(&self) -> Result<()> {
        if self.num_heads == 0 {
            return Err(AttentionError::InvalidConfig(
                "num_heads must be greater than zero".into(),
            ));
        }
        if let Some(rate) = self.dropout_p {
            validate_dropout_rate(rate)?;
        }
        if self.context_length == Some(0) {
            return Err(AttentionError::InvalidConfig(
                "context_length must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Checks that `d_out` splits evenly into [`Config::num_heads`] heads.
    pub fn validate_for_width(&self, d_out: usize) -> Result<()> {
        self.validate()?;
        if d_out == 0 || d_out % self.num_heads != 0 {
            return Err(AttentionError::HeadDivisibility {
                d_out,
                num_heads: self.num_heads,
            });
        }
        Ok(())
    }

    /// Per-head width for a projected width of `d_out`.
    pub fn head_dim(&self, d_out: usize) -> Result<usize> {
        self.validate_for_width(d_out)?;
        Ok(d_out / self.num_heads)
    }

    /// Overrides backend and dropout stage from the environment when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var(BACKEND_ENV) {
            match value.parse() {
                Ok(backend) => self.backend = backend,
                Err(err) => log::warn!("ignoring {BACKEND_ENV}={value}: {err}"),
            }
        }
        if let Ok(value) = env::var(DROPOUT_STAGE_ENV) {
            match value.parse() {
                Ok(stage) => self.dropout_stage = stage,
                Err(err) => log::warn!("ignoring {DROPOUT_STAGE_ENV}={value}: {err}"),
            }
        }
    }
}

pub(crate) fn validate_dropout_rate(rate: f32) -> Result<()> {
    if (0.0..1.0).contains(&rate) {
        Ok(())
    } else {
        Err(AttentionError::InvalidDropoutRate { rate })
    }
}
