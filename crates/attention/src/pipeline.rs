//! End-to-end causal attention forward pass.
//!
//! [`AttentionCore`] owns configuration, a kernel and a causal-mask cache, but
//! never the weights: every call receives an input batch `[batch, seq, d_in]`
//! and an [`AttentionWeights`] set and returns `[batch, seq, d_out]`.
//!
//! Steps, in order: project to queries/keys/values, split heads, score, mask
//! future keys, scale by `1/sqrt(head_dim)`, softmax, aggregate values, merge
//! heads, and apply the optional output projection. Dropout, when active,
//! slots in after the softmax or after aggregation.

use std::{fmt, sync::OnceLock};

use candle_core::{DType, Tensor};

use crate::checks;
use crate::core::{
    AttendOptions, Attention, AttentionError, AttentionOutput, Config, DropoutStage, Mode, Result,
};
use crate::dropout::Dropout;
use crate::heads::{merge_heads, split_heads};
use crate::masks::CausalMaskCache;
use crate::projection::AttentionWeights;
use crate::reference::kernel_for;

/// Stateless-per-call attention pipeline.
pub struct AttentionCore {
    config: Config,
    kernel: Box<dyn Attention>,
    masks: CausalMaskCache,
    first_call: OnceLock<()>,
}

impl fmt::Debug for AttentionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttentionCore")
            .field("config", &self.config)
            .field("kernel", &self.kernel.name())
            .field("cached_mask_len", &self.masks.capacity())
            .finish()
    }
}

impl AttentionCore {
    /// Builds a core for `config` after applying environment overrides.
    pub fn new(mut config: Config) -> Result<Self> {
        config.apply_env_overrides();
        let kernel = kernel_for(config.backend);
        Self::with_kernel(config, kernel)
    }

    /// Builds a core around an explicit kernel; environment overrides are not read.
    pub fn with_kernel(config: Config, kernel: Box<dyn Attention>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            kernel,
            masks: CausalMaskCache::new(),
            first_call: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn kernel_name(&self) -> &'static str {
        self.kernel.name()
    }

    /// Computes the `[batch, seq, d_out]` output for `input`.
    pub fn forward(
        &self,
        input: &Tensor,
        weights: &AttentionWeights,
        mode: Mode,
        seed: Option<u64>,
    ) -> Result<Tensor> {
        Ok(self.forward_with_weights(input, weights, mode, seed)?.context)
    }

    /// Like [`AttentionCore::forward`] but also returns the
    /// `[batch, heads, seq, seq]` attention weights.
    pub fn forward_with_weights(
        &self,
        input: &Tensor,
        weights: &AttentionWeights,
        mode: Mode,
        seed: Option<u64>,
    ) -> Result<AttentionOutput> {
        checks::expect_float("input", input)?;
        let (batch, seq, d_in) = checks::expect_batch_seq_hidden("input", input)?;
        checks::expect_same_device("weights", weights.query().weight(), input)?;
        if d_in != weights.input_dim() {
            return Err(AttentionError::ShapeMismatch {
                context: "input features",
                expected: vec![batch, seq, weights.input_dim()],
                actual: input.dims().to_vec(),
            });
        }
        let d_out = weights.output_dim();
        let head_dim = self.config.head_dim(d_out)?;
        if let Some(limit) = self.config.context_length {
            if seq > limit {
                return Err(AttentionError::ShapeMismatch {
                    context: "sequence length",
                    expected: vec![limit],
                    actual: vec![seq],
                });
            }
        }
        let dropout = Dropout::resolve(mode, self.config.dropout_p, seed)?;
        let heads = self.config.num_heads;

        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::pipeline init backend={} heads={} dropout_p={:?} stage={:?} context_length={:?}",
                self.kernel.name(),
                heads,
                self.config.dropout_p,
                self.config.dropout_stage,
                self.config.context_length
            );
        }
        log::trace!(
            "attention forward batch={batch} seq={seq} d_in={d_in} d_out={d_out} heads={heads} mode={mode:?}"
        );

        let hidden = input.to_dtype(DType::F32)?;
        let queries = split_heads(&weights.query().forward(&hidden)?, heads)?;
        let keys = split_heads(&weights.key().forward(&hidden)?, heads)?;
        let values = split_heads(&weights.value().forward(&hidden)?, heads)?;

        let mask = self.masks.get(input.device(), seq)?;
        let stage = self.config.dropout_stage;
        let dropout_dims = match stage {
            DropoutStage::Weights => [batch, heads, seq, seq],
            DropoutStage::Context => [batch, heads, seq, head_dim],
        };
        let dropout_mask = dropout.mask(stage, &dropout_dims);
        let options = AttendOptions {
            scale: 1.0 / (head_dim as f64).sqrt(),
            dropout: dropout_mask.as_ref(),
        };

        let attended = self
            .kernel
            .attend(&queries, &keys, &values, &mask, &options)?;
        let mut context = merge_heads(&attended.context)?;
        if let Some(output) = weights.output() {
            context = output.forward(&context)?;
        }

        Ok(AttentionOutput {
            context: context.to_dtype(input.dtype())?,
            weights: attended.weights,
        })
    }
}

/// One-shot forward pass mirroring the external interface: builds a core for
/// the given head count and dropout rate and evaluates it once.
pub fn forward(
    input: &Tensor,
    weights: &AttentionWeights,
    num_heads: usize,
    mode: Mode,
    dropout_p: f32,
    seed: Option<u64>,
) -> Result<Tensor> {
    let config = Config {
        num_heads,
        dropout_p: Some(dropout_p),
        ..Config::default()
    };
    config.validate_for_width(weights.output_dim())?;
    AttentionCore::new(config)?.forward(input, weights, mode, seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::WeightInit;
    use crate::reference::{ExactAttention, ScalarAttention};
    use candle_core::Device;

    fn random_input(device: &Device, shape: (usize, usize, usize)) -> Result<Tensor> {
        let total = shape.0 * shape.1 * shape.2;
        let data: Vec<f32> = (0..total).map(|i| ((i as f32) * 0.731).cos()).collect();
        Ok(Tensor::from_vec(data, shape, device)?)
    }

    #[test]
    fn output_shape_follows_projection_width() -> Result<()> {
        let device = Device::Cpu;
        let weights = AttentionWeights::xavier_uniform(5, 6, &WeightInit::default(), &device)?;
        let input = random_input(&device, (2, 4, 5))?;
        for heads in [1, 2, 3, 6] {
            let core =
                AttentionCore::with_kernel(Config::with_heads(heads), Box::new(ExactAttention))?;
            let out = core.forward_with_weights(&input, &weights, Mode::Inference, None)?;
            assert_eq!(out.context.dims(), &[2, 4, 6]);
            assert_eq!(out.weights.dims(), &[2, heads, 4, 4]);
        }
        Ok(())
    }

    #[test]
    fn divisibility_checked_before_computation() -> Result<()> {
        let device = Device::Cpu;
        let weights = AttentionWeights::xavier_uniform(3, 4, &WeightInit::default(), &device)?;
        let input = random_input(&device, (1, 2, 3))?;
        let core = AttentionCore::with_kernel(Config::with_heads(3), Box::new(ExactAttention))?;
        let err = core
            .forward(&input, &weights, Mode::Inference, None)
            .unwrap_err();
        assert!(matches!(err, AttentionError::HeadDivisibility { .. }));
        Ok(())
    }

    #[test]
    fn context_length_caps_sequence() -> Result<()> {
        let device = Device::Cpu;
        let weights = AttentionWeights::xavier_uniform(3, 2, &WeightInit::default(), &device)?;
        let config = Config {
            context_length: Some(4),
            ..Config::default()
        };
        let core = AttentionCore::with_kernel(config, Box::new(ScalarAttention))?;
        core.forward(&random_input(&device, (1, 4, 3))?, &weights, Mode::Inference, None)?;
        let err = core
            .forward(&random_input(&device, (1, 5, 3))?, &weights, Mode::Inference, None)
            .unwrap_err();
        assert!(matches!(
            err,
            AttentionError::ShapeMismatch {
                context: "sequence length",
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn output_dtype_matches_input() -> Result<()> {
        let device = Device::Cpu;
        let weights = AttentionWeights::xavier_uniform(4, 4, &WeightInit::default(), &device)?;
        let input = random_input(&device, (1, 3, 4))?;
        let core = AttentionCore::with_kernel(Config::with_heads(2), Box::new(ExactAttention))?;
        let reference = core.forward(&input, &weights, Mode::Inference, None)?;
        for dtype in [DType::F16, DType::BF16, DType::F64] {
            let out = core.forward(&input.to_dtype(dtype)?, &weights, Mode::Inference, None)?;
            assert_eq!(out.dtype(), dtype);
            let diff = out
                .to_dtype(DType::F32)?
                .sub(&reference)?
                .abs()?
                .max_all()?
                .to_vec0::<f32>()?;
            assert!(diff < 5e-2, "dtype {dtype:?} diverged by {diff}");
        }
        Ok(())
    }

    #[test]
    fn debug_reports_kernel() -> Result<()> {
        let core = AttentionCore::with_kernel(Config::default(), Box::new(ScalarAttention))?;
        assert!(format!("{core:?}").contains("scalar"));
        assert_eq!(core.kernel_name(), "scalar");
        Ok(())
    }
}
