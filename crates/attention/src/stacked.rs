//! Multi-head attention as a stack of independent single-head passes.
//!
//! Every head owns its own `[d_in, head_dim]` projections and runs through a
//! single-head [`AttentionCore`]. Head outputs are concatenated along the
//! feature axis in head order and optionally projected. With matching
//! parameters this is numerically equivalent to the fused multi-head path in
//! [`crate::pipeline`].

use candle_core::Tensor;

use crate::core::{AttentionError, Config, Mode, Result};
use crate::pipeline::AttentionCore;
use crate::projection::{AttentionWeights, Projection};

#[derive(Debug)]
pub struct MultiHeadStack {
    heads: Vec<AttentionWeights>,
    output: Option<Projection>,
    core: AttentionCore,
}

impl MultiHeadStack {
    /// Builds a stack from per-head weights (equal widths, no per-head output
    /// projection) and an optional `[d_out, d_out]` output projection.
    ///
    /// `config.num_heads` is ignored: every head is evaluated single-headed.
    pub fn new(
        heads: Vec<AttentionWeights>,
        output: Option<Projection>,
        config: Config,
    ) -> Result<Self> {
        let first = heads.first().ok_or_else(|| {
            AttentionError::InvalidConfig("a head stack needs at least one head".into())
        })?;
        let expected = vec![first.input_dim(), first.output_dim()];
        for head in &heads {
            let actual = vec![head.input_dim(), head.output_dim()];
            if actual != expected {
                return Err(AttentionError::ShapeMismatch {
                    context: "stacked head weights",
                    expected: expected.clone(),
                    actual,
                });
            }
            if head.output().is_some() {
                return Err(AttentionError::InvalidConfig(
                    "stacked heads must not carry their own output projection".into(),
                ));
            }
        }
        let d_out = first.output_dim() * heads.len();
        if let Some(output) = &output {
            let actual = vec![output.input_dim(), output.output_dim()];
            if actual != [d_out, d_out] {
                return Err(AttentionError::ShapeMismatch {
                    context: "stacked output weight",
                    expected: vec![d_out, d_out],
                    actual,
                });
            }
        }
        let core = AttentionCore::new(Config {
            num_heads: 1,
            ..config
        })?;
        Ok(Self {
            heads,
            output,
            core,
        })
    }

    /// Splits a fused weight set into `num_heads` column blocks.
    pub fn from_fused(
        weights: &AttentionWeights,
        num_heads: usize,
        config: Config,
    ) -> Result<Self> {
        let head_dim = Config {
            num_heads,
            ..config.clone()
        }
        .head_dim(weights.output_dim())?;
        let heads = (0..num_heads)
            .map(|index| weights.head(index, head_dim))
            .collect::<Result<Vec<_>>>()?;
        Self::new(heads, weights.output().cloned(), config)
    }

    pub fn num_heads(&self) -> usize {
        self.heads.len()
    }

    pub fn output_dim(&self) -> usize {
        self.heads[0].output_dim() * self.heads.len()
    }

    /// Runs every head and returns `[batch, seq, num_heads * head_dim]`.
    ///
    /// Head `h` uses the dropout seed `seed + h`.
    pub fn forward(&self, input: &Tensor, mode: Mode, seed: Option<u64>) -> Result<Tensor> {
        let outputs = self
            .heads
            .iter()
            .enumerate()
            .map(|(index, head)| {
                let head_seed = seed.map(|s| s.wrapping_add(index as u64));
                self.core.forward(input, head, mode, head_seed)
            })
            .collect::<Result<Vec<_>>>()?;
        let merged = Tensor::cat(&outputs, 2)?;
        match &self.output {
            Some(output) => {
                let projected = output.forward(&merged.to_dtype(candle_core::DType::F32)?)?;
                Ok(projected.to_dtype(input.dtype())?)
            }
            None => Ok(merged),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::WeightInit;
    use candle_core::{DType, Device};

    #[test]
    fn empty_stack_rejected() {
        let err = MultiHeadStack::new(Vec::new(), None, Config::default()).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidConfig(_)));
    }

    #[test]
    fn heads_must_share_widths() -> Result<()> {
        let device = Device::Cpu;
        let a = AttentionWeights::xavier_uniform(3, 2, &WeightInit::default(), &device)?;
        let b = AttentionWeights::xavier_uniform(3, 4, &WeightInit::default(), &device)?;
        assert!(MultiHeadStack::new(vec![a, b], None, Config::default()).is_err());
        Ok(())
    }

    #[test]
    fn concatenates_head_outputs() -> Result<()> {
        let device = Device::Cpu;
        let init = WeightInit {
            seed: 5,
            ..WeightInit::default()
        };
        let weights = AttentionWeights::xavier_uniform(3, 6, &init, &device)?;
        let stack = MultiHeadStack::from_fused(&weights, 3, Config::default())?;
        assert_eq!(stack.num_heads(), 3);
        assert_eq!(stack.output_dim(), 6);

        let input = Tensor::ones((2, 4, 3), DType::F32, &device)?;
        let out = stack.forward(&input, Mode::Inference, None)?;
        assert_eq!(out.dims(), &[2, 4, 6]);
        Ok(())
    }
}
