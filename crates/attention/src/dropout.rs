//! Pluggable dropout applied to attention weights or context vectors.
//!
//! Dropout is resolved once per forward call into a [`Dropout`] strategy. An
//! active strategy materialises a keep-mask for the whole tensor up front, in
//! row-major order from a seeded [`StdRng`], so the result never depends on
//! how kernels schedule their work. Kept entries carry `1 / (1 - rate)`.

use candle_core::Tensor;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::core::{config::validate_dropout_rate, AttentionError, DropoutStage, Mode, Result};

/// Dropout strategy for a single forward evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dropout {
    /// Inference mode or zero rate: tensors pass through unchanged.
    Identity,
    /// Zero each entry with probability `rate` and rescale survivors.
    StochasticZero { rate: f32, seed: u64 },
}

impl Dropout {
    /// Builds the strategy for `mode`.
    ///
    /// Inference mode and a zero (or absent) rate disable dropout. In training
    /// mode without a seed a fresh one is drawn from the thread RNG.
    pub fn resolve(mode: Mode, rate: Option<f32>, seed: Option<u64>) -> Result<Self> {
        if let Some(rate) = rate {
            validate_dropout_rate(rate)?;
        }
        match (mode, rate) {
            (Mode::Inference, _) | (_, None) => Ok(Dropout::Identity),
            (Mode::Train, Some(rate)) if rate == 0.0 => Ok(Dropout::Identity),
            (Mode::Train, Some(rate)) => {
                let seed = seed.unwrap_or_else(|| {
                    let drawn = rand::thread_rng().gen::<u64>();
                    log::debug!("attention dropout drew seed {drawn}");
                    drawn
                });
                Ok(Dropout::StochasticZero { rate, seed })
            }
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Dropout::Identity)
    }

    /// Materialises the keep-mask for a tensor shaped `dims`.
    pub fn mask(&self, stage: DropoutStage, dims: &[usize]) -> Option<DropoutMask> {
        match *self {
            Dropout::Identity => None,
            Dropout::StochasticZero { rate, seed } => {
                let keep_prob = 1.0 - rate;
                let scale = 1.0 / keep_prob;
                let total: usize = dims.iter().product();
                let mut rng = StdRng::seed_from_u64(seed);
                let values = (0..total)
                    .map(|_| {
                        if rng.gen::<f32>() < keep_prob {
                            scale
                        } else {
                            0.0
                        }
                    })
                    .collect();
                Some(DropoutMask {
                    stage,
                    dims: dims.to_vec(),
                    values,
                })
            }
        }
    }
}

/// Precomputed multiplicative dropout mask.
#[derive(Debug, Clone, PartialEq)]
pub struct DropoutMask {
    stage: DropoutStage,
    dims: Vec<usize>,
    values: Vec<f32>,
}

impl DropoutMask {
    pub fn stage(&self) -> DropoutStage {
        self.stage
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Multipliers in row-major order: `0.0` for dropped, `1 / (1 - rate)` for kept.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Multiplies `tensor` elementwise by the mask.
    pub fn apply(&self, tensor: &Tensor) -> Result<Tensor> {
        self.expect_dims(tensor.dims())?;
        let mask = Tensor::from_slice(&self.values, self.dims.clone(), tensor.device())?
            .to_dtype(tensor.dtype())?;
        Ok(tensor.mul(&mask)?)
    }

    /// Fails unless the mask was built for a tensor shaped `dims`.
    pub fn expect_dims(&self, dims: &[usize]) -> Result<()> {
        if dims == self.dims.as_slice() {
            Ok(())
        } else {
            Err(AttentionError::ShapeMismatch {
                context: "dropout mask",
                expected: self.dims.clone(),
                actual: dims.to_vec(),
            })
        }
    }

    /// Slice of multipliers for the `index`-th block of `unit_len` elements.
    pub(crate) fn unit(&self, index: usize, unit_len: usize) -> &[f32] {
        &self.values[index * unit_len..(index + 1) * unit_len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn inference_is_identity() -> Result<()> {
        let dropout = Dropout::resolve(Mode::Inference, Some(0.5), Some(7))?;
        assert!(dropout.is_identity());
        assert!(dropout.mask(DropoutStage::Weights, &[2, 2]).is_none());
        Ok(())
    }

    #[test]
    fn zero_rate_is_identity_in_training() -> Result<()> {
        assert!(Dropout::resolve(Mode::Train, Some(0.0), Some(1))?.is_identity());
        assert!(Dropout::resolve(Mode::Train, None, Some(1))?.is_identity());
        Ok(())
    }

    #[test]
    fn invalid_rate_rejected_in_any_mode() {
        for mode in [Mode::Train, Mode::Inference] {
            let err = Dropout::resolve(mode, Some(1.0), None).unwrap_err();
            assert!(matches!(err, AttentionError::InvalidDropoutRate { .. }));
        }
    }

    #[test]
    fn mask_is_reproducible_for_a_seed() -> Result<()> {
        let dropout = Dropout::resolve(Mode::Train, Some(0.5), Some(123))?;
        let first = dropout.mask(DropoutStage::Weights, &[4, 8, 8]).unwrap();
        let second = dropout.mask(DropoutStage::Weights, &[4, 8, 8]).unwrap();
        assert_eq!(first, second);

        let other = Dropout::resolve(Mode::Train, Some(0.5), Some(124))?
            .mask(DropoutStage::Weights, &[4, 8, 8])
            .unwrap();
        assert_ne!(first.values(), other.values());
        Ok(())
    }

    #[test]
    fn survivors_are_rescaled() -> Result<()> {
        let dropout = Dropout::resolve(Mode::Train, Some(0.25), Some(9))?;
        let mask = dropout.mask(DropoutStage::Context, &[64, 64]).unwrap();
        assert!(mask
            .values()
            .iter()
            .all(|v| *v == 0.0 || (*v - 1.0 / 0.75).abs() < 1e-6));
        let mean = mask.values().iter().sum::<f32>() / mask.values().len() as f32;
        assert!((mean - 1.0).abs() < 0.1, "mean {mean}");
        Ok(())
    }

    #[test]
    fn apply_checks_shape() -> Result<()> {
        let device = Device::Cpu;
        let mask = Dropout::StochasticZero { rate: 0.5, seed: 3 }
            .mask(DropoutStage::Weights, &[2, 3])
            .unwrap();
        let ones = Tensor::ones((2, 3), DType::F32, &device)?;
        let applied = mask.apply(&ones)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(applied, mask.values());

        let wrong = Tensor::ones((3, 2), DType::F32, &device)?;
        assert!(matches!(
            mask.apply(&wrong),
            Err(AttentionError::ShapeMismatch { .. })
        ));
        Ok(())
    }
}
