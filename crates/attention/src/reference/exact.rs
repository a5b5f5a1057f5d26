//! Tensor-library attention kernel.
//!
//! Scores, normalisation and aggregation are expressed as batched Candle
//! matmuls and a last-dimension softmax over `[batch, heads, seq, seq]`.

use candle_core::{DType, Tensor};
use candle_nn::ops::softmax_last_dim;

use crate::core::{
    check_kernel_inputs, AttendOptions, Attention, AttentionError, AttentionOutput, DropoutStage,
    Result,
};

/// Numerically stable attention kernel built from batched tensor ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactAttention;

impl ExactAttention {
    pub fn new() -> Self {
        Self
    }
}

impl Attention for ExactAttention {
    fn name(&self) -> &'static str {
        "tensor"
    }

    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: &Tensor,
        options: &AttendOptions<'_>,
    ) -> Result<AttentionOutput> {
        check_kernel_inputs(q, k, v, mask)?;
        for tensor in [q, k, v, mask] {
            if tensor.dtype() != DType::F32 {
                return Err(AttentionError::UnsupportedDType {
                    requested: format!("kernel inputs must be f32, got {:?}", tensor.dtype()),
                });
            }
        }

        let k_t = k.transpose(2, 3)?.contiguous()?;
        let scores = q.contiguous()?.matmul(&k_t)?;
        let masked = scores.broadcast_add(mask)?;
        let scaled = masked.affine(options.scale, 0.0)?;
        let mut weights = softmax_last_dim(&scaled.contiguous()?)?;

        if let Some(dropout) = options.dropout {
            if dropout.stage() == DropoutStage::Weights {
                weights = dropout.apply(&weights)?;
            }
        }

        let mut context = weights.matmul(&v.contiguous()?)?;

        if let Some(dropout) = options.dropout {
            if dropout.stage() == DropoutStage::Context {
                context = dropout.apply(&context)?;
            }
        }

        Ok(AttentionOutput { context, weights })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::build_causal_mask;
    use candle_core::{Device, Result as CandleResult};

    fn build_inputs(device: &Device) -> CandleResult<(Tensor, Tensor, Tensor)> {
        let data: Vec<f32> = (0..64).map(|i| (i as f32) * 0.01).collect();
        let q = Tensor::from_vec(data.clone(), (1, 2, 4, 8), device)?;
        let k = Tensor::from_vec(data.iter().map(|v| 0.5 - v).collect(), (1, 2, 4, 8), device)?;
        let v = Tensor::from_vec(data, (1, 2, 4, 8), device)?;
        Ok((q, k, v))
    }

    #[test]
    fn weights_are_causal_and_row_stochastic() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = build_causal_mask(&device, 4)?;
        let options = AttendOptions::deterministic(8);
        let out = ExactAttention::new().attend(&q, &k, &v, &mask, &options)?;

        assert_eq!(out.context.dims(), &[1, 2, 4, 8]);
        let weights = out.weights.flatten_all()?.to_vec1::<f32>()?;
        for row in weights.chunks(4).enumerate() {
            let (index, row) = row;
            let query = index % 4;
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert!(row[query] > 0.0);
            assert!(row[query + 1..].iter().all(|w| *w == 0.0));
        }
        Ok(())
    }

    #[test]
    fn mismatched_shapes_error() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let k = Tensor::zeros((1, 2, 5, 8), DType::F32, &device)?;
        let v = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let mask = build_causal_mask(&device, 4)?;
        let err = ExactAttention::new()
            .attend(&q, &k, &v, &mask, &AttendOptions::deterministic(8))
            .unwrap_err();
        assert!(matches!(err, AttentionError::ShapeMismatch { .. }));
        Ok(())
    }

    #[test]
    fn numerical_stability() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::full(10_000.0f32, (1, 1, 4, 4), &device)?;
        let k = Tensor::full(-10_000.0f32, (1, 1, 4, 4), &device)?;
        let v = Tensor::ones((1, 1, 4, 4), DType::F32, &device)?;
        let mask = build_causal_mask(&device, 4)?;
        let out = ExactAttention::new()
            .attend(&q, &k, &v, &mask, &AttendOptions::deterministic(4))?
            .context
            .flatten_all()?
            .to_vec1::<f32>()?;
        assert!(out.iter().all(|value| (value - 1.0).abs() < 1e-5));
        Ok(())
    }
}
