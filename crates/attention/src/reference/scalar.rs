//! Loop-based attention kernel on row-major buffers.
//!
//! Each `(batch, head)` pair is an independent unit of work. Units are fanned
//! out with rayon, but every unit runs sequentially over its own slices, so the
//! result is bit-identical however the units are scheduled.

use candle_core::{DType, Tensor};
use rayon::prelude::*;

use crate::core::{
    check_kernel_inputs, AttendOptions, Attention, AttentionError, AttentionOutput, DropoutStage,
    Result,
};

/// Explicit nested-loop attention, parallel across the batch x head grid.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScalarAttention;

impl ScalarAttention {
    pub fn new() -> Self {
        Self
    }
}

/// Borrowed inputs for one `(batch, head)` unit.
struct Unit<'a> {
    q: &'a [f32],
    k: &'a [f32],
    v: &'a [f32],
    weights_dropout: Option<&'a [f32]>,
    context_dropout: Option<&'a [f32]>,
}

impl Attention for ScalarAttention {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: &Tensor,
        options: &AttendOptions<'_>,
    ) -> Result<AttentionOutput> {
        let (batch, heads, seq, head_dim) = check_kernel_inputs(q, k, v, mask)?;
        if seq == 0 || head_dim == 0 {
            return Err(AttentionError::invalid_shape(
                "seq_len and head_dim must be non-zero",
            ));
        }
        if let Some(dropout) = options.dropout {
            match dropout.stage() {
                DropoutStage::Weights => dropout.expect_dims(&[batch, heads, seq, seq])?,
                DropoutStage::Context => dropout.expect_dims(&[batch, heads, seq, head_dim])?,
            }
        }
        let device = q.device();
        let q_vec = flatten_f32(q)?;
        let k_vec = flatten_f32(k)?;
        let v_vec = flatten_f32(v)?;
        let mask_vec = flatten_f32(mask)?;

        let span = seq * head_dim;
        let square = seq * seq;
        let units = batch * heads;
        let mut context = vec![0f32; units * span];
        let mut weights = vec![0f32; units * square];
        let scale = options.scale as f32;

        context
            .par_chunks_mut(span)
            .zip(weights.par_chunks_mut(square))
            .enumerate()
            .for_each(|(index, (ctx, attn))| {
                let unit = Unit {
                    q: &q_vec[index * span..(index + 1) * span],
                    k: &k_vec[index * span..(index + 1) * span],
                    v: &v_vec[index * span..(index + 1) * span],
                    weights_dropout: options
                        .dropout
                        .filter(|d| d.stage() == DropoutStage::Weights)
                        .map(|d| d.unit(index, square)),
                    context_dropout: options
                        .dropout
                        .filter(|d| d.stage() == DropoutStage::Context)
                        .map(|d| d.unit(index, span)),
                };
                attend_unit(&unit, &mask_vec, seq, head_dim, scale, ctx, attn);
            });

        Ok(AttentionOutput {
            context: Tensor::from_vec(context, (batch, heads, seq, head_dim), device)?,
            weights: Tensor::from_vec(weights, (batch, heads, seq, seq), device)?,
        })
    }
}

fn flatten_f32(tensor: &Tensor) -> Result<Vec<f32>> {
    if tensor.dtype() != DType::F32 {
        return Err(AttentionError::UnsupportedDType {
            requested: format!("kernel inputs must be f32, got {:?}", tensor.dtype()),
        });
    }
    Ok(tensor.flatten_all()?.to_vec1::<f32>()?)
}

fn attend_unit(
    unit: &Unit<'_>,
    mask: &[f32],
    seq: usize,
    head_dim: usize,
    scale: f32,
    context: &mut [f32],
    weights: &mut [f32],
) {
    for i in 0..seq {
        let row = &mut weights[i * seq..(i + 1) * seq];
        let query = &unit.q[i * head_dim..(i + 1) * head_dim];
        for (j, score) in row.iter_mut().enumerate() {
            let key = &unit.k[j * head_dim..(j + 1) * head_dim];
            let dot: f32 = query.iter().zip(key).map(|(a, b)| a * b).sum();
            *score = (dot + mask[i * seq + j]) * scale;
        }
        softmax_in_place(row);
        if let Some(keep) = unit.weights_dropout {
            for (weight, factor) in row.iter_mut().zip(&keep[i * seq..(i + 1) * seq]) {
                *weight *= factor;
            }
        }

        let out = &mut context[i * head_dim..(i + 1) * head_dim];
        for (j, weight) in row.iter().enumerate() {
            let value = &unit.v[j * head_dim..(j + 1) * head_dim];
            for (acc, v) in out.iter_mut().zip(value) {
                *acc += weight * v;
            }
        }
        if let Some(keep) = unit.context_dropout {
            for (acc, factor) in out.iter_mut().zip(&keep[i * head_dim..(i + 1) * head_dim]) {
                *acc *= factor;
            }
        }
    }
}

/// Max-subtracted softmax; `-inf` entries receive exactly zero mass.
///
/// A NaN anywhere in the row turns the whole row into NaN.
pub fn softmax_in_place(row: &mut [f32]) {
    if row.iter().any(|value| value.is_nan()) {
        row.iter_mut().for_each(|value| *value = f32::NAN);
        return;
    }
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        row.iter_mut().for_each(|value| *value = 0.0);
        return;
    }
    let mut denom = 0f32;
    for value in row.iter_mut() {
        if *value == f32::NEG_INFINITY {
            *value = 0.0;
        } else {
            *value = (*value - max).exp();
            denom += *value;
        }
    }
    for value in row.iter_mut() {
        *value /= denom;
    }
}
