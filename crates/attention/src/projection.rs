//! Query, key, value and output projections.
//!
//! Projections expect inputs shaped `(batch, seq, d_in)` and return tensors
//! with `(batch, seq, d_out)`. Weight matrices are stored as `[d_in, d_out]`
//! and right-multiplied (`X · W`). Parameters are owned by the caller and
//! never mutated here; a forward call only reads them.

use candle_core::{DType, Device, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::checks;
use crate::core::{AttentionError, Result};

/// Dense affine map `x · weight + bias`.
#[derive(Debug, Clone)]
pub struct Projection {
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Projection {
    /// Wraps a `[d_in, d_out]` weight and an optional `[d_out]` bias.
    pub fn new(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        let (d_in, d_out) = weight.dims2().map_err(|_| {
            AttentionError::invalid_shape(format!(
                "projection weight must be [d_in, d_out], got {:?}",
                weight.dims()
            ))
        })?;
        if d_in == 0 || d_out == 0 {
            return Err(AttentionError::invalid_shape(
                "projection weight dimensions must be non-zero",
            ));
        }
        checks::expect_float("projection.weight", &weight)?;
        if let Some(bias) = &bias {
            if bias.dims() != [d_out] {
                return Err(AttentionError::ShapeMismatch {
                    context: "projection bias",
                    expected: vec![d_out],
                    actual: bias.dims().to_vec(),
                });
            }
            checks::expect_float("projection.bias", bias)?;
            checks::expect_same_device("projection.bias", bias, &weight)?;
        }
        Ok(Self { weight, bias })
    }

    /// Glorot-uniform weights drawn from `rng`; the bias starts at zero.
    pub fn xavier_uniform(
        d_in: usize,
        d_out: usize,
        bias: bool,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Self> {
        let bound = (6.0f64 / (d_in + d_out) as f64).sqrt() as f32;
        let data: Vec<f32> = (0..d_in * d_out)
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        let weight = Tensor::from_vec(data, (d_in, d_out), device)?;
        let bias = if bias {
            Some(Tensor::zeros(d_out, DType::F32, device)?)
        } else {
            None
        };
        Self::new(weight, bias)
    }

    pub fn input_dim(&self) -> usize {
        self.weight.dims()[0]
    }

    pub fn output_dim(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    pub fn device(&self) -> &Device {
        self.weight.device()
    }

    /// Projection restricted to output columns `start..start + len`.
    pub fn columns(&self, start: usize, len: usize) -> Result<Self> {
        if len == 0 || start + len > self.output_dim() {
            return Err(AttentionError::invalid_shape(format!(
                "column range {start}..{} outside projection width {}",
                start + len,
                self.output_dim()
            )));
        }
        let weight = self.weight.narrow(1, start, len)?.contiguous()?;
        let bias = match &self.bias {
            Some(bias) => Some(bias.narrow(0, start, len)?.contiguous()?),
            None => None,
        };
        Self::new(weight, bias)
    }

    /// Applies the projection, computing in the dtype of `hidden`.
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let (batch, seq, d_in) = checks::expect_batch_seq_hidden("projection.input", hidden)?;
        if d_in != self.input_dim() {
            return Err(AttentionError::ShapeMismatch {
                context: "projection input",
                expected: vec![batch, seq, self.input_dim()],
                actual: hidden.dims().to_vec(),
            });
        }
        let weight = self.weight.to_dtype(hidden.dtype())?;
        let flat = hidden.reshape((batch * seq, d_in))?;
        let mut projected = flat.matmul(&weight)?;
        if let Some(bias) = &self.bias {
            projected = projected.broadcast_add(&bias.to_dtype(hidden.dtype())?)?;
        }
        Ok(projected.reshape((batch, seq, self.output_dim()))?)
    }
}

/// Options for [`AttentionWeights::xavier_uniform`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightInit {
    /// Attach zero-initialised biases to the query, key and value projections.
    pub qkv_bias: bool,
    /// Create a `[d_out, d_out]` output projection (with bias).
    pub output_projection: bool,
    pub seed: u64,
}

/// Parameter set consumed by one forward evaluation.
#[derive(Debug, Clone)]
pub struct AttentionWeights {
    query: Projection,
    key: Projection,
    value: Projection,
    output: Option<Projection>,
}

impl AttentionWeights {
    /// Builds bias-free weights from `[d_in, d_out]` matrices and an optional
    /// `[d_out, d_out]` output matrix.
    pub fn new(
        w_query: Tensor,
        w_key: Tensor,
        w_value: Tensor,
        w_out: Option<Tensor>,
    ) -> Result<Self> {
        let output = match w_out {
            Some(w_out) => Some(Projection::new(w_out, None)?),
            None => None,
        };
        Self::from_projections(
            Projection::new(w_query, None)?,
            Projection::new(w_key, None)?,
            Projection::new(w_value, None)?,
            output,
        )
    }

    /// Builds weights from individual projections, checking that they agree.
    pub fn from_projections(
        query: Projection,
        key: Projection,
        value: Projection,
        output: Option<Projection>,
    ) -> Result<Self> {
        let expected = vec![query.input_dim(), query.output_dim()];
        for (context, projection) in [("key weight", &key), ("value weight", &value)] {
            let actual = vec![projection.input_dim(), projection.output_dim()];
            if actual != expected {
                return Err(AttentionError::ShapeMismatch {
                    context,
                    expected: expected.clone(),
                    actual,
                });
            }
            checks::expect_same_device(context, projection.weight(), query.weight())?;
        }
        if let Some(output) = &output {
            let d_out = query.output_dim();
            let actual = vec![output.input_dim(), output.output_dim()];
            if actual != [d_out, d_out] {
                return Err(AttentionError::ShapeMismatch {
                    context: "output weight",
                    expected: vec![d_out, d_out],
                    actual,
                });
            }
            checks::expect_same_device("output weight", output.weight(), query.weight())?;
        }
        Ok(Self {
            query,
            key,
            value,
            output,
        })
    }

    /// Reproducible Glorot-uniform parameters for `d_in -> d_out`.
    pub fn xavier_uniform(
        d_in: usize,
        d_out: usize,
        init: &WeightInit,
        device: &Device,
    ) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(init.seed);
        let query = Projection::xavier_uniform(d_in, d_out, init.qkv_bias, &mut rng, device)?;
        let key = Projection::xavier_uniform(d_in, d_out, init.qkv_bias, &mut rng, device)?;
        let value = Projection::xavier_uniform(d_in, d_out, init.qkv_bias, &mut rng, device)?;
        let output = if init.output_projection {
            Some(Projection::xavier_uniform(d_out, d_out, true, &mut rng, device)?)
        } else {
            None
        };
        Self::from_projections(query, key, value, output)
    }

    pub fn input_dim(&self) -> usize {
        self.query.input_dim()
    }

    pub fn output_dim(&self) -> usize {
        self.query.output_dim()
    }

    pub fn query(&self) -> &Projection {
        &self.query
    }

    pub fn key(&self) -> &Projection {
        &self.key
    }

    pub fn value(&self) -> &Projection {
        &self.value
    }

    pub fn output(&self) -> Option<&Projection> {
        self.output.as_ref()
    }

    pub fn device(&self) -> &Device {
        self.query.device()
    }

    /// Single-head weights for head `index` of width `head_dim`, without an
    /// output projection.
    pub fn head(&self, index: usize, head_dim: usize) -> Result<Self> {
        let start = index * head_dim;
        Self::from_projections(
            self.query.columns(start, head_dim)?,
            self.key.columns(start, head_dim)?,
            self.value.columns(start, head_dim)?,
            None,
        )
    }
}
