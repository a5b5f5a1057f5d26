//! Reuse of causal masks across forward calls.
//!
//! The cache keeps the largest mask built so far. A causal mask for `T`
//! positions is the top-left `T x T` block of any larger causal mask, so
//! shorter sequences are served by narrowing.

use std::sync::Mutex;

use candle_core::{Device, Tensor};

use super::causal::build_causal_mask;
use crate::core::{AttentionError, Result};

#[derive(Debug, Default)]
pub struct CausalMaskCache {
    cached: Mutex<Option<Tensor>>,
}

impl CausalMaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of positions covered by the cached mask (0 when empty).
    pub fn capacity(&self) -> usize {
        self.cached
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|mask| mask.dims()[0]))
            .unwrap_or(0)
    }

    /// Returns a contiguous `[seq_len, seq_len]` causal mask on `device`.
    pub fn get(&self, device: &Device, seq_len: usize) -> Result<Tensor> {
        let mut guard = self.cached.lock().map_err(|_| {
            AttentionError::InvalidConfig("causal mask cache mutex poisoned".to_string())
        })?;
        if let Some(mask) = guard.as_ref() {
            let cached_len = mask.dims()[0];
            if cached_len >= seq_len && mask.device().same_device(device) {
                log::debug!("causal mask cache hit: seq_len={seq_len} cached={cached_len}");
                if cached_len == seq_len {
                    return Ok(mask.clone());
                }
                let narrowed = mask.narrow(0, 0, seq_len)?.narrow(1, 0, seq_len)?;
                return Ok(narrowed.contiguous()?);
            }
        }
        log::debug!("causal mask cache miss: seq_len={seq_len}");
        let mask = build_causal_mask(device, seq_len)?;
        *guard = Some(mask.clone());
        Ok(mask)
    }
}
