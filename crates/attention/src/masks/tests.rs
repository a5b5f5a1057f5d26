use super::*;
use candle_core::{Device, Result};

#[test]
fn causal_mask_blocks_only_future_keys() -> Result<()> {
    let device = Device::Cpu;
    let seq_len = 4;
    let mask = build_causal_mask(&device, seq_len)?;
    assert_eq!(mask.dims(), &[seq_len, seq_len]);
    assert_eq!(mask.dtype(), MASK_DTYPE);

    let rows = mask.to_vec2::<f32>()?;
    for (q, row) in rows.iter().enumerate() {
        for (k, value) in row.iter().enumerate() {
            if k > q {
                assert_eq!(*value, f32::NEG_INFINITY, "q={q} k={k}");
            } else {
                assert_eq!(*value, 0.0, "q={q} k={k}");
            }
        }
    }
    Ok(())
}

#[test]
fn causal_mask_handles_single_token() -> Result<()> {
    let mask = build_causal_mask(&Device::Cpu, 1)?;
    assert_eq!(mask.flatten_all()?.to_vec1::<f32>()?, vec![0.0]);
    assert!(causal_mask_values(0).is_empty());
    Ok(())
}

#[test]
fn cache_serves_shorter_sequences_from_larger_mask() -> crate::core::Result<()> {
    let device = Device::Cpu;
    let cache = CausalMaskCache::new();
    cache.get(&device, 6)?;
    assert_eq!(cache.capacity(), 6);

    let narrowed = cache.get(&device, 3)?;
    let fresh = build_causal_mask(&device, 3)?;
    assert_eq!(narrowed.to_vec2::<f32>()?, fresh.to_vec2::<f32>()?);
    assert!(narrowed.is_contiguous());
    assert_eq!(cache.capacity(), 6);
    Ok(())
}

#[test]
fn cache_grows_on_longer_sequences() -> crate::core::Result<()> {
    let device = Device::Cpu;
    let cache = CausalMaskCache::new();
    assert_eq!(cache.capacity(), 0);

    cache.get(&device, 2)?;
    assert_eq!(cache.capacity(), 2);
    let mask = cache.get(&device, 5)?;
    assert_eq!(mask.dims(), &[5, 5]);
    assert_eq!(cache.capacity(), 5);
    Ok(())
}
