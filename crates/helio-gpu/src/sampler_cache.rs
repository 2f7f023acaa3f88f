use std::collections::HashMap;
use std::sync::Arc;

use crate::stats::CacheStats;

/// Hashable sampler description.
///
/// LOD clamps are stored as raw `f32` bits so the key is `Eq + Hash` without
/// losing any distinct sampler states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerKey {
    pub address_mode_u: wgpu::AddressMode,
    pub address_mode_v: wgpu::AddressMode,
    pub address_mode_w: wgpu::AddressMode,
    pub mag_filter: wgpu::FilterMode,
    pub min_filter: wgpu::FilterMode,
    pub mipmap_filter: wgpu::FilterMode,
    pub lod_min_clamp_bits: u32,
    pub lod_max_clamp_bits: u32,
    pub compare: Option<wgpu::CompareFunction>,
    pub anisotropy_clamp: u16,
}

impl Default for SamplerKey {
    fn default() -> Self {
        Self {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            lod_min_clamp_bits: 0f32.to_bits(),
            lod_max_clamp_bits: 32f32.to_bits(),
            compare: None,
            anisotropy_clamp: 1,
        }
    }
}

impl SamplerKey {
    pub fn nearest() -> Self {
        Self {
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Self::default()
        }
    }

    pub fn with_compare(compare: wgpu::CompareFunction) -> Self {
        Self {
            compare: Some(compare),
            ..Self::default()
        }
    }

    pub fn is_comparison(&self) -> bool {
        self.compare.is_some()
    }

    /// True when anisotropy requires all filters to be linear, or none is
    /// requested (wgpu validation rule).
    pub fn filters_valid(&self) -> bool {
        self.anisotropy_clamp <= 1
            || (self.mag_filter == wgpu::FilterMode::Linear
                && self.min_filter == wgpu::FilterMode::Linear
                && self.mipmap_filter == wgpu::FilterMode::Linear)
    }

    fn descriptor(&self) -> wgpu::SamplerDescriptor<'static> {
        wgpu::SamplerDescriptor {
            label: Some("helio sampler"),
            address_mode_u: self.address_mode_u,
            address_mode_v: self.address_mode_v,
            address_mode_w: self.address_mode_w,
            mag_filter: self.mag_filter,
            min_filter: self.min_filter,
            mipmap_filter: self.mipmap_filter,
            lod_min_clamp: f32::from_bits(self.lod_min_clamp_bits),
            lod_max_clamp: f32::from_bits(self.lod_max_clamp_bits),
            compare: self.compare,
            anisotropy_clamp: self.anisotropy_clamp,
            border_color: None,
        }
    }
}

/// Deduplicating cache of `wgpu::Sampler` objects.
#[derive(Default)]
pub struct SamplerCache {
    samplers: HashMap<SamplerKey, Arc<wgpu::Sampler>>,
    hits: u64,
    misses: u64,
}

impl SamplerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, device: &wgpu::Device, key: SamplerKey) -> Arc<wgpu::Sampler> {
        if let Some(sampler) = self.samplers.get(&key) {
            self.hits += 1;
            return Arc::clone(sampler);
        }

        self.misses += 1;
        let sampler = Arc::new(device.create_sampler(&key.descriptor()));
        self.samplers.insert(key, Arc::clone(&sampler));
        sampler
    }

    pub fn clear(&mut self) {
        self.samplers.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.samplers.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_distinguishes_lod_clamps() {
        let a = SamplerKey::default();
        let b = SamplerKey {
            lod_max_clamp_bits: 8f32.to_bits(),
            ..SamplerKey::default()
        };
        assert_ne!(a, b);
    }

    #[test]
    fn comparison_key_reports_compare_mode() {
        assert!(SamplerKey::with_compare(wgpu::CompareFunction::LessEqual).is_comparison());
        assert!(!SamplerKey::default().is_comparison());
    }

    #[test]
    fn anisotropy_requires_linear_filters() {
        let mut key = SamplerKey::nearest();
        key.anisotropy_clamp = 4;
        assert!(!key.filters_valid());
        assert!(SamplerKey::default().filters_valid());
    }
}
