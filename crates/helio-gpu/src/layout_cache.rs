use std::collections::HashMap;
use std::sync::Arc;

use crate::stable_hash64;
use crate::stats::CacheStats;

/// A cached bind group layout plus the structural hash of its entries.
///
/// The hash participates in pipeline-layout and bind-group cache keys so
/// equal layouts compare without walking entry lists.
#[derive(Clone)]
pub struct CachedBindGroupLayout {
    pub layout: Arc<wgpu::BindGroupLayout>,
    pub hash: u64,
}

/// Cache of `wgpu::BindGroupLayout` objects keyed by their entry list.
///
/// Layouts are purely a function of their entries, so they can be shared
/// across every bind group and pipeline that uses the same shape.
#[derive(Default)]
pub struct BindGroupLayoutCache {
    layouts: HashMap<u64, CachedBindGroupLayout>,
    hits: u64,
    misses: u64,
}

impl BindGroupLayoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &mut self,
        device: &wgpu::Device,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> CachedBindGroupLayout {
        let hash = stable_hash64(&entries);
        if let Some(cached) = self.layouts.get(&hash) {
            self.hits += 1;
            return cached.clone();
        }

        self.misses += 1;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("helio bind group layout"),
            entries,
        });
        let cached = CachedBindGroupLayout {
            layout: Arc::new(layout),
            hash,
        };
        self.layouts.insert(hash, cached.clone());
        cached
    }

    /// Drop all cached layouts (device replacement).
    pub fn clear(&mut self) {
        self.layouts.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.layouts.len(),
        }
    }
}
