use crate::arena::{align_up, LinearArena};
use crate::error::StagingError;
use std::sync::{Arc, Mutex};

/// Configuration for a [`StagingPool`].
pub struct StagingConfig {
    pub label: Option<&'static str>,
    /// Minimum size of a newly allocated slab. Requests larger than this get
    /// a slab sized to the request.
    pub default_slab_size: u64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            label: Some("helio staging slab"),
            default_slab_size: 256 * 1024,
        }
    }
}

/// A sub-allocation handed out by [`StagingPool::fetch_mapped`].
///
/// The region is CPU-writable until the owning pool's `begin_uploads` unmaps
/// the slab. Offsets are 8-byte aligned and sizes 4-byte aligned, matching
/// WebGPU's mapped-range rules.
#[derive(Debug, Clone)]
pub struct SlabAlloc {
    pub buffer: Arc<wgpu::Buffer>,
    pub offset: u64,
    pub size: u64,
}

impl SlabAlloc {
    /// Copy `bytes` into the mapped region at `offset_in_alloc`.
    ///
    /// Panics if the slab has been unmapped (a staged write must be populated
    /// before `begin_uploads`).
    pub fn write(&self, offset_in_alloc: u64, bytes: &[u8]) {
        debug_assert!(offset_in_alloc + bytes.len() as u64 <= self.size);
        let start = self.offset;
        let mut view = self
            .buffer
            .slice(start..start + self.size)
            .get_mapped_range_mut();
        let lo = offset_in_alloc as usize;
        view[lo..lo + bytes.len()].copy_from_slice(bytes);
    }

    /// Read the staged bytes back out of the mapped region.
    ///
    /// Used when coalescing overlapping writes into a wider allocation.
    pub fn read(&self, offset_in_alloc: u64, out: &mut [u8]) {
        debug_assert!(offset_in_alloc + out.len() as u64 <= self.size);
        let start = self.offset;
        let view = self.buffer.slice(start..start + self.size).get_mapped_range();
        let lo = offset_in_alloc as usize;
        out.copy_from_slice(&view[lo..lo + out.len()]);
    }
}

struct Slab {
    buffer: Arc<wgpu::Buffer>,
    arena: LinearArena,
}

/// Pool of write-mappable staging slabs backing deferred uploads for a single
/// GPU resource.
///
/// Lifecycle per flush cycle:
/// 1. [`fetch_mapped`](Self::fetch_mapped) hands out sub-allocations from
///    mapped slabs (allocating new slabs as needed, mapped at creation).
/// 2. [`begin_uploads`](Self::begin_uploads) unmaps every slab that issued an
///    allocation this cycle so copy commands reading them can be submitted.
/// 3. [`end_uploads`](Self::end_uploads) asynchronously re-maps those slabs;
///    each rejoins the allocatable pool once its mapping resolves. Nothing
///    waits on this; it is fire-and-forget reclamation.
///
/// A slab is always either fully mapped-writable or fully unmapped as
/// observed by callers; allocations are never issued from a slab that is
/// between `begin_uploads` and remap completion.
pub struct StagingPool {
    config: StagingConfig,
    mapped: Vec<Slab>,
    unmapped: Vec<Slab>,
    reclaimed: Arc<Mutex<Vec<Slab>>>,
}

impl StagingPool {
    pub fn new(config: StagingConfig) -> Self {
        Self {
            config,
            mapped: Vec::new(),
            unmapped: Vec::new(),
            reclaimed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Total slabs owned by the pool, in any state.
    pub fn slab_count(&self) -> usize {
        self.mapped.len() + self.unmapped.len() + self.reclaimed.lock().unwrap().len()
    }

    /// Fetch a writable region of at least `size` bytes.
    ///
    /// `size` is rounded up to 4 bytes; the returned offset is 8-byte
    /// aligned. When `allow_overlap` is true the allocation may share a slab
    /// with earlier allocations from this cycle; when false it always starts
    /// a dedicated slab (callers that populate the whole mapped range
    /// themselves, e.g. row-repacked texture uploads, rely on this).
    pub fn fetch_mapped(
        &mut self,
        device: &wgpu::Device,
        size: u64,
        allow_overlap: bool,
    ) -> Result<SlabAlloc, StagingError> {
        let size = align_up(size.max(4), 4);
        self.reclaim_ready();

        if allow_overlap {
            for slab in &mut self.mapped {
                if let Some(offset) = slab.arena.alloc(size, wgpu::MAP_ALIGNMENT) {
                    return Ok(SlabAlloc {
                        buffer: Arc::clone(&slab.buffer),
                        offset,
                        size,
                    });
                }
            }
        }

        let slab_size = align_up(
            size.max(self.config.default_slab_size),
            wgpu::COPY_BUFFER_ALIGNMENT,
        );
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: self.config.label,
            size: slab_size,
            usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: true,
        });

        let mut slab = Slab {
            buffer: Arc::new(buffer),
            arena: LinearArena::new(slab_size),
        };
        // A fresh slab always has room.
        let offset = slab.arena.alloc(size, wgpu::MAP_ALIGNMENT).unwrap();
        let alloc = SlabAlloc {
            buffer: Arc::clone(&slab.buffer),
            offset,
            size,
        };
        self.mapped.push(slab);
        Ok(alloc)
    }

    /// Fetch a region and, when `bytes` is given, copy it in at offset 0.
    ///
    /// A `None` source reserves the region for the caller to populate (large
    /// or irregular texture uploads write rows directly into the mapping).
    pub fn stage_bytes(
        &mut self,
        device: &wgpu::Device,
        bytes: Option<&[u8]>,
        size: u64,
        allow_overlap: bool,
    ) -> Result<SlabAlloc, StagingError> {
        let alloc = self.fetch_mapped(device, size, allow_overlap)?;
        if let Some(bytes) = bytes {
            alloc.write(0, bytes);
        }
        Ok(alloc)
    }

    /// Unmap every slab that issued an allocation this cycle.
    ///
    /// Must be called before submitting copy commands that read the slabs.
    /// Returns the number of slabs unmapped.
    pub fn begin_uploads(&mut self) -> usize {
        let mut count = 0;
        let mut i = 0;
        while i < self.mapped.len() {
            if self.mapped[i].arena.is_used() {
                let slab = self.mapped.swap_remove(i);
                slab.buffer.unmap();
                self.unmapped.push(slab);
                count += 1;
            } else {
                i += 1;
            }
        }
        count
    }

    /// Re-map every slab unmapped by [`begin_uploads`](Self::begin_uploads).
    ///
    /// The mapping resolves on a later device poll; each slab rejoins the
    /// pool when it does. No caller blocks on this.
    pub fn end_uploads(&mut self) {
        for mut slab in self.unmapped.drain(..) {
            slab.arena.reset();
            let reclaimed = Arc::clone(&self.reclaimed);
            let buffer = Arc::clone(&slab.buffer);
            buffer.slice(..).map_async(wgpu::MapMode::Write, move |result| {
                // A failed remap (device loss, destroyed buffer) drops the
                // slab; a replacement is allocated on the next fetch.
                if result.is_ok() {
                    reclaimed.lock().unwrap().push(slab);
                }
            });
        }
    }

    /// Destroy all slabs.
    ///
    /// Used when the owning resource is not dynamic: retaining mapped staging
    /// memory for a one-shot upload is wasted residency. In-flight copy
    /// descriptors keep their slab alive through their own `Arc` until the
    /// copy is submitted.
    pub fn purge(&mut self) {
        self.mapped.clear();
        self.unmapped.clear();
        self.reclaimed.lock().unwrap().clear();
    }

    fn reclaim_ready(&mut self) {
        let mut reclaimed = self.reclaimed.lock().unwrap();
        self.mapped.append(&mut reclaimed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_nonzero() {
        let config = StagingConfig::default();
        assert!(config.default_slab_size > 0);
        assert_eq!(config.default_slab_size % wgpu::COPY_BUFFER_ALIGNMENT, 0);
    }

    #[test]
    fn alloc_size_rounding_matches_mapped_range_rules() {
        // Sizes are rounded to 4, offsets to MAP_ALIGNMENT (8).
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(6, 4), 8);
        let mut arena = LinearArena::new(64);
        let a = arena.alloc(4, wgpu::MAP_ALIGNMENT).unwrap();
        let b = arena.alloc(4, wgpu::MAP_ALIGNMENT).unwrap();
        assert_eq!(a % wgpu::MAP_ALIGNMENT, 0);
        assert_eq!(b % wgpu::MAP_ALIGNMENT, 0);
        assert!(b >= a + 4);
    }
}
