//! GPU buffer resources with deferred sub-range uploads.
//!
//! Mutations made through `sub_data` are staged into the buffer's
//! [`StagingPool`] and recorded as pending uploads; they land on the GPU when
//! the owning pass or queue flushes them with copy commands. Overlapping
//! staged writes are coalesced so at most one pending entry covers any byte
//! range.

use std::sync::Arc;

use bitflags::bitflags;
use helio_gpu::{GpuContext, SlabAlloc, StagingConfig, StagingError, StagingPool};

use crate::object::Identity;
use crate::pass::{CopyDst, SyncCopy};

bitflags! {
    /// Logical usage flags, mapped to native usages at allocation time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX  = 1 << 0;
        const INDEX   = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        /// CPU readback allowed (`get_sub_data`).
        const READ    = 1 << 4;
        /// CPU writes allowed (`sub_data`).
        const WRITE   = 1 << 5;
    }
}

impl BufferUsage {
    pub(crate) fn to_wgpu(self) -> wgpu::BufferUsages {
        let mut usage = wgpu::BufferUsages::COPY_DST;
        if self.contains(Self::VERTEX) {
            usage |= wgpu::BufferUsages::VERTEX;
        }
        if self.contains(Self::INDEX) {
            usage |= wgpu::BufferUsages::INDEX;
        }
        if self.contains(Self::UNIFORM) {
            usage |= wgpu::BufferUsages::UNIFORM;
        }
        if self.contains(Self::STORAGE) {
            usage |= wgpu::BufferUsages::STORAGE;
        }
        if self.contains(Self::READ) {
            usage |= wgpu::BufferUsages::COPY_SRC;
        }
        usage
    }

    /// Construction-time size alignment: uniform buffers round to 16 bytes,
    /// everything else to the 4-byte copy granularity.
    pub(crate) fn size_alignment(self) -> u64 {
        if self.contains(Self::UNIFORM) {
            16
        } else {
            4
        }
    }
}

/// What the buffer stores, beyond raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Plain,
    /// Array of fixed-stride elements (structured/storage view).
    Structured { stride: u32 },
    /// Index data with a fixed index format.
    Index { format: wgpu::IndexFormat },
}

/// A staged write: source slab region plus destination byte range.
#[derive(Debug, Clone)]
pub struct PendingBufferUpload {
    pub(crate) src: SlabAlloc,
    pub dst_offset: u64,
    pub size: u64,
}

impl PendingBufferUpload {
    fn range(&self) -> (u64, u64) {
        (self.dst_offset, self.dst_offset + self.size)
    }
}

/// Result of staging one sub-range write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubDataOutcome {
    /// The write was staged into the pending list.
    Staged,
    /// The write overlaps staged data the active pass is reading; the caller
    /// must flush and retry.
    NeedsFlush,
}

/// Decision for accumulating one more staged write into the pending list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SubDataPlan {
    /// No overlap with existing entries: append a new one.
    Append,
    /// An existing entry fully contains the new range: overwrite in place.
    Overwrite { index: usize },
    /// Merge the new range with the listed overlapping entries into their
    /// union; the merged entry replaces them.
    Merge { indices: Vec<usize>, union: (u64, u64) },
    /// The destination is being read by the active pass and the new write
    /// overlaps staged data; the pass must end (flushing the stale writes)
    /// before the write can be staged.
    ForceFlush,
}

/// Partition existing pending ranges against a new write and decide how to
/// accumulate it. `in_flight_read` is true when the buffer is bound for
/// reading in the currently-active pass.
pub(crate) fn plan_sub_data(
    pending: &[(u64, u64)],
    new: (u64, u64),
    in_flight_read: bool,
) -> SubDataPlan {
    let mut overlapping = Vec::new();
    for (i, range) in pending.iter().enumerate() {
        let overlaps = range.0 < new.1 && new.0 < range.1;
        if overlaps {
            overlapping.push(i);
        }
    }

    if overlapping.is_empty() {
        return SubDataPlan::Append;
    }

    if in_flight_read {
        // Merging while the pass consumes the stale staged bytes risks a
        // read-after-incomplete-write; the pass has to end first.
        return SubDataPlan::ForceFlush;
    }

    if overlapping.len() == 1 {
        let existing = pending[overlapping[0]];
        if existing.0 <= new.0 && new.1 <= existing.1 {
            return SubDataPlan::Overwrite {
                index: overlapping[0],
            };
        }
    }

    let mut lo = new.0;
    let mut hi = new.1;
    for &i in &overlapping {
        lo = lo.min(pending[i].0);
        hi = hi.max(pending[i].1);
    }
    SubDataPlan::Merge {
        indices: overlapping,
        union: (lo, hi),
    }
}

/// A GPU buffer with deferred sub-range uploads.
///
/// Byte length and alignment are fixed at construction; the buffer cannot
/// shrink or grow.
pub struct BufferResource {
    pub(crate) identity: Identity,
    pub(crate) size: u64,
    pub(crate) usage: BufferUsage,
    pub(crate) kind: BufferKind,
    /// Dynamic buffers keep their staging slabs alive across flush cycles;
    /// one-shot buffers purge them after each flush.
    pub(crate) dynamic: bool,
    pub(crate) native: Option<Arc<wgpu::Buffer>>,
    pub(crate) pending: Vec<PendingBufferUpload>,
    pub(crate) staging: StagingPool,
    pub(crate) mem_cost: u64,
}

impl BufferResource {
    pub(crate) fn new(size: u64, usage: BufferUsage, kind: BufferKind, dynamic: bool) -> Self {
        Self {
            identity: Identity::new(),
            size,
            usage,
            kind,
            dynamic,
            native: None,
            pending: Vec::new(),
            staging: StagingPool::new(StagingConfig::default()),
            mem_cost: 0,
        }
    }

    pub fn uid(&self) -> u64 {
        self.identity.uid
    }

    pub fn byte_length(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn is_disposed(&self) -> bool {
        self.native.is_none()
    }

    pub fn pending_upload_count(&self) -> usize {
        self.pending.len()
    }

    /// Allocate the native backing store. Returns the video-memory delta.
    pub(crate) fn allocate(&mut self, ctx: &GpuContext) -> i64 {
        if self.native.is_some() {
            return 0;
        }
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("helio buffer"),
            size: self.size,
            usage: self.usage.to_wgpu(),
            mapped_at_creation: false,
        });
        self.native = Some(Arc::new(buffer));
        self.mem_cost = self.size;
        self.mem_cost as i64
    }

    /// Drop the native handle. Idempotent: a second call is a no-op.
    pub(crate) fn dispose(&mut self) -> i64 {
        if self.native.take().is_none() {
            return 0;
        }
        self.pending.clear();
        self.staging.purge();
        let delta = -(self.mem_cost as i64);
        self.mem_cost = 0;
        delta
    }

    /// Recreate the native handle after a dispose or device loss. Contents
    /// are undefined until re-uploaded; `cid` records the reload.
    pub(crate) fn restore(&mut self, ctx: &GpuContext) -> i64 {
        if self.native.is_some() {
            return 0;
        }
        self.identity.bump();
        self.allocate(ctx)
    }

    /// Stage a sub-range write.
    ///
    /// `in_flight_read` reports whether the active pass has recorded a read
    /// of this buffer; the caller must end that pass and retry when
    /// `NeedsFlush` comes back.
    pub(crate) fn sub_data(
        &mut self,
        ctx: &GpuContext,
        dst_offset: u64,
        bytes: &[u8],
        in_flight_read: bool,
    ) -> Result<SubDataOutcome, StagingError> {
        let size = bytes.len() as u64;
        if dst_offset % 4 != 0 || size % 4 != 0 {
            return Err(StagingError::Misaligned {
                offset: dst_offset,
                size,
            });
        }
        if dst_offset + size > self.size {
            return Err(StagingError::OutOfBounds {
                offset: dst_offset,
                size,
                resource_size: self.size,
            });
        }
        if size == 0 {
            return Ok(SubDataOutcome::Staged);
        }

        let ranges: Vec<(u64, u64)> = self.pending.iter().map(|p| p.range()).collect();
        match plan_sub_data(&ranges, (dst_offset, dst_offset + size), in_flight_read) {
            SubDataPlan::ForceFlush => Ok(SubDataOutcome::NeedsFlush),
            SubDataPlan::Append => {
                let src = self.staging.stage_bytes(&ctx.device, Some(bytes), size, true)?;
                self.pending.push(PendingBufferUpload {
                    src,
                    dst_offset,
                    size,
                });
                Ok(SubDataOutcome::Staged)
            }
            SubDataPlan::Overwrite { index } => {
                let entry = &self.pending[index];
                let offset_in_alloc = dst_offset - entry.dst_offset;
                entry.src.write(offset_in_alloc, bytes);
                Ok(SubDataOutcome::Staged)
            }
            SubDataPlan::Merge { indices, union } => {
                let union_size = union.1 - union.0;
                let merged = self
                    .staging
                    .stage_bytes(&ctx.device, None, union_size, true)?;

                // Preserve previously staged bytes at their union positions,
                // then overlay the new write (last write wins).
                let mut scratch = vec![0u8; union_size as usize];
                for &i in &indices {
                    let entry = &self.pending[i];
                    let lo = (entry.dst_offset - union.0) as usize;
                    entry
                        .src
                        .read(0, &mut scratch[lo..lo + entry.size as usize]);
                }
                let lo = (dst_offset - union.0) as usize;
                scratch[lo..lo + bytes.len()].copy_from_slice(bytes);
                merged.write(0, &scratch);

                // Rebuild the pending list without the merged entries.
                let mut keep = Vec::with_capacity(self.pending.len() + 1 - indices.len());
                for (i, entry) in self.pending.drain(..).enumerate() {
                    if !indices.contains(&i) {
                        keep.push(entry);
                    }
                }
                keep.push(PendingBufferUpload {
                    src: merged,
                    dst_offset: union.0,
                    size: union_size,
                });
                self.pending = keep;
                Ok(SubDataOutcome::Staged)
            }
        }
    }

    /// Discard queued writes without ever copying them.
    ///
    /// Valid only before the corresponding flush; the staged slab regions
    /// are reclaimed on the pool's next cycle.
    pub(crate) fn clear_pending_uploads(&mut self) {
        self.pending.clear();
        self.staging.begin_uploads();
        self.staging.end_uploads();
    }

    /// Consume the pending list into copy commands and unmap the staging
    /// slabs so the copies can be submitted.
    pub(crate) fn begin_sync_changes(&mut self, out: &mut Vec<SyncCopy>) {
        if self.pending.is_empty() {
            return;
        }
        let Some(native) = self.native.as_ref() else {
            self.pending.clear();
            return;
        };
        for upload in self.pending.drain(..) {
            out.push(SyncCopy {
                src: Arc::clone(&upload.src.buffer),
                src_offset: upload.src.offset,
                size: upload.size,
                dst: CopyDst::Buffer {
                    buffer: Arc::clone(native),
                    offset: upload.dst_offset,
                },
            });
        }
        self.staging.begin_uploads();
    }

    /// Retire or recycle the staging slabs after the copies were submitted.
    pub(crate) fn end_sync_changes(&mut self) {
        if self.dynamic {
            self.staging.end_uploads();
        } else {
            self.staging.purge();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_writes_append() {
        assert_eq!(plan_sub_data(&[(0, 16)], (32, 48), false), SubDataPlan::Append);
        assert_eq!(plan_sub_data(&[], (0, 16), false), SubDataPlan::Append);
        // Touching ranges do not overlap.
        assert_eq!(plan_sub_data(&[(0, 16)], (16, 32), false), SubDataPlan::Append);
    }

    #[test]
    fn contained_write_overwrites_in_place() {
        assert_eq!(
            plan_sub_data(&[(0, 64)], (16, 32), false),
            SubDataPlan::Overwrite { index: 0 }
        );
        // Exact match is also contained.
        assert_eq!(
            plan_sub_data(&[(0, 64)], (0, 64), false),
            SubDataPlan::Overwrite { index: 0 }
        );
    }

    #[test]
    fn partial_overlap_merges_to_union() {
        assert_eq!(
            plan_sub_data(&[(0, 32)], (16, 64), false),
            SubDataPlan::Merge {
                indices: vec![0],
                union: (0, 64)
            }
        );
    }

    #[test]
    fn merge_spans_all_overlapping_entries() {
        assert_eq!(
            plan_sub_data(&[(0, 16), (32, 48), (100, 104)], (8, 40), false),
            SubDataPlan::Merge {
                indices: vec![0, 1],
                union: (0, 48)
            }
        );
    }

    #[test]
    fn overlap_with_in_flight_read_forces_flush() {
        assert_eq!(
            plan_sub_data(&[(0, 32)], (16, 64), true),
            SubDataPlan::ForceFlush
        );
        // Disjoint writes never force a flush, even mid-pass.
        assert_eq!(plan_sub_data(&[(0, 16)], (32, 48), true), SubDataPlan::Append);
    }

    #[test]
    fn usage_maps_to_native_flags() {
        let usage = BufferUsage::UNIFORM | BufferUsage::READ;
        let native = usage.to_wgpu();
        assert!(native.contains(wgpu::BufferUsages::UNIFORM));
        assert!(native.contains(wgpu::BufferUsages::COPY_SRC));
        assert!(native.contains(wgpu::BufferUsages::COPY_DST));
        assert_eq!(usage.size_alignment(), 16);
        assert_eq!(BufferUsage::VERTEX.size_alignment(), 4);
    }
}
