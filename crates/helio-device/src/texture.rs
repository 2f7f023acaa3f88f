//! Texture resources: allocation, deferred uploads, view cache.

use std::collections::HashMap;
use std::sync::Arc;

use helio_gpu::format::{format_info, FormatInfo};
use helio_gpu::sampler_cache::SamplerKey;
use helio_gpu::{GpuContext, SlabAlloc, StagingConfig, StagingError, StagingPool};

use crate::object::Identity;
use crate::pass::{CopyDst, SyncCopy};
use crate::retire::{RetiredHandle, RetirementQueue};

/// Shape of a texture resource. Matching is exhaustive everywhere; adding a
/// kind is a compile-visible change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    D2Array,
    D3,
    Cube,
    /// Per-frame updated 2D color texture; never mipmapped.
    Video,
}

impl TextureKind {
    fn dimension(self) -> wgpu::TextureDimension {
        match self {
            TextureKind::D2 | TextureKind::D2Array | TextureKind::Cube | TextureKind::Video => {
                wgpu::TextureDimension::D2
            }
            TextureKind::D3 => wgpu::TextureDimension::D3,
        }
    }

    fn view_dimension(self) -> wgpu::TextureViewDimension {
        match self {
            TextureKind::D2 | TextureKind::Video => wgpu::TextureViewDimension::D2,
            TextureKind::D2Array => wgpu::TextureViewDimension::D2Array,
            TextureKind::D3 => wgpu::TextureViewDimension::D3,
            TextureKind::Cube => wgpu::TextureViewDimension::Cube,
        }
    }

    pub fn face_count(self) -> u32 {
        match self {
            TextureKind::Cube => 6,
            _ => 1,
        }
    }
}

/// Full mip chain length for a `width` x `height` level 0.
pub(crate) fn auto_mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Resolve a requested mip count against the kind/format/size rules:
/// 3D, video and depth/stencil textures always get 1; a request of 0 means
/// the full chain; explicit requests are clamped to the full chain.
pub(crate) fn effective_mip_level_count(
    kind: TextureKind,
    info: FormatInfo,
    width: u32,
    height: u32,
    requested: u32,
) -> u32 {
    if matches!(kind, TextureKind::D3 | TextureKind::Video) || info.is_depth_stencil() {
        return 1;
    }
    let max = auto_mip_level_count(width, height);
    if requested == 0 {
        max
    } else {
        requested.min(max)
    }
}

/// Copy `rows` rows of `row_bytes` from `src` (stride `src_stride`) into a
/// staged region at stride `dst_stride`. Used to repack tight CPU rows to the
/// 256-byte-aligned stride buffer-to-texture copies require.
pub(crate) fn repack_rows(
    dst: &SlabAlloc,
    src: &[u8],
    src_stride: usize,
    row_bytes: usize,
    rows: usize,
    dst_stride: usize,
) {
    for row in 0..rows {
        let lo = row * src_stride;
        dst.write(
            (row * dst_stride) as u64,
            &src[lo..lo + row_bytes],
        );
    }
}

/// A staged texture write awaiting its buffer-to-texture copy.
pub(crate) struct PendingTextureUpload {
    pub src: SlabAlloc,
    pub bytes_per_row: u32,
    pub rows_per_image: u32,
    pub mip_level: u32,
    pub origin: wgpu::Origin3d,
    pub extent: wgpu::Extent3d,
}

/// How an `upload_raw` call landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Written through `queue.write_texture` immediately.
    Immediate,
    /// Staged; the device upload set must flush it before the next read.
    Deferred,
}

pub struct TextureResource {
    pub(crate) identity: Identity,
    pub(crate) kind: TextureKind,
    pub(crate) format: wgpu::TextureFormat,
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// Depth for 3D, array layers for arrays/cubes, 1 otherwise.
    pub(crate) depth_or_layers: u32,
    pub(crate) mip_level_count: u32,
    pub(crate) render_target: bool,
    pub(crate) native: Option<Arc<wgpu::Texture>>,
    /// Keyed by (face, base mip, mip count). Cleared whenever the native
    /// handle changes so no view outlives its texture.
    views: HashMap<(u32, u32, u32), Arc<wgpu::TextureView>>,
    pub(crate) pending: Vec<PendingTextureUpload>,
    pub(crate) staging: StagingPool,
    pub(crate) mem_cost: u64,
    /// Levels above 0 are stale relative to level 0.
    pub(crate) mipmap_dirty: bool,
    /// Sampler auto-bound alongside this texture when the layout declares a
    /// companion sampler and none is set explicitly.
    pub(crate) default_sampler: SamplerKey,
}

impl TextureResource {
    pub(crate) fn new(kind: TextureKind, format: wgpu::TextureFormat) -> Self {
        Self {
            identity: Identity::new(),
            kind,
            format,
            width: 0,
            height: 0,
            depth_or_layers: 1,
            mip_level_count: 1,
            render_target: false,
            native: None,
            views: HashMap::new(),
            pending: Vec::new(),
            staging: StagingPool::new(StagingConfig {
                label: Some("helio texture staging"),
                ..StagingConfig::default()
            }),
            mem_cost: 0,
            mipmap_dirty: false,
            default_sampler: SamplerKey::default(),
        }
    }

    pub fn uid(&self) -> u64 {
        self.identity.uid
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn size(&self) -> (u32, u32, u32) {
        (self.width, self.height, self.depth_or_layers)
    }

    pub fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }

    pub fn is_disposed(&self) -> bool {
        self.native.is_none()
    }

    pub fn pending_upload_count(&self) -> usize {
        self.pending.len()
    }

    fn info(&self) -> FormatInfo {
        format_info(self.format)
    }

    fn bytes_for_chain(&self) -> u64 {
        let info = self.info();
        let mut total = 0u64;
        for level in 0..self.mip_level_count {
            let w = (self.width >> level).max(1);
            let h = (self.height >> level).max(1);
            let d = match self.kind {
                TextureKind::D3 => (self.depth_or_layers >> level).max(1),
                _ => self.depth_or_layers * self.kind.face_count(),
            };
            total += info.unpadded_bytes_per_row(w) as u64
                * info.block_rows(h) as u64
                * d as u64;
        }
        total
    }

    fn native_usage(&self) -> wgpu::TextureUsages {
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;
        if self.render_target || self.mip_level_count > 1 {
            // Mip regeneration renders into each level.
            if !self.info().is_compressed() {
                usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
            }
        }
        if self.render_target {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        usage
    }

    /// (Re)allocate native storage. Size/format/mip changes retire the old
    /// handle through the frame retirement queue rather than destroying it,
    /// since an in-flight frame may still reference it. Returns the
    /// video-memory delta.
    pub(crate) fn alloc_internal(
        &mut self,
        ctx: &GpuContext,
        retirement: &mut RetirementQueue,
        frame: u64,
        width: u32,
        height: u32,
        depth_or_layers: u32,
        requested_mips: u32,
        render_target: bool,
    ) -> Result<i64, StagingError> {
        if width == 0 || height == 0 || depth_or_layers == 0 {
            return Err(StagingError::InvalidConfig("zero-sized texture allocation"));
        }
        let info = format_info(self.format);
        let mips = effective_mip_level_count(self.kind, info, width, height, requested_mips);

        let unchanged = self.native.is_some()
            && self.width == width
            && self.height == height
            && self.depth_or_layers == depth_or_layers
            && self.mip_level_count == mips
            && self.render_target == render_target;
        if unchanged {
            return Ok(0);
        }

        let mut delta = 0i64;
        if let Some(old) = self.native.take() {
            retirement.push(frame, RetiredHandle::Texture(old));
            self.views.clear();
            self.pending.clear();
            delta -= self.mem_cost as i64;
            self.identity.bump();
        }

        self.width = width;
        self.height = height;
        self.depth_or_layers = depth_or_layers;
        self.mip_level_count = mips;
        self.render_target = render_target;
        self.mipmap_dirty = false;

        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("helio texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: match self.kind {
                    TextureKind::D3 => depth_or_layers,
                    TextureKind::Cube => 6 * depth_or_layers,
                    _ => depth_or_layers,
                },
            },
            mip_level_count: mips,
            sample_count: 1,
            dimension: self.kind.dimension(),
            format: self.format,
            usage: self.native_usage(),
            view_formats: &[],
        });
        self.native = Some(Arc::new(texture));
        self.mem_cost = self.bytes_for_chain();
        delta += self.mem_cost as i64;
        Ok(delta)
    }

    /// Drop the native handle through the retirement queue. Idempotent.
    pub(crate) fn dispose(&mut self, retirement: &mut RetirementQueue, frame: u64) -> i64 {
        let Some(old) = self.native.take() else {
            return 0;
        };
        retirement.push(frame, RetiredHandle::Texture(old));
        self.views.clear();
        self.pending.clear();
        self.staging.purge();
        self.mipmap_dirty = false;
        let delta = -(self.mem_cost as i64);
        self.mem_cost = 0;
        delta
    }

    /// Recreate native storage after dispose or device loss. Contents are
    /// undefined until re-uploaded.
    pub(crate) fn restore(
        &mut self,
        ctx: &GpuContext,
        retirement: &mut RetirementQueue,
        frame: u64,
    ) -> Result<i64, StagingError> {
        if self.native.is_some() || self.width == 0 {
            return Ok(0);
        }
        self.alloc_internal(
            ctx,
            retirement,
            frame,
            self.width,
            self.height,
            self.depth_or_layers,
            self.mip_level_count,
            self.render_target,
        )
    }

    /// Upload pixel data into one mip region.
    ///
    /// When the texture is not read by an in-flight pass the bytes go through
    /// `queue.write_texture` immediately. Otherwise rows are repacked into a
    /// 256-byte-aligned staging region and queued; the caller registers the
    /// texture in the device upload set so the copy lands before the next
    /// read. `data` holds tightly packed rows (block rows for compressed
    /// formats).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn upload_raw(
        &mut self,
        ctx: &GpuContext,
        mip_level: u32,
        origin: wgpu::Origin3d,
        extent: wgpu::Extent3d,
        data: &[u8],
        in_flight_read: bool,
    ) -> Result<UploadOutcome, StagingError> {
        if self.native.is_none() {
            return Err(StagingError::InvalidConfig("upload to a disposed texture"));
        }
        if mip_level >= self.mip_level_count {
            return Err(StagingError::OutOfBounds {
                offset: mip_level as u64,
                size: 1,
                resource_size: self.mip_level_count as u64,
            });
        }
        let info = self.info();
        let row_bytes = info.unpadded_bytes_per_row(extent.width) as usize;
        let rows = info.block_rows(extent.height) as usize * extent.depth_or_array_layers as usize;
        let expected = row_bytes * rows;
        if data.len() != expected {
            return Err(StagingError::OutOfBounds {
                offset: 0,
                size: data.len() as u64,
                resource_size: expected as u64,
            });
        }

        if mip_level == 0 && self.mip_level_count > 1 {
            self.mipmap_dirty = true;
        }

        if !in_flight_read {
            let native = self.native.as_ref().unwrap();
            ctx.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: native,
                    mip_level,
                    origin,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(row_bytes as u32),
                    rows_per_image: Some(info.block_rows(extent.height)),
                },
                extent,
            );
            return Ok(UploadOutcome::Immediate);
        }

        let padded = info.padded_bytes_per_row(extent.width) as usize;
        let staged = self
            .staging
            .stage_bytes(&ctx.device, None, (padded * rows) as u64, false)?;
        repack_rows(&staged, data, row_bytes, row_bytes, rows, padded);
        self.pending.push(PendingTextureUpload {
            src: staged,
            bytes_per_row: padded as u32,
            rows_per_image: info.block_rows(extent.height),
            mip_level,
            origin,
            extent,
        });
        Ok(UploadOutcome::Deferred)
    }

    /// Fetch (and cache) a view over `mip_count` levels starting at `level`
    /// for one face/layer. `face` selects a cube face or array layer; pass 0
    /// for 2D/3D. A `mip_count` of 0 means all remaining levels.
    pub(crate) fn get_view(
        &mut self,
        face: u32,
        level: u32,
        mip_count: u32,
    ) -> Option<Arc<wgpu::TextureView>> {
        let native = self.native.as_ref()?;
        let key = (face, level, mip_count);
        if let Some(view) = self.views.get(&key) {
            return Some(Arc::clone(view));
        }
        let whole = face == 0 && level == 0 && mip_count == 0;
        let view = native.create_view(&wgpu::TextureViewDescriptor {
            label: Some("helio texture view"),
            format: None,
            dimension: if whole {
                Some(self.kind.view_dimension())
            } else {
                Some(wgpu::TextureViewDimension::D2)
            },
            aspect: wgpu::TextureAspect::All,
            base_mip_level: level,
            mip_level_count: if mip_count == 0 { None } else { Some(mip_count) },
            base_array_layer: if whole { 0 } else { face },
            array_layer_count: if whole { None } else { Some(1) },
        });
        let view = Arc::new(view);
        self.views.insert(key, Arc::clone(&view));
        Some(view)
    }

    /// The view bind groups sample through: all faces, all levels.
    pub(crate) fn default_view(&mut self) -> Option<Arc<wgpu::TextureView>> {
        self.get_view(0, 0, 0)
    }

    /// Consume pending uploads into copy commands and unmap staging slabs.
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
                size: upload.src.size,
                dst: CopyDst::Texture {
                    texture: Arc::clone(native),
                    mip_level: upload.mip_level,
                    origin: upload.origin,
                    extent: upload.extent,
                    bytes_per_row: upload.bytes_per_row,
                    rows_per_image: upload.rows_per_image,
                },
            });
        }
        self.staging.begin_uploads();
    }

    /// Recycle staging slabs after the copies were submitted. Video textures
    /// are re-uploaded every frame so their slabs stay pooled; everything
    /// else purges.
    pub(crate) fn end_sync_changes(&mut self) {
        if matches!(self.kind, TextureKind::Video) {
            self.staging.end_uploads();
        } else {
            self.staging.purge();
        }
    }

    /// Encode a copy of one mip's pixels into a freshly created readback
    /// buffer. Rows in the returned buffer are padded to
    /// `COPY_BYTES_PER_ROW_ALIGNMENT`; the caller tightens them after
    /// mapping.
    pub(crate) fn copy_pixels_to_buffer(
        &self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        face: u32,
        mip_level: u32,
    ) -> Option<ReadbackPlan> {
        let native = self.native.as_ref()?;
        let info = self.info();
        let w = (self.width >> mip_level).max(1);
        let h = (self.height >> mip_level).max(1);
        let padded = info.padded_bytes_per_row(w);
        let unpadded = info.unpadded_bytes_per_row(w);
        let rows = info.block_rows(h);
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("helio readback"),
            size: padded as u64 * rows as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: native,
                mip_level,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: face,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(rows),
                },
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );
        Some(ReadbackPlan {
            buffer: Arc::new(buffer),
            padded_bytes_per_row: padded,
            unpadded_bytes_per_row: unpadded,
            rows,
        })
    }
}

/// A texture readback in flight: a mapped-readable buffer plus the row
/// strides needed to tighten the padded rows.
pub(crate) struct ReadbackPlan {
    pub buffer: Arc<wgpu::Buffer>,
    pub padded_bytes_per_row: u32,
    pub unpadded_bytes_per_row: u32,
    pub rows: u32,
}

impl ReadbackPlan {
    /// Strip row padding out of the mapped bytes.
    pub fn tighten(&self, mapped: &[u8]) -> Vec<u8> {
        tighten_rows(
            mapped,
            self.padded_bytes_per_row,
            self.unpadded_bytes_per_row,
            self.rows,
        )
    }
}

pub(crate) fn tighten_rows(mapped: &[u8], padded: u32, unpadded: u32, rows: u32) -> Vec<u8> {
    if padded == unpadded {
        return mapped.to_vec();
    }
    let mut out = Vec::with_capacity(unpadded as usize * rows as usize);
    for row in 0..rows as usize {
        let lo = row * padded as usize;
        out.extend_from_slice(&mapped[lo..lo + unpadded as usize]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_mip_counts() {
        assert_eq!(auto_mip_level_count(1, 1), 1);
        assert_eq!(auto_mip_level_count(2, 2), 2);
        assert_eq!(auto_mip_level_count(256, 256), 9);
        assert_eq!(auto_mip_level_count(256, 64), 9);
        assert_eq!(auto_mip_level_count(300, 200), 9);
    }

    #[test]
    fn effective_mips_respect_kind_and_format() {
        let color = format_info(wgpu::TextureFormat::Rgba8Unorm);
        let depth = format_info(wgpu::TextureFormat::Depth32Float);
        // 0 requests the full chain.
        assert_eq!(
            effective_mip_level_count(TextureKind::D2, color, 256, 256, 0),
            9
        );
        // Explicit counts clamp to the chain length.
        assert_eq!(
            effective_mip_level_count(TextureKind::D2, color, 256, 256, 4),
            4
        );
        assert_eq!(
            effective_mip_level_count(TextureKind::D2, color, 256, 256, 99),
            9
        );
        // 3D, video and depth formats never mip.
        assert_eq!(
            effective_mip_level_count(TextureKind::D3, color, 256, 256, 0),
            1
        );
        assert_eq!(
            effective_mip_level_count(TextureKind::Video, color, 256, 256, 0),
            1
        );
        assert_eq!(
            effective_mip_level_count(TextureKind::D2, depth, 256, 256, 0),
            1
        );
    }

    #[test]
    fn cube_faces() {
        assert_eq!(TextureKind::Cube.face_count(), 6);
        assert_eq!(TextureKind::D2.face_count(), 1);
    }

    #[test]
    fn readback_tighten_strips_padding() {
        let mapped = [1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8, 0, 0, 0, 0];
        assert_eq!(tighten_rows(&mapped, 8, 4, 2), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        // Tight rows pass through unchanged.
        assert_eq!(tighten_rows(&mapped[..8], 4, 4, 2), mapped[..8].to_vec());
    }
}
