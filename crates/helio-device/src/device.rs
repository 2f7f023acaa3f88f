//! The device façade: resource registries, draw-time state, and the
//! immediate-mode submission front end.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use helio_gpu::format::format_info;
use helio_gpu::pipeline_key::{ComputePipelineKey, PipelineLayoutKey, RenderPipelineKey};
use helio_gpu::pipeline_cache::{ComputePipelineDesc, RenderPipelineDesc};
use helio_gpu::sampler_cache::SamplerKey;
use helio_gpu::stats::{FrameStats, UploadStats};
use helio_gpu::{GpuCapabilities, GpuContext, StagingError};
use tracing::warn;

use crate::bind_group::{BindGroupResource, BindingDesc};
use crate::buffer::{BufferKind, BufferResource, BufferUsage, SubDataOutcome};
use crate::framebuffer::{AttachmentTarget, FramebufferInfo, FramebufferResource};
use crate::mipmap::MipmapGenerator;
use crate::object::{
    BindGroupId, BufferId, FramebufferId, ProgramId, SamplerId, TextureId, VertexLayoutId,
};
use crate::pass::{
    validate_resources, ComputeCmd, DrawValidation, RenderCmd, RenderPassTarget, ResourceCheck,
};
use crate::program::{ProgramEntryPoints, ProgramResource};
use crate::queue::{CaptureBundle, CommandQueue, DeviceCommand};
use crate::render_state::RenderStateSet;
use crate::retire::RetirementQueue;
use crate::texture::{TextureKind, TextureResource, UploadOutcome};
use crate::vertex_layout::{VertexBufferDesc, VertexLayoutResource};

/// Bind group slots addressable per draw.
pub const MAX_BIND_GROUPS: usize = 4;
/// Vertex buffer slots addressable per draw.
pub const MAX_VERTEX_BUFFERS: usize = 8;

pub(crate) fn env_var_truthy(name: &str) -> bool {
    let Ok(raw) = std::env::var(name) else {
        return false;
    };
    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

fn texture_compression_disabled() -> bool {
    env_var_truthy("HELIO_DISABLE_TEXTURE_COMPRESSION")
}

fn negotiated_features(adapter: &wgpu::Adapter) -> wgpu::Features {
    let available = adapter.features();
    let mut requested = wgpu::Features::empty();
    if !texture_compression_disabled()
        && available.contains(wgpu::Features::TEXTURE_COMPRESSION_BC)
    {
        requested |= wgpu::Features::TEXTURE_COMPRESSION_BC;
    }
    requested
}

#[derive(Default)]
pub(crate) struct Resources {
    pub buffers: HashMap<BufferId, BufferResource>,
    pub textures: HashMap<TextureId, TextureResource>,
    pub bind_groups: HashMap<BindGroupId, BindGroupResource>,
    pub framebuffers: HashMap<FramebufferId, FramebufferResource>,
    pub programs: HashMap<ProgramId, ProgramResource>,
    pub vertex_layouts: HashMap<VertexLayoutId, VertexLayoutResource>,
    pub samplers: HashMap<SamplerId, SamplerKey>,
}

/// Draw-time state set between submissions.
#[derive(Default)]
struct CurrentState {
    program: Option<ProgramId>,
    vertex_layout: Option<VertexLayoutId>,
    render_states: RenderStateSet,
    front_face_ccw: bool,
    bind_groups: [Option<BindGroupId>; MAX_BIND_GROUPS],
    framebuffer: Option<FramebufferId>,
    viewport: Option<[f32; 4]>,
    scissor: Option<[u32; 4]>,
    vertex_buffers: [Option<BufferId>; MAX_VERTEX_BUFFERS],
    index_buffer: Option<BufferId>,
}

/// Owns every GPU resource and the pass/queue machinery.
///
/// Single-threaded by design: all mutation happens on the owning call stack,
/// and the only asynchronous suspension points are slab remaps, explicit
/// readbacks and shader diagnostics.
pub struct Device {
    ctx: GpuContext,
    resources: Resources,
    cmd: CommandQueue,
    retirement: RetirementQueue,
    mipmaps: MipmapGenerator,
    current: CurrentState,
    frame_index: u64,
    video_memory: i64,
    upload_stats: UploadStats,
    lost: Arc<AtomicBool>,
    /// Resources whose staged copies were recorded into the active pass's
    /// pre-copy list; their slabs retire when that pass submits.
    inline_flushed_buffers: Vec<BufferId>,
    inline_flushed_textures: Vec<TextureId>,
}

impl Device {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, capabilities: GpuCapabilities) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            warn!(?reason, %message, "device lost");
            flag.store(true, Ordering::Relaxed);
        });
        Self {
            ctx: GpuContext::new(device, queue, capabilities),
            resources: Resources::default(),
            cmd: CommandQueue::default(),
            retirement: RetirementQueue::default(),
            mipmaps: MipmapGenerator::new(),
            current: CurrentState::default(),
            frame_index: 0,
            video_memory: 0,
            upload_stats: UploadStats::default(),
            lost,
            inline_flushed_buffers: Vec::new(),
            inline_flushed_textures: Vec::new(),
        }
    }

    /// Create a headless device suitable for CI.
    ///
    /// Prefers the fallback adapter (stable software rasterizer) and the GL
    /// backend on Linux, where some Vulkan software adapters crash.
    pub async fn new_headless(label: &str) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let needs_runtime_dir = std::env::var("XDG_RUNTIME_DIR")
                .ok()
                .map(|v| v.is_empty())
                .unwrap_or(true);
            if needs_runtime_dir {
                let dir =
                    std::env::temp_dir().join(format!("helio-xdg-runtime-{}", std::process::id()));
                let _ = std::fs::create_dir_all(&dir);
                let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
                std::env::set_var("XDG_RUNTIME_DIR", &dir);
            }
        }

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: if cfg!(target_os = "linux") {
                wgpu::Backends::GL
            } else {
                wgpu::Backends::PRIMARY
            },
            ..Default::default()
        });

        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: None,
                force_fallback_adapter: true,
            })
            .await
        {
            Some(adapter) => Some(adapter),
            None => {
                instance
                    .request_adapter(&wgpu::RequestAdapterOptions {
                        power_preference: wgpu::PowerPreference::LowPower,
                        compatible_surface: None,
                        force_fallback_adapter: false,
                    })
                    .await
            }
        }
        .ok_or_else(|| anyhow!("wgpu: no suitable adapter found"))?;

        let downlevel = adapter.get_downlevel_capabilities();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some(label),
                    required_features: negotiated_features(&adapter),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await
            .map_err(|e| anyhow!("wgpu: request_device failed: {e:?}"))?;

        let capabilities =
            GpuCapabilities::from_device(&device).with_downlevel_flags(downlevel.flags);
        Ok(Self::new(device, queue, capabilities))
    }

    pub fn new_for_tests() -> Result<Self> {
        pollster::block_on(Self::new_headless("helio test device"))
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn is_context_lost(&self) -> bool {
        self.lost.load(Ordering::Relaxed)
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn video_memory_cost(&self) -> i64 {
        self.video_memory
    }

    /// Adjust the tracked video-memory figure from an external budget policy.
    pub fn update_video_memory_cost(&mut self, delta: i64) {
        self.video_memory += delta;
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.cmd.stats
    }

    pub fn upload_stats(&self) -> UploadStats {
        self.upload_stats
    }

    // ---- factories ----

    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        dynamic: bool,
    ) -> Result<BufferId> {
        self.create_buffer_inner(size, usage, BufferKind::Plain, dynamic)
    }

    pub fn create_structured_buffer(
        &mut self,
        element_count: u64,
        stride: u32,
        usage: BufferUsage,
        dynamic: bool,
    ) -> Result<BufferId> {
        if stride == 0 {
            bail!("structured buffer stride must be nonzero");
        }
        self.create_buffer_inner(
            element_count * stride as u64,
            usage | BufferUsage::STORAGE,
            BufferKind::Structured { stride },
            dynamic,
        )
    }

    pub fn create_index_buffer(
        &mut self,
        index_count: u64,
        format: wgpu::IndexFormat,
        dynamic: bool,
    ) -> Result<BufferId> {
        let index_size = match format {
            wgpu::IndexFormat::Uint16 => 2,
            wgpu::IndexFormat::Uint32 => 4,
        };
        self.create_buffer_inner(
            index_count * index_size,
            BufferUsage::INDEX | BufferUsage::WRITE,
            BufferKind::Index { format },
            dynamic,
        )
    }

    fn create_buffer_inner(
        &mut self,
        size: u64,
        usage: BufferUsage,
        kind: BufferKind,
        dynamic: bool,
    ) -> Result<BufferId> {
        if size == 0 {
            bail!("buffer size must be nonzero");
        }
        if size > self.ctx.capabilities.max_buffer_size {
            return Err(staging_err(StagingError::AllocationTooLarge {
                requested: size,
                max: self.ctx.capabilities.max_buffer_size,
            }));
        }
        let size = helio_gpu::align_up(size, usage.size_alignment());
        let mut buffer = BufferResource::new(size, usage, kind, dynamic);
        if !self.is_context_lost() {
            self.video_memory += buffer.allocate(&self.ctx);
        }
        let id = BufferId(buffer.uid());
        self.resources.buffers.insert(id, buffer);
        Ok(id)
    }

    pub fn create_texture_2d(
        &mut self,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        mip_levels: u32,
        render_target: bool,
    ) -> Result<TextureId> {
        self.create_texture_inner(TextureKind::D2, format, width, height, 1, mip_levels, render_target)
    }

    pub fn create_texture_2d_array(
        &mut self,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        layers: u32,
        mip_levels: u32,
        render_target: bool,
    ) -> Result<TextureId> {
        self.create_texture_inner(
            TextureKind::D2Array,
            format,
            width,
            height,
            layers,
            mip_levels,
            render_target,
        )
    }

    pub fn create_texture_3d(
        &mut self,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<TextureId> {
        self.create_texture_inner(TextureKind::D3, format, width, height, depth, 1, false)
    }

    pub fn create_texture_cube(
        &mut self,
        format: wgpu::TextureFormat,
        size: u32,
        mip_levels: u32,
        render_target: bool,
    ) -> Result<TextureId> {
        self.create_texture_inner(TextureKind::Cube, format, size, size, 1, mip_levels, render_target)
    }

    pub fn create_texture_video(
        &mut self,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Result<TextureId> {
        self.create_texture_inner(TextureKind::Video, format, width, height, 1, 1, false)
    }

    #[allow(clippy::too_many_arguments)]
    fn create_texture_inner(
        &mut self,
        kind: TextureKind,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        depth_or_layers: u32,
        mip_levels: u32,
        render_target: bool,
    ) -> Result<TextureId> {
        let max = match kind {
            TextureKind::D3 => self.ctx.capabilities.max_texture_dimension_3d,
            _ => self.ctx.capabilities.max_texture_dimension_2d,
        };
        if width > max || height > max {
            bail!("texture dimensions {width}x{height} exceed device maximum {max}");
        }
        let mut texture = TextureResource::new(kind, format);
        if !self.is_context_lost() {
            let delta = texture
                .alloc_internal(
                    &self.ctx,
                    &mut self.retirement,
                    self.frame_index,
                    width,
                    height,
                    depth_or_layers,
                    mip_levels,
                    render_target,
                )
                .map_err(staging_err)?;
            self.video_memory += delta;
        }
        let id = TextureId(texture.uid());
        self.resources.textures.insert(id, texture);
        Ok(id)
    }

    pub fn create_vertex_layout(&mut self, buffers: Vec<VertexBufferDesc>) -> VertexLayoutId {
        let layout = VertexLayoutResource::new(buffers);
        let id = VertexLayoutId(layout.uid());
        self.resources.vertex_layouts.insert(id, layout);
        id
    }

    pub fn create_framebuffer(&mut self, color_slots: usize) -> FramebufferId {
        let fb = FramebufferResource::new(color_slots);
        let id = FramebufferId(fb.uid());
        self.resources.framebuffers.insert(id, fb);
        id
    }

    pub fn create_sampler(&mut self, key: SamplerKey) -> Result<SamplerId> {
        if !key.filters_valid() {
            bail!("anisotropic sampling requires linear filters");
        }
        let id = SamplerId(crate::object::next_uid());
        self.resources.samplers.insert(id, key);
        Ok(id)
    }

    pub fn create_bind_group(
        &mut self,
        entries: Vec<BindingDesc>,
        name_remap: HashMap<String, String>,
    ) -> BindGroupId {
        let group = BindGroupResource::new(entries, name_remap);
        let id = BindGroupId(group.uid());
        self.resources.bind_groups.insert(id, group);
        id
    }

    pub fn create_program(
        &mut self,
        source: &str,
        entry_points: ProgramEntryPoints,
        attributes: Vec<(String, u32)>,
    ) -> ProgramId {
        let program = ProgramResource::new(&self.ctx, source, entry_points, attributes);
        let id = ProgramId(program.uid());
        self.resources.programs.insert(id, program);
        id
    }

    /// Validation diagnostics captured when the program's module was
    /// created. Empty when compilation reported no errors.
    pub fn program_compile_error(&self, id: ProgramId) -> Option<&str> {
        self.resources.programs.get(&id).map(|p| p.compile_error())
    }

    // ---- buffer operations ----

    /// Stage a sub-range write into a buffer.
    ///
    /// Misaligned offsets/sizes are hard errors. A write overlapping staged
    /// data while the buffer is read by the active pass forces that pass to
    /// end first; the write then restages cleanly.
    pub fn buffer_sub_data(&mut self, id: BufferId, dst_offset: u64, bytes: &[u8]) -> Result<()> {
        if self.is_context_lost() {
            return Ok(());
        }
        let in_flight = self.cmd.render.is_reading_buffer(id.uid())
            || self.cmd.compute.is_reading_buffer(id.uid());
        let buffer = self
            .resources
            .buffers
            .get_mut(&id)
            .context("unknown buffer")?;
        match buffer
            .sub_data(&self.ctx, dst_offset, bytes, in_flight)
            .map_err(staging_err)?
        {
            SubDataOutcome::Staged => {
                self.upload_stats.bytes_staged += bytes.len() as u64;
                self.cmd.register_buffer_upload(id, in_flight);
            }
            SubDataOutcome::NeedsFlush => {
                self.upload_stats.forced_flushes += 1;
                self.flush_uploads();
                let buffer = self
                    .resources
                    .buffers
                    .get_mut(&id)
                    .context("unknown buffer")?;
                buffer
                    .sub_data(&self.ctx, dst_offset, bytes, false)
                    .map_err(staging_err)?;
                self.upload_stats.bytes_staged += bytes.len() as u64;
                self.cmd.register_buffer_upload(id, false);
            }
        }
        Ok(())
    }

    /// Blocking readback of a buffer sub-range.
    ///
    /// Forces any pending writes to land first, then maps a readback copy.
    /// Not cancellable once issued.
    pub fn get_buffer_sub_data(&mut self, id: BufferId, offset: u64, size: u64) -> Result<Vec<u8>> {
        if self.is_context_lost() {
            bail!("device lost");
        }
        self.flush_all();

        let buffer = self.resources.buffers.get(&id).context("unknown buffer")?;
        if offset + size > buffer.byte_length() {
            bail!(
                "read of {size} bytes at {offset} exceeds buffer length {}",
                buffer.byte_length()
            );
        }
        let native = buffer.native.clone().context("buffer is disposed")?;

        let readback = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("helio readback"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("helio readback"),
            });
        encoder.copy_buffer_to_buffer(&native, offset, &readback, 0, size);
        self.ctx.queue.submit(Some(encoder.finish()));
        self.block_on_map_read(&readback)
    }

    /// Discard a buffer's staged writes without copying them.
    pub fn clear_pending_uploads(&mut self, id: BufferId) {
        if let Some(buffer) = self.resources.buffers.get_mut(&id) {
            buffer.clear_pending_uploads();
        }
        self.cmd.buffer_uploads.remove(&id);
        self.cmd.deferred_buffer_uploads.remove(&id);
    }

    pub fn buffer_pending_uploads(&self, id: BufferId) -> usize {
        self.resources
            .buffers
            .get(&id)
            .map_or(0, BufferResource::pending_upload_count)
    }

    pub fn buffer_staging_slab_count(&self, id: BufferId) -> usize {
        self.resources
            .buffers
            .get(&id)
            .map_or(0, |b| b.staging.slab_count())
    }

    /// Idempotent: a second dispose is a no-op.
    pub fn dispose_buffer(&mut self, id: BufferId) {
        if let Some(buffer) = self.resources.buffers.get_mut(&id) {
            self.video_memory += buffer.dispose();
        }
        self.cmd.buffer_uploads.remove(&id);
        self.cmd.deferred_buffer_uploads.remove(&id);
    }

    pub fn buffer_is_disposed(&self, id: BufferId) -> bool {
        self.resources
            .buffers
            .get(&id)
            .map_or(true, BufferResource::is_disposed)
    }

    /// Recreate a disposed buffer's native storage (contents undefined).
    pub fn restore_buffer(&mut self, id: BufferId) {
        if self.is_context_lost() {
            return;
        }
        if let Some(buffer) = self.resources.buffers.get_mut(&id) {
            self.video_memory += buffer.restore(&self.ctx);
        }
    }

    // ---- texture operations ----

    /// Upload pixel data into one mip region of a texture.
    pub fn update_texture(
        &mut self,
        id: TextureId,
        mip_level: u32,
        origin: wgpu::Origin3d,
        extent: wgpu::Extent3d,
        data: &[u8],
    ) -> Result<UploadOutcome> {
        if self.is_context_lost() {
            return Ok(UploadOutcome::Immediate);
        }
        let in_flight = self.cmd.render.is_reading_texture(id.uid())
            || self.cmd.compute.is_reading_texture(id.uid());
        let texture = self
            .resources
            .textures
            .get_mut(&id)
            .context("unknown texture")?;
        let outcome = texture
            .upload_raw(&self.ctx, mip_level, origin, extent, data, in_flight)
            .map_err(staging_err)?;
        match outcome {
            UploadOutcome::Immediate => self.upload_stats.bytes_immediate += data.len() as u64,
            UploadOutcome::Deferred => {
                self.upload_stats.bytes_staged += data.len() as u64;
                self.cmd.register_texture_upload(id, in_flight);
            }
        }
        Ok(outcome)
    }

    pub fn texture_pending_uploads(&self, id: TextureId) -> usize {
        self.resources
            .textures
            .get(&id)
            .map_or(0, TextureResource::pending_upload_count)
    }

    pub fn texture_mip_level_count(&self, id: TextureId) -> Option<u32> {
        self.resources.textures.get(&id).map(TextureResource::mip_level_count)
    }

    pub fn texture_is_disposed(&self, id: TextureId) -> bool {
        self.resources
            .textures
            .get(&id)
            .map_or(true, TextureResource::is_disposed)
    }

    pub fn set_texture_default_sampler(&mut self, id: TextureId, sampler: SamplerId) {
        let Some(key) = self.resources.samplers.get(&sampler).copied() else {
            return;
        };
        if let Some(texture) = self.resources.textures.get_mut(&id) {
            texture.default_sampler = key;
        }
    }

    /// Idempotent: a second dispose is a no-op.
    pub fn dispose_texture(&mut self, id: TextureId) {
        if let Some(texture) = self.resources.textures.get_mut(&id) {
            self.video_memory += texture.dispose(&mut self.retirement, self.frame_index);
        }
        self.cmd.texture_uploads.remove(&id);
        self.cmd.deferred_texture_uploads.remove(&id);
    }

    /// Recreate a disposed texture's native storage (contents undefined).
    pub fn restore_texture(&mut self, id: TextureId) -> Result<()> {
        if self.is_context_lost() {
            return Ok(());
        }
        if let Some(texture) = self.resources.textures.get_mut(&id) {
            let delta = texture
                .restore(&self.ctx, &mut self.retirement, self.frame_index)
                .map_err(staging_err)?;
            self.video_memory += delta;
        }
        Ok(())
    }

    // ---- framebuffer / bind group wrappers ----

    pub fn framebuffer_set_color(
        &mut self,
        id: FramebufferId,
        slot: usize,
        target: Option<AttachmentTarget>,
    ) {
        if let Some(fb) = self.resources.framebuffers.get_mut(&id) {
            fb.set_color_attachment(slot, target);
        }
    }

    pub fn framebuffer_set_depth(&mut self, id: FramebufferId, target: Option<AttachmentTarget>) {
        if let Some(fb) = self.resources.framebuffers.get_mut(&id) {
            fb.set_depth_attachment(target);
        }
    }

    pub fn framebuffer_set_generate_mipmaps(&mut self, id: FramebufferId, enabled: bool) {
        if let Some(fb) = self.resources.framebuffers.get_mut(&id) {
            fb.set_generate_mipmaps(enabled);
        }
    }

    pub fn framebuffer_bind_flag(&self, id: FramebufferId) -> Option<u64> {
        self.resources.framebuffers.get(&id).map(|fb| fb.bind_flag())
    }

    pub fn bind_group_set_buffer(&mut self, id: BindGroupId, name: &str, buffer: BufferId) -> Result<()> {
        self.resources
            .bind_groups
            .get_mut(&id)
            .context("unknown bind group")?
            .set_buffer(name, buffer)
    }

    pub fn bind_group_set_texture(&mut self, id: BindGroupId, name: &str, texture: TextureId) -> Result<()> {
        let default_sampler = self
            .resources
            .textures
            .get(&texture)
            .map(|t| t.default_sampler)
            .unwrap_or_default();
        self.resources
            .bind_groups
            .get_mut(&id)
            .context("unknown bind group")?
            .set_texture(name, texture, default_sampler)
    }

    pub fn bind_group_set_texture_view(
        &mut self,
        id: BindGroupId,
        name: &str,
        texture: TextureId,
        view: (u32, u32, u32),
    ) -> Result<()> {
        let default_sampler = self
            .resources
            .textures
            .get(&texture)
            .map(|t| t.default_sampler)
            .unwrap_or_default();
        self.resources
            .bind_groups
            .get_mut(&id)
            .context("unknown bind group")?
            .set_texture_view(name, texture, view, default_sampler)
    }

    pub fn bind_group_set_sampler(&mut self, id: BindGroupId, name: &str, sampler: SamplerId) -> Result<()> {
        let key = *self
            .resources
            .samplers
            .get(&sampler)
            .context("unknown sampler")?;
        self.resources
            .bind_groups
            .get_mut(&id)
            .context("unknown bind group")?
            .set_sampler(name, key)
    }

    pub fn bind_group_set_value<T: bytemuck::Pod>(
        &mut self,
        id: BindGroupId,
        name: &str,
        value: &T,
    ) -> Result<()> {
        let group = self
            .resources
            .bind_groups
            .get_mut(&id)
            .context("unknown bind group")?;
        group.set_value(&self.ctx, name, value)
    }

    pub fn bind_group_set_raw_data(&mut self, id: BindGroupId, name: &str, bytes: &[u8]) -> Result<()> {
        let group = self
            .resources
            .bind_groups
            .get_mut(&id)
            .context("unknown bind group")?;
        group.set_raw_data(&self.ctx, name, bytes)
    }

    pub fn bind_group_is_built(&self, id: BindGroupId) -> bool {
        self.resources
            .bind_groups
            .get(&id)
            .is_some_and(BindGroupResource::is_built)
    }

    // ---- draw-time state setters ----

    pub fn set_program(&mut self, program: Option<ProgramId>) {
        self.cmd.record(DeviceCommand::SetProgram(program));
        self.current.program = program;
    }

    pub fn set_vertex_layout(&mut self, layout: Option<VertexLayoutId>) {
        self.cmd.record(DeviceCommand::SetVertexLayout(layout));
        self.current.vertex_layout = layout;
    }

    pub fn set_render_states(&mut self, states: RenderStateSet) {
        self.cmd.record(DeviceCommand::SetRenderStates(states));
        self.current.render_states = states;
    }

    pub fn set_front_face_ccw(&mut self, ccw: bool) {
        self.current.front_face_ccw = ccw;
    }

    pub fn set_bind_group(&mut self, index: u32, group: Option<BindGroupId>) {
        self.cmd.record(DeviceCommand::SetBindGroup { index, group });
        if let Some(slot) = self.current.bind_groups.get_mut(index as usize) {
            *slot = group;
        }
    }

    /// Switching framebuffers alone never bumps any bind flag; only
    /// attachment retargeting does. The pass restarts lazily at the next
    /// draw if the target actually differs.
    pub fn set_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.cmd.record(DeviceCommand::SetFramebuffer(framebuffer));
        self.current.framebuffer = framebuffer;
    }

    pub fn set_viewport(&mut self, viewport: Option<[f32; 4]>) {
        self.cmd.record(DeviceCommand::SetViewport(viewport));
        self.current.viewport = viewport;
        if self.cmd.render.active {
            if let Some([x, y, w, h]) = viewport {
                self.cmd.render.cmds.push(RenderCmd::SetViewport {
                    x,
                    y,
                    width: w,
                    height: h,
                });
            }
        }
    }

    pub fn set_scissor(&mut self, scissor: Option<[u32; 4]>) {
        self.cmd.record(DeviceCommand::SetScissor(scissor));
        self.current.scissor = scissor;
        if self.cmd.render.active {
            if let Some([x, y, w, h]) = scissor {
                self.cmd.render.cmds.push(RenderCmd::SetScissor {
                    x,
                    y,
                    width: w,
                    height: h,
                });
            }
        }
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: Option<BufferId>) {
        self.cmd.record(DeviceCommand::SetVertexBuffer { slot, buffer });
        if let Some(entry) = self.current.vertex_buffers.get_mut(slot as usize) {
            *entry = buffer;
        }
    }

    pub fn set_index_buffer(&mut self, buffer: Option<BufferId>) {
        self.cmd.record(DeviceCommand::SetIndexBuffer(buffer));
        self.current.index_buffer = buffer;
    }

    // ---- submission ----

    pub fn draw(
        &mut self,
        topology: wgpu::PrimitiveTopology,
        vertices: Range<u32>,
        instances: Range<u32>,
    ) -> Result<()> {
        self.cmd.record(DeviceCommand::Draw {
            topology,
            vertices: vertices.clone(),
            instances: instances.clone(),
        });
        self.draw_internal(topology, DrawKind::Arrays { vertices, instances })
    }

    pub fn draw_instanced(
        &mut self,
        topology: wgpu::PrimitiveTopology,
        vertices: Range<u32>,
        instance_count: u32,
    ) -> Result<()> {
        self.draw(topology, vertices, 0..instance_count)
    }

    pub fn draw_indexed(
        &mut self,
        topology: wgpu::PrimitiveTopology,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) -> Result<()> {
        self.cmd.record(DeviceCommand::DrawIndexed {
            topology,
            indices: indices.clone(),
            base_vertex,
            instances: instances.clone(),
        });
        self.draw_internal(
            topology,
            DrawKind::Indexed {
                indices,
                base_vertex,
                instances,
            },
        )
    }

    /// Record a compute dispatch. Ends any open render pass first.
    pub fn compute(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.cmd.record(DeviceCommand::Compute { x, y, z });
        if self.is_context_lost() {
            return Ok(());
        }
        if !self.ctx.capabilities.supports_compute {
            warn!("compute dispatch dropped: adapter lacks compute support");
            return Ok(());
        }
        self.end_render_pass();

        let Some(program_id) = self.current.program else {
            warn!("compute dropped: no program bound");
            return Ok(());
        };

        // Validate bound resources before touching the pass.
        let (checks, buffer_uids, texture_uids) = self.collect_binding_checks();
        let flags = validate_resources(&checks, false);
        if flags.contains(DrawValidation::FAILED) {
            warn!("compute dropped: bound resource disposed");
            self.cmd.stats.draws_dropped += 1;
            return Ok(());
        }
        if flags.contains(DrawValidation::NEED_GENERATE_MIPMAP) {
            self.flush_uploads();
            self.regenerate_bound_dirty_mips();
        }

        if !self.cmd.compute.active {
            self.cmd.compute.begin();
        }
        self.drain_uploads_into_compute();

        // Pipeline.
        let program = self
            .resources
            .programs
            .get(&program_id)
            .context("program disappeared")?;
        let Some(entry) = program.entry_points.compute.clone() else {
            warn!("compute dropped: program has no compute entry point");
            self.cmd.stats.draws_dropped += 1;
            return Ok(());
        };
        let module = Arc::clone(&program.module);
        let key = ComputePipelineKey {
            program: program.hash,
        };

        let layouts = self.collect_bind_group_layouts();
        let layout_key = PipelineLayoutKey {
            bind_group_layout_hashes: layouts.iter().map(|l| l.hash).collect(),
        };
        let layout_refs: Vec<&wgpu::BindGroupLayout> =
            layouts.iter().map(|l| l.layout.as_ref()).collect();
        let ctx = &mut self.ctx;
        let pipeline_layout =
            ctx.pipelines
                .get_or_create_layout(&ctx.device, &layout_key, &layout_refs);
        let pipeline = ctx.pipelines.get_or_create_compute(
            &ctx.device,
            key,
            ComputePipelineDesc {
                label: Some("helio compute"),
                layout: &pipeline_layout,
                module: &module,
                entry: &entry,
            },
        );
        self.cmd.compute.cmds.push(ComputeCmd::SetPipeline(pipeline));

        let Some(groups) = self.build_bound_groups() else {
            self.cmd.stats.draws_dropped += 1;
            return Ok(());
        };
        for (index, group) in groups {
            self.cmd.compute.cmds.push(ComputeCmd::SetBindGroup { index, group });
        }

        self.cmd.compute.reading_buffers.extend(buffer_uids);
        self.cmd.compute.reading_textures.extend(texture_uids);
        self.cmd.compute.cmds.push(ComputeCmd::Dispatch { x, y, z });
        self.cmd.compute.dispatch_count += 1;
        self.cmd.stats.dispatches += 1;
        Ok(())
    }

    /// Submit everything recorded so far.
    pub fn flush(&mut self) {
        self.cmd.record(DeviceCommand::Flush);
        self.flush_all();
    }

    /// Frame boundary: submit outstanding work, drain the retirement queue,
    /// and pump slab remap completions.
    pub fn end_frame(&mut self) {
        self.flush_all();
        self.frame_index += 1;
        // Handles retired in frame n are dropped at the end of frame n + 1.
        self.retirement.drain_before(self.frame_index.saturating_sub(1));
        if !self.is_context_lost() {
            self.ctx.device.poll(wgpu::Maintain::Poll);
        }
        self.cmd.stats = FrameStats::default();
    }

    /// Blocking readback of one mip/face of a texture, rows tightly packed.
    pub fn read_pixels(&mut self, id: TextureId, face: u32, mip_level: u32) -> Result<Vec<u8>> {
        if self.is_context_lost() {
            bail!("device lost");
        }
        self.flush_all();
        let texture = self.resources.textures.get(&id).context("unknown texture")?;
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("helio read pixels"),
            });
        let plan = texture
            .copy_pixels_to_buffer(&self.ctx, &mut encoder, face, mip_level)
            .context("texture is disposed")?;
        self.ctx.queue.submit(Some(encoder.finish()));
        let mapped = self.block_on_map_read(&plan.buffer)?;
        Ok(plan.tighten(&mapped))
    }

    /// Copy one mip/face of a texture into a caller buffer, tightening the
    /// 256-byte-aligned rows through an intermediate buffer when needed.
    pub fn read_pixels_to_buffer(
        &mut self,
        id: TextureId,
        face: u32,
        mip_level: u32,
        dst: BufferId,
        dst_offset: u64,
    ) -> Result<()> {
        if self.is_context_lost() {
            return Ok(());
        }
        self.flush_all();
        let texture = self.resources.textures.get(&id).context("unknown texture")?;
        let native_texture = texture.native.clone().context("texture is disposed")?;
        let info = format_info(texture.format());
        let (width, height, _) = texture.size();
        let w = (width >> mip_level).max(1);
        let h = (height >> mip_level).max(1);
        let padded = info.padded_bytes_per_row(w) as u64;
        let unpadded = info.unpadded_bytes_per_row(w) as u64;
        let rows = info.block_rows(h) as u64;

        let dst_buffer = self.resources.buffers.get(&dst).context("unknown buffer")?;
        if dst_offset + unpadded * rows > dst_buffer.byte_length() {
            bail!("destination buffer too small for pixel copy");
        }
        let native_dst = dst_buffer.native.clone().context("buffer is disposed")?;

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("helio pixels to buffer"),
            });
        if padded == unpadded {
            // Strides match: a single direct copy.
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    texture: &native_texture,
                    mip_level,
                    origin: wgpu::Origin3d { x: 0, y: 0, z: face },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyBuffer {
                    buffer: &native_dst,
                    layout: wgpu::ImageDataLayout {
                        offset: dst_offset,
                        bytes_per_row: Some(padded as u32),
                        rows_per_image: Some(rows as u32),
                    },
                },
                wgpu::Extent3d {
                    width: w,
                    height: h,
                    depth_or_array_layers: 1,
                },
            );
        } else {
            // The copy primitive mandates 256-byte rows; stage into a padded
            // temp buffer and tighten row by row.
            let temp = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("helio pixels temp"),
                size: padded * rows,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    texture: &native_texture,
                    mip_level,
                    origin: wgpu::Origin3d { x: 0, y: 0, z: face },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyBuffer {
                    buffer: &temp,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(padded as u32),
                        rows_per_image: Some(rows as u32),
                    },
                },
                wgpu::Extent3d {
                    width: w,
                    height: h,
                    depth_or_array_layers: 1,
                },
            );
            for row in 0..rows {
                encoder.copy_buffer_to_buffer(
                    &temp,
                    row * padded,
                    &native_dst,
                    dst_offset + row * unpadded,
                    unpadded,
                );
            }
        }
        self.ctx.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    // ---- capture/replay ----

    pub fn begin_capture(&mut self) {
        self.cmd.capture = Some(CaptureBundle::default());
    }

    pub fn end_capture(&mut self) -> CaptureBundle {
        self.cmd.capture.take().unwrap_or_default()
    }

    /// Re-issue a recorded command bundle against the current resources.
    pub fn replay(&mut self, bundle: &CaptureBundle) -> Result<()> {
        for command in &bundle.commands {
            match command.clone() {
                DeviceCommand::SetProgram(p) => self.set_program(p),
                DeviceCommand::SetVertexLayout(l) => self.set_vertex_layout(l),
                DeviceCommand::SetRenderStates(s) => self.set_render_states(s),
                DeviceCommand::SetBindGroup { index, group } => self.set_bind_group(index, group),
                DeviceCommand::SetFramebuffer(fb) => self.set_framebuffer(fb),
                DeviceCommand::SetViewport(v) => self.set_viewport(v),
                DeviceCommand::SetScissor(s) => self.set_scissor(s),
                DeviceCommand::SetVertexBuffer { slot, buffer } => {
                    self.set_vertex_buffer(slot, buffer)
                }
                DeviceCommand::SetIndexBuffer(b) => self.set_index_buffer(b),
                DeviceCommand::Draw {
                    topology,
                    vertices,
                    instances,
                } => self.draw(topology, vertices, instances)?,
                DeviceCommand::DrawIndexed {
                    topology,
                    indices,
                    base_vertex,
                    instances,
                } => self.draw_indexed(topology, indices, base_vertex, instances)?,
                DeviceCommand::Compute { x, y, z } => self.compute(x, y, z)?,
                DeviceCommand::Flush => self.flush(),
            }
        }
        Ok(())
    }

    // ---- device-lost recovery ----

    /// Swap in a replacement device and restore every registered resource.
    ///
    /// Caches and native handles from the old device are dropped; buffer and
    /// texture contents are undefined until re-uploaded (each resource's
    /// `cid` records the reload).
    pub fn replace_device(
        &mut self,
        device: wgpu::Device,
        queue: wgpu::Queue,
        capabilities: GpuCapabilities,
    ) -> Result<()> {
        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            warn!(?reason, %message, "device lost");
            flag.store(true, Ordering::Relaxed);
        });
        self.lost = lost;

        self.ctx.replace_device(device, queue, capabilities);
        self.mipmaps.on_device_replaced();
        self.cmd = CommandQueue::default();
        self.inline_flushed_buffers.clear();
        self.inline_flushed_textures.clear();

        for buffer in self.resources.buffers.values_mut() {
            self.video_memory += buffer.dispose();
            self.video_memory += buffer.restore(&self.ctx);
        }
        for texture in self.resources.textures.values_mut() {
            self.video_memory += texture.dispose(&mut self.retirement, self.frame_index);
            let delta = texture
                .restore(&self.ctx, &mut self.retirement, self.frame_index)
                .map_err(staging_err)?;
            self.video_memory += delta;
        }
        // Old-device handles in the retirement queue must not outlive it.
        self.retirement.clear();
        for group in self.resources.bind_groups.values_mut() {
            group.on_device_replaced();
        }
        for program in self.resources.programs.values_mut() {
            program.restore(&self.ctx);
        }
        Ok(())
    }

    // ---- internals ----

    fn draw_internal(&mut self, topology: wgpu::PrimitiveTopology, kind: DrawKind) -> Result<()> {
        if self.is_context_lost() {
            return Ok(());
        }
        self.end_compute_pass();

        let Some(program_id) = self.current.program else {
            warn!("draw dropped: no program bound");
            self.cmd.stats.draws_dropped += 1;
            return Ok(());
        };
        let Some(layout_id) = self.current.vertex_layout else {
            warn!("draw dropped: no vertex layout bound");
            self.cmd.stats.draws_dropped += 1;
            return Ok(());
        };

        // Validation over every bound resource.
        let (mut checks, buffer_uids, texture_uids) = self.collect_binding_checks();
        for slot in self.current.vertex_buffers.iter().flatten() {
            checks.push(ResourceCheck {
                disposed: self.buffer_is_disposed(*slot),
                ..ResourceCheck::default()
            });
        }
        if let Some(index) = self.current.index_buffer {
            checks.push(ResourceCheck {
                disposed: self.buffer_is_disposed(index),
                ..ResourceCheck::default()
            });
        }
        let fb_retargeted = self.framebuffer_retargeted();
        let flags = validate_resources(&checks, fb_retargeted);

        if flags.contains(DrawValidation::FAILED) {
            warn!("draw dropped: disposed resource or sampling the active attachment");
            self.cmd.stats.draws_dropped += 1;
            return Ok(());
        }
        if flags.intersects(DrawValidation::NEED_NEW_PASS | DrawValidation::NEED_GENERATE_MIPMAP) {
            // End the pass (flushing queued uploads), regenerate stale mips,
            // then start fresh below.
            self.flush_uploads();
            if flags.contains(DrawValidation::NEED_GENERATE_MIPMAP) {
                self.regenerate_bound_dirty_mips();
            }
        }

        if !self.cmd.render.active {
            self.begin_render_pass()?;
        }
        self.drain_uploads_into_render();

        // Pipeline resolution.
        let program = self
            .resources
            .programs
            .get(&program_id)
            .context("program disappeared")?;
        let Some(vertex_entry) = program.entry_points.vertex.clone() else {
            warn!("draw dropped: program has no vertex entry point");
            self.cmd.stats.draws_dropped += 1;
            return Ok(());
        };
        let fragment_entry = program.entry_points.fragment.clone();
        let module = Arc::clone(&program.module);
        let program_hash = program.hash;
        let consumed = program.attributes.clone();

        let layout = self
            .resources
            .vertex_layouts
            .get(&layout_id)
            .context("vertex layout disappeared")?;
        let vertex_hash = layout.subset_hash(&consumed);
        let owned_buffers = layout.filtered_layouts(&consumed);
        let buffer_layouts: Vec<wgpu::VertexBufferLayout> =
            owned_buffers.iter().map(|b| b.as_wgpu()).collect();

        let info = self.cmd.render.info.clone();
        let key = RenderPipelineKey {
            program: program_hash,
            vertex_layout: vertex_hash,
            framebuffer: info.hash,
            topology,
            state: self.current.render_states.hash(),
            front_face_ccw: self.current.front_face_ccw,
        };

        let layouts = self.collect_bind_group_layouts();
        let layout_key = PipelineLayoutKey {
            bind_group_layout_hashes: layouts.iter().map(|l| l.hash).collect(),
        };
        let layout_refs: Vec<&wgpu::BindGroupLayout> =
            layouts.iter().map(|l| l.layout.as_ref()).collect();

        let targets: Vec<Option<wgpu::ColorTargetState>> = info
            .color_formats
            .iter()
            .map(|format| Some(self.current.render_states.color_target(*format)))
            .collect();
        let depth_stencil = self.current.render_states.depth_stencil(
            info.depth_format.map(|format| (format, format_info(format))),
        );
        let primitive = self
            .current
            .render_states
            .primitive(topology, self.current.front_face_ccw);

        let ctx = &mut self.ctx;
        let pipeline_layout =
            ctx.pipelines
                .get_or_create_layout(&ctx.device, &layout_key, &layout_refs);
        let pipeline = ctx.pipelines.get_or_create_render(
            &ctx.device,
            key,
            RenderPipelineDesc {
                label: Some("helio render"),
                layout: &pipeline_layout,
                module: &module,
                vertex_entry: &vertex_entry,
                fragment_entry: fragment_entry.as_deref(),
                buffers: &buffer_layouts,
                targets: &targets,
                depth_stencil,
                primitive,
                multisample: wgpu::MultisampleState::default(),
            },
        );
        let Some(pipeline) = pipeline else {
            warn!("draw dropped: no framebuffer target resolved");
            self.cmd.stats.draws_dropped += 1;
            return Ok(());
        };
        self.cmd.render.cmds.push(RenderCmd::SetPipeline(pipeline));

        // Bind groups.
        let Some(groups) = self.build_bound_groups() else {
            self.cmd.stats.draws_dropped += 1;
            return Ok(());
        };
        for (index, group) in groups {
            self.cmd.render.cmds.push(RenderCmd::SetBindGroup { index, group });
        }

        // Vertex/index buffers.
        for (slot, id) in self.current.vertex_buffers.iter().enumerate() {
            let Some(id) = id else { continue };
            let Some(native) = self.resources.buffers.get(id).and_then(|b| b.native.clone())
            else {
                continue;
            };
            self.cmd.render.cmds.push(RenderCmd::SetVertexBuffer {
                slot: slot as u32,
                buffer: native,
            });
            self.cmd.render.reading_buffers.insert(id.uid());
        }
        if let DrawKind::Indexed { .. } = kind {
            let Some(index_id) = self.current.index_buffer else {
                warn!("draw dropped: indexed draw without an index buffer");
                self.cmd.stats.draws_dropped += 1;
                return Ok(());
            };
            let index_buffer = self
                .resources
                .buffers
                .get(&index_id)
                .context("index buffer disappeared")?;
            let BufferKind::Index { format } = index_buffer.kind() else {
                bail!("bound index buffer was not created as an index buffer");
            };
            let Some(native) = index_buffer.native.clone() else {
                warn!("draw dropped: index buffer disposed");
                self.cmd.stats.draws_dropped += 1;
                return Ok(());
            };
            self.cmd.render.cmds.push(RenderCmd::SetIndexBuffer {
                buffer: native,
                format,
            });
            self.cmd.render.reading_buffers.insert(index_id.uid());
        }

        self.cmd.render.reading_buffers.extend(buffer_uids);
        self.cmd.render.reading_textures.extend(texture_uids);

        match kind {
            DrawKind::Arrays { vertices, instances } => {
                self.cmd.render.cmds.push(RenderCmd::Draw { vertices, instances });
            }
            DrawKind::Indexed {
                indices,
                base_vertex,
                instances,
            } => {
                self.cmd.render.cmds.push(RenderCmd::DrawIndexed {
                    indices,
                    base_vertex,
                    instances,
                });
            }
        }
        self.cmd.render.draw_count += 1;
        self.cmd.stats.draw_calls += 1;
        Ok(())
    }

    /// Facts about every resource reachable from the bound bind groups, plus
    /// the uid sets the pass will mark as read.
    fn collect_binding_checks(&self) -> (Vec<ResourceCheck>, Vec<u64>, Vec<u64>) {
        let mut checks = Vec::new();
        let mut buffer_uids = Vec::new();
        let mut texture_uids = Vec::new();

        let active_attachments: Vec<TextureId> = self
            .current
            .framebuffer
            .and_then(|id| self.resources.framebuffers.get(&id))
            .map(|fb| fb.attachment_textures().collect())
            .unwrap_or_default();

        for slot in self.current.bind_groups.iter().flatten() {
            let Some(group) = self.resources.bind_groups.get(slot) else {
                checks.push(ResourceCheck {
                    disposed: true,
                    ..ResourceCheck::default()
                });
                continue;
            };
            for buffer in group.bound_buffers() {
                checks.push(ResourceCheck {
                    disposed: self.buffer_is_disposed(buffer),
                    ..ResourceCheck::default()
                });
                buffer_uids.push(buffer.uid());
            }
            for texture in group.bound_textures() {
                let resource = self.resources.textures.get(&texture);
                checks.push(ResourceCheck {
                    disposed: resource.map_or(true, TextureResource::is_disposed),
                    mipmap_dirty: resource.is_some_and(|t| t.mipmap_dirty),
                    is_active_attachment: active_attachments.contains(&texture),
                });
                texture_uids.push(texture.uid());
            }
        }
        (checks, buffer_uids, texture_uids)
    }

    fn framebuffer_retargeted(&self) -> bool {
        if !self.cmd.render.active {
            return false;
        }
        if self.cmd.render.framebuffer != self.current.framebuffer {
            return true;
        }
        match self.current.framebuffer {
            Some(id) => self
                .resources
                .framebuffers
                .get(&id)
                .map(|fb| fb.bind_flag() != self.cmd.render.captured_bind_flag)
                .unwrap_or(true),
            None => false,
        }
    }

    fn begin_render_pass(&mut self) -> Result<()> {
        debug_assert!(!self.cmd.render.active);
        let (info, target, bind_flag) = match self.current.framebuffer {
            Some(id) => {
                let fb = self
                    .resources
                    .framebuffers
                    .get(&id)
                    .context("bound framebuffer disappeared")?;
                let bind_flag = fb.bind_flag();
                let color_targets: Vec<AttachmentTarget> = fb.color_targets().copied().collect();
                let depth_target = fb.depth;

                let mut color_views = Vec::with_capacity(color_targets.len());
                let mut color_formats = Vec::with_capacity(color_targets.len());
                let mut width = 0;
                let mut height = 0;
                for target in &color_targets {
                    let Some(texture) = self.resources.textures.get_mut(&target.texture) else {
                        continue;
                    };
                    let Some(view) = texture.get_view(target.face, target.level, 1) else {
                        continue;
                    };
                    let (w, h, _) = texture.size();
                    width = (w >> target.level).max(1);
                    height = (h >> target.level).max(1);
                    color_formats.push(texture.format());
                    color_views.push(view);
                }
                let mut depth_format = None;
                let depth_view = depth_target.and_then(|target| {
                    let texture = self.resources.textures.get_mut(&target.texture)?;
                    let view = texture.get_view(target.face, target.level, 1)?;
                    depth_format = Some(texture.format());
                    if width == 0 {
                        let (w, h, _) = texture.size();
                        width = w;
                        height = h;
                    }
                    Some(view)
                });

                let info = FramebufferInfo::from_formats(color_formats, depth_format, width, height, 1);
                (
                    info,
                    RenderPassTarget {
                        color: color_views,
                        depth: depth_view,
                    },
                    bind_flag,
                )
            }
            None => (
                FramebufferInfo::default(),
                RenderPassTarget {
                    color: Vec::new(),
                    depth: None,
                },
                0,
            ),
        };

        self.cmd.render.begin(
            self.current.framebuffer,
            info,
            bind_flag,
            target,
            self.current.viewport,
            self.current.scissor,
        );
        Ok(())
    }

    /// Move staged copies for every registered resource into the active
    /// render pass's pre-copy list. The copies submit ahead of the pass in
    /// the same command buffer, so pass reads observe them; the resources'
    /// slabs retire when the pass ends.
    fn drain_uploads_into_render(&mut self) {
        if !self.cmd.has_pending_uploads() {
            return;
        }
        for id in std::mem::take(&mut self.cmd.buffer_uploads) {
            if let Some(buffer) = self.resources.buffers.get_mut(&id) {
                buffer.begin_sync_changes(&mut self.cmd.render.pre_copies);
                self.inline_flushed_buffers.push(id);
            }
        }
        for id in std::mem::take(&mut self.cmd.texture_uploads) {
            if let Some(texture) = self.resources.textures.get_mut(&id) {
                texture.begin_sync_changes(&mut self.cmd.render.pre_copies);
                self.inline_flushed_textures.push(id);
            }
        }
    }

    fn drain_uploads_into_compute(&mut self) {
        if !self.cmd.has_pending_uploads() {
            return;
        }
        for id in std::mem::take(&mut self.cmd.buffer_uploads) {
            if let Some(buffer) = self.resources.buffers.get_mut(&id) {
                buffer.begin_sync_changes(&mut self.cmd.compute.pre_copies);
                self.inline_flushed_buffers.push(id);
            }
        }
        for id in std::mem::take(&mut self.cmd.texture_uploads) {
            if let Some(texture) = self.resources.textures.get_mut(&id) {
                texture.begin_sync_changes(&mut self.cmd.compute.pre_copies);
                self.inline_flushed_textures.push(id);
            }
        }
    }

    /// Retire the staging slabs of resources whose copies just submitted.
    fn finish_inline_flushes(&mut self) {
        for id in self.inline_flushed_buffers.drain(..) {
            if let Some(buffer) = self.resources.buffers.get_mut(&id) {
                buffer.end_sync_changes();
            }
        }
        for id in self.inline_flushed_textures.drain(..) {
            if let Some(texture) = self.resources.textures.get_mut(&id) {
                texture.end_sync_changes();
            }
        }
    }

    fn end_render_pass(&mut self) {
        let was_active = self.cmd.render.active;
        let framebuffer = self.cmd.render.framebuffer;
        let draws = self.cmd.render.end(&self.ctx);
        if !was_active {
            return;
        }
        self.finish_inline_flushes();
        self.cmd.swap_deferred_uploads();
        if draws > 0 {
            self.cmd.stats.render_passes += 1;
        }

        // Mark drawn-to mipped attachments dirty and regenerate if requested.
        if let Some(fb_id) = framebuffer {
            let (generate, attachments): (bool, Vec<AttachmentTarget>) = self
                .resources
                .framebuffers
                .get(&fb_id)
                .map(|fb| (fb.generate_mipmaps, fb.color_targets().copied().collect()))
                .unwrap_or((false, Vec::new()));
            for target in &attachments {
                if let Some(texture) = self.resources.textures.get_mut(&target.texture) {
                    if draws > 0 && texture.mip_level_count() > 1 {
                        texture.mipmap_dirty = true;
                    }
                }
            }
            if generate && draws > 0 {
                for target in attachments {
                    self.regenerate_mips(target.texture);
                }
            }
        }
    }

    fn end_compute_pass(&mut self) {
        let was_active = self.cmd.compute.active;
        let dispatches = self.cmd.compute.end(&self.ctx);
        if !was_active {
            return;
        }
        self.finish_inline_flushes();
        self.cmd.swap_deferred_uploads();
        if dispatches > 0 {
            self.cmd.stats.compute_passes += 1;
        }
    }

    /// Cross-cutting boundary flush: end both passes, land every staged
    /// upload in one encoder (mip regeneration for dirty participants
    /// included), then retire slabs and clear the tracking sets.
    fn flush_uploads(&mut self) {
        self.end_render_pass();
        self.end_compute_pass();
        self.cmd.swap_deferred_uploads();
        if !self.cmd.has_pending_uploads() {
            return;
        }
        if self.is_context_lost() {
            self.cmd.buffer_uploads.clear();
            self.cmd.texture_uploads.clear();
            return;
        }

        let buffer_ids: Vec<BufferId> = self.cmd.buffer_uploads.drain().collect();
        let texture_ids: Vec<TextureId> = self.cmd.texture_uploads.drain().collect();

        let mut copies = Vec::new();
        for id in &buffer_ids {
            if let Some(buffer) = self.resources.buffers.get_mut(id) {
                buffer.begin_sync_changes(&mut copies);
            }
        }
        for id in &texture_ids {
            if let Some(texture) = self.resources.textures.get_mut(id) {
                texture.begin_sync_changes(&mut copies);
            }
        }

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("helio upload flush"),
            });
        for copy in &copies {
            copy.encode(&mut encoder);
        }
        for id in &texture_ids {
            if let Some(texture) = self.resources.textures.get_mut(id) {
                if texture.mipmap_dirty {
                    self.cmd.stats.mipmap_regenerations += 1;
                    self.mipmaps.generate(&mut self.ctx, &mut encoder, texture);
                }
            }
        }
        self.ctx.queue.submit(Some(encoder.finish()));

        for id in &buffer_ids {
            if let Some(buffer) = self.resources.buffers.get_mut(id) {
                buffer.end_sync_changes();
            }
        }
        for id in &texture_ids {
            if let Some(texture) = self.resources.textures.get_mut(id) {
                texture.end_sync_changes();
            }
        }
    }

    fn flush_all(&mut self) {
        self.end_render_pass();
        self.end_compute_pass();
        self.flush_uploads();
    }

    /// Regenerate mips for a single texture with its own encoder.
    fn regenerate_mips(&mut self, id: TextureId) {
        let Some(texture) = self.resources.textures.get_mut(&id) else {
            return;
        };
        if texture.mip_level_count() < 2 || texture.is_disposed() {
            texture.mipmap_dirty = false;
            return;
        }
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("helio mipmap regen"),
            });
        self.cmd.stats.mipmap_regenerations += 1;
        self.mipmaps.generate(&mut self.ctx, &mut encoder, texture);
        self.ctx.queue.submit(Some(encoder.finish()));
    }

    /// Regenerate mips for any texture bound through the current bind
    /// groups that is flagged dirty.
    fn regenerate_bound_dirty_mips(&mut self) {
        let mut dirty = Vec::new();
        for slot in self.current.bind_groups.iter().flatten() {
            if let Some(group) = self.resources.bind_groups.get(slot) {
                for texture in group.bound_textures() {
                    if self
                        .resources
                        .textures
                        .get(&texture)
                        .is_some_and(|t| t.mipmap_dirty)
                    {
                        dirty.push(texture);
                    }
                }
            }
        }
        for id in dirty {
            self.regenerate_mips(id);
        }
    }

    /// Layouts for the bound bind group slots, in slot order.
    fn collect_bind_group_layouts(&mut self) -> Vec<helio_gpu::layout_cache::CachedBindGroupLayout> {
        let mut layouts = Vec::new();
        for slot in self.current.bind_groups.iter().flatten() {
            if let Some(group) = self.resources.bind_groups.get_mut(slot) {
                layouts.push(group.layout(&mut self.ctx));
            }
        }
        layouts
    }

    /// Build (or fetch) the native bind group for every bound slot. `None`
    /// aborts the draw; the build path has already logged the reason.
    fn build_bound_groups(&mut self) -> Option<Vec<(u32, Arc<wgpu::BindGroup>)>> {
        let mut built = Vec::new();
        for (index, slot) in self.current.bind_groups.iter().enumerate() {
            let Some(id) = slot else { continue };
            let resources = &mut self.resources;
            let group = resources.bind_groups.get_mut(id)?;
            let native = group.build(&mut self.ctx, &resources.buffers, &mut resources.textures)?;
            built.push((index as u32, native));
        }
        Some(built)
    }

    fn block_on_map_read(&self, buffer: &wgpu::Buffer) -> Result<Vec<u8>> {
        let slice = buffer.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.ctx.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(receiver.receive())
            .context("map_async callback dropped")?
            .map_err(|e| anyhow!("buffer map failed: {e:?}"))?;
        let data = slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(data)
    }
}

enum DrawKind {
    Arrays {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    Indexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
}

fn staging_err(err: StagingError) -> anyhow::Error {
    anyhow!(err)
}
