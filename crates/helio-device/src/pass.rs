//! Render/compute pass state machines.
//!
//! Pass work is recorded CPU-side while a pass is active and encoded in one
//! shot when the pass ends: staged resource copies land first in the same
//! command buffer, then the pass itself, so every flushed upload is visible
//! to every draw in the pass.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use bitflags::bitflags;
use helio_gpu::GpuContext;

use crate::framebuffer::FramebufferInfo;
use crate::object::FramebufferId;

bitflags! {
    /// Outcome of draw validation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DrawValidation: u32 {
        /// The framebuffer was retargeted since the pass began; end and
        /// restart before drawing.
        const NEED_NEW_PASS = 1 << 0;
        /// A bound texture has stale mip levels; regenerate first.
        const NEED_GENERATE_MIPMAP = 1 << 1;
        /// The draw cannot proceed (disposed resource, or sampling the
        /// active attachment); drop it.
        const FAILED = 1 << 2;
    }
}

/// Per-resource facts collected at draw time and fed to
/// [`validate_resources`].
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ResourceCheck {
    pub disposed: bool,
    pub mipmap_dirty: bool,
    /// Bound for sampling while also attached to the active framebuffer.
    pub is_active_attachment: bool,
}

/// Pure draw-validation decision.
pub(crate) fn validate_resources(
    checks: &[ResourceCheck],
    fb_retargeted: bool,
) -> DrawValidation {
    let mut result = DrawValidation::empty();
    for check in checks {
        if check.disposed || check.is_active_attachment {
            result |= DrawValidation::FAILED;
        }
        if check.mipmap_dirty {
            result |= DrawValidation::NEED_GENERATE_MIPMAP;
        }
    }
    if fb_retargeted {
        result |= DrawValidation::NEED_NEW_PASS;
    }
    result
}

/// A staged upload ready to be encoded: slab region to destination.
pub(crate) struct SyncCopy {
    pub src: Arc<wgpu::Buffer>,
    pub src_offset: u64,
    pub size: u64,
    pub dst: CopyDst,
}

pub(crate) enum CopyDst {
    Buffer {
        buffer: Arc<wgpu::Buffer>,
        offset: u64,
    },
    Texture {
        texture: Arc<wgpu::Texture>,
        mip_level: u32,
        origin: wgpu::Origin3d,
        extent: wgpu::Extent3d,
        bytes_per_row: u32,
        rows_per_image: u32,
    },
}

impl SyncCopy {
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        match &self.dst {
            CopyDst::Buffer { buffer, offset } => {
                encoder.copy_buffer_to_buffer(&self.src, self.src_offset, buffer, *offset, self.size);
            }
            CopyDst::Texture {
                texture,
                mip_level,
                origin,
                extent,
                bytes_per_row,
                rows_per_image,
            } => {
                encoder.copy_buffer_to_texture(
                    wgpu::ImageCopyBuffer {
                        buffer: &self.src,
                        layout: wgpu::ImageDataLayout {
                            offset: self.src_offset,
                            bytes_per_row: Some(*bytes_per_row),
                            rows_per_image: Some(*rows_per_image),
                        },
                    },
                    wgpu::ImageCopyTexture {
                        texture,
                        mip_level: *mip_level,
                        origin: *origin,
                        aspect: wgpu::TextureAspect::All,
                    },
                    *extent,
                );
            }
        }
    }
}

/// Recorded render-pass command. Holds `Arc`s so the native objects outlive
/// recording regardless of later registry mutations.
pub(crate) enum RenderCmd {
    SetPipeline(Arc<wgpu::RenderPipeline>),
    SetBindGroup {
        index: u32,
        group: Arc<wgpu::BindGroup>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: Arc<wgpu::Buffer>,
    },
    SetIndexBuffer {
        buffer: Arc<wgpu::Buffer>,
        format: wgpu::IndexFormat,
    },
    SetViewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    SetScissor {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
}

pub(crate) enum ComputeCmd {
    SetPipeline(Arc<wgpu::ComputePipeline>),
    SetBindGroup {
        index: u32,
        group: Arc<wgpu::BindGroup>,
    },
    Dispatch { x: u32, y: u32, z: u32 },
}

/// Attachment views resolved when the pass began.
pub(crate) struct RenderPassTarget {
    pub color: Vec<Arc<wgpu::TextureView>>,
    pub depth: Option<Arc<wgpu::TextureView>>,
}

/// An active (or idle) render pass.
///
/// `begin` captures the framebuffer's `bind_flag`; a later mismatch is the
/// retarget signal that forces a pass restart. While active, draws are
/// recorded into `cmds`; staged uploads that must land before the pass's
/// reads accumulate in `pre_copies`.
#[derive(Default)]
pub(crate) struct RenderPassScope {
    pub active: bool,
    pub framebuffer: Option<FramebufferId>,
    pub info: FramebufferInfo,
    pub captured_bind_flag: u64,
    pub target: Option<RenderPassTarget>,
    pub pre_copies: Vec<SyncCopy>,
    pub cmds: Vec<RenderCmd>,
    /// Uids of buffers read by recorded draws.
    pub reading_buffers: HashSet<u64>,
    /// Uids of textures sampled by recorded draws.
    pub reading_textures: HashSet<u64>,
    pub draw_count: u32,
}

impl RenderPassScope {
    pub fn begin(
        &mut self,
        framebuffer: Option<FramebufferId>,
        info: FramebufferInfo,
        bind_flag: u64,
        target: RenderPassTarget,
        viewport: Option<[f32; 4]>,
        scissor: Option<[u32; 4]>,
    ) {
        debug_assert!(!self.active);
        self.active = true;
        self.framebuffer = framebuffer;
        self.info = info;
        self.captured_bind_flag = bind_flag;
        self.target = Some(target);
        self.cmds.clear();
        self.reading_buffers.clear();
        self.reading_textures.clear();
        self.draw_count = 0;
        if let Some([x, y, w, h]) = viewport {
            self.cmds.push(RenderCmd::SetViewport {
                x,
                y,
                width: w,
                height: h,
            });
        }
        if let Some([x, y, w, h]) = scissor {
            self.cmds.push(RenderCmd::SetScissor {
                x,
                y,
                width: w,
                height: h,
            });
        }
    }

    pub fn is_reading_buffer(&self, uid: u64) -> bool {
        self.active && self.reading_buffers.contains(&uid)
    }

    pub fn is_reading_texture(&self, uid: u64) -> bool {
        self.active && self.reading_textures.contains(&uid)
    }

    /// Encode and submit everything recorded since `begin`. Pre-pass copies
    /// go into the same command buffer ahead of the pass. Returns the number
    /// of draws submitted. Idle passes are a no-op.
    pub fn end(&mut self, ctx: &GpuContext) -> u32 {
        if !self.active {
            return 0;
        }
        self.active = false;
        let target = self.target.take();
        let draw_count = self.draw_count;

        let has_pass_work = self.draw_count > 0;
        if self.pre_copies.is_empty() && !has_pass_work {
            self.cmds.clear();
            self.reading_buffers.clear();
            self.reading_textures.clear();
            return 0;
        }

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("helio render pass"),
            });
        for copy in self.pre_copies.drain(..) {
            copy.encode(&mut encoder);
        }

        if has_pass_work {
            if let Some(target) = &target {
                let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = target
                    .color
                    .iter()
                    .map(|view| {
                        Some(wgpu::RenderPassColorAttachment {
                            view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Load,
                                store: wgpu::StoreOp::Store,
                            },
                        })
                    })
                    .collect();
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("helio render pass"),
                    color_attachments: &color_attachments,
                    depth_stencil_attachment: target.depth.as_ref().map(|view| {
                        wgpu::RenderPassDepthStencilAttachment {
                            view,
                            depth_ops: Some(wgpu::Operations {
                                load: wgpu::LoadOp::Load,
                                store: wgpu::StoreOp::Store,
                            }),
                            stencil_ops: None,
                        }
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                for cmd in &self.cmds {
                    match cmd {
                        RenderCmd::SetPipeline(pipeline) => pass.set_pipeline(pipeline),
                        RenderCmd::SetBindGroup { index, group } => {
                            pass.set_bind_group(*index, group, &[])
                        }
                        RenderCmd::SetVertexBuffer { slot, buffer } => {
                            pass.set_vertex_buffer(*slot, buffer.slice(..))
                        }
                        RenderCmd::SetIndexBuffer { buffer, format } => {
                            pass.set_index_buffer(buffer.slice(..), *format)
                        }
                        RenderCmd::SetViewport { x, y, width, height } => {
                            pass.set_viewport(*x, *y, *width, *height, 0.0, 1.0)
                        }
                        RenderCmd::SetScissor { x, y, width, height } => {
                            pass.set_scissor_rect(*x, *y, *width, *height)
                        }
                        RenderCmd::Draw { vertices, instances } => {
                            pass.draw(vertices.clone(), instances.clone())
                        }
                        RenderCmd::DrawIndexed {
                            indices,
                            base_vertex,
                            instances,
                        } => pass.draw_indexed(indices.clone(), *base_vertex, instances.clone()),
                    }
                }
            }
        }

        ctx.queue.submit(Some(encoder.finish()));
        self.cmds.clear();
        self.reading_buffers.clear();
        self.reading_textures.clear();
        draw_count
    }
}

/// An active (or idle) compute pass.
#[derive(Default)]
pub(crate) struct ComputePassScope {
    pub active: bool,
    pub pre_copies: Vec<SyncCopy>,
    pub cmds: Vec<ComputeCmd>,
    pub reading_buffers: HashSet<u64>,
    pub reading_textures: HashSet<u64>,
    pub dispatch_count: u32,
}

impl ComputePassScope {
    pub fn begin(&mut self) {
        debug_assert!(!self.active);
        self.active = true;
        self.cmds.clear();
        self.reading_buffers.clear();
        self.reading_textures.clear();
        self.dispatch_count = 0;
    }

    pub fn is_reading_buffer(&self, uid: u64) -> bool {
        self.active && self.reading_buffers.contains(&uid)
    }

    pub fn is_reading_texture(&self, uid: u64) -> bool {
        self.active && self.reading_textures.contains(&uid)
    }

    /// Encode and submit the recorded dispatches. Returns the dispatch
    /// count. Idle passes are a no-op.
    pub fn end(&mut self, ctx: &GpuContext) -> u32 {
        if !self.active {
            return 0;
        }
        self.active = false;
        let dispatch_count = self.dispatch_count;

        if self.pre_copies.is_empty() && self.dispatch_count == 0 {
            self.cmds.clear();
            self.reading_buffers.clear();
            self.reading_textures.clear();
            return 0;
        }

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("helio compute pass"),
            });
        for copy in self.pre_copies.drain(..) {
            copy.encode(&mut encoder);
        }
        if self.dispatch_count > 0 {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("helio compute pass"),
                timestamp_writes: None,
            });
            for cmd in &self.cmds {
                match cmd {
                    ComputeCmd::SetPipeline(pipeline) => pass.set_pipeline(pipeline),
                    ComputeCmd::SetBindGroup { index, group } => {
                        pass.set_bind_group(*index, group, &[])
                    }
                    ComputeCmd::Dispatch { x, y, z } => pass.dispatch_workgroups(*x, *y, *z),
                }
            }
        }
        ctx.queue.submit(Some(encoder.finish()));
        self.cmds.clear();
        self.reading_buffers.clear();
        self.reading_textures.clear();
        dispatch_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_resources_validate_empty() {
        let checks = [ResourceCheck::default(), ResourceCheck::default()];
        assert_eq!(validate_resources(&checks, false), DrawValidation::empty());
    }

    #[test]
    fn disposed_resource_fails() {
        let checks = [ResourceCheck {
            disposed: true,
            ..ResourceCheck::default()
        }];
        assert!(validate_resources(&checks, false).contains(DrawValidation::FAILED));
    }

    #[test]
    fn sampling_active_attachment_fails() {
        let checks = [ResourceCheck {
            is_active_attachment: true,
            ..ResourceCheck::default()
        }];
        assert!(validate_resources(&checks, false).contains(DrawValidation::FAILED));
    }

    #[test]
    fn dirty_mips_request_regeneration() {
        let checks = [ResourceCheck {
            mipmap_dirty: true,
            ..ResourceCheck::default()
        }];
        let result = validate_resources(&checks, false);
        assert!(result.contains(DrawValidation::NEED_GENERATE_MIPMAP));
        assert!(!result.contains(DrawValidation::FAILED));
    }

    #[test]
    fn retargeted_framebuffer_requests_new_pass() {
        let result = validate_resources(&[], true);
        assert_eq!(result, DrawValidation::NEED_NEW_PASS);
    }

    #[test]
    fn flags_combine() {
        let checks = [
            ResourceCheck {
                mipmap_dirty: true,
                ..ResourceCheck::default()
            },
            ResourceCheck {
                disposed: true,
                ..ResourceCheck::default()
            },
        ];
        let result = validate_resources(&checks, true);
        assert!(result.contains(DrawValidation::FAILED));
        assert!(result.contains(DrawValidation::NEED_GENERATE_MIPMAP));
        assert!(result.contains(DrawValidation::NEED_NEW_PASS));
    }
}
