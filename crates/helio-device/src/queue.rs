//! Immediate-mode command queue: the mutually-exclusive render/compute pass
//! pair, device-wide upload tracking, and capture/replay.

use std::collections::HashSet;
use std::ops::Range;

use helio_gpu::stats::FrameStats;

use crate::object::{BindGroupId, BufferId, FramebufferId, ProgramId, TextureId, VertexLayoutId};
use crate::pass::{ComputePassScope, RenderPassScope};
use crate::render_state::RenderStateSet;

/// One device-level command, recorded during capture and re-issued on
/// replay.
#[derive(Debug, Clone)]
pub enum DeviceCommand {
    SetProgram(Option<ProgramId>),
    SetVertexLayout(Option<VertexLayoutId>),
    SetRenderStates(RenderStateSet),
    SetBindGroup { index: u32, group: Option<BindGroupId> },
    SetFramebuffer(Option<FramebufferId>),
    SetViewport(Option<[f32; 4]>),
    SetScissor(Option<[u32; 4]>),
    SetVertexBuffer { slot: u32, buffer: Option<BufferId> },
    SetIndexBuffer(Option<BufferId>),
    Draw {
        topology: wgpu::PrimitiveTopology,
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        topology: wgpu::PrimitiveTopology,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
    Compute { x: u32, y: u32, z: u32 },
    Flush,
}

/// A replayable recording of device commands between `begin_capture` and
/// `end_capture`. Resource references are by id; replay fails softly (the
/// draw validation path) if a referenced resource has since been disposed.
#[derive(Debug, Clone, Default)]
pub struct CaptureBundle {
    pub(crate) commands: Vec<DeviceCommand>,
}

impl CaptureBundle {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Front end mediating between exactly one active render pass and one active
/// compute pass, plus the device-wide upload-tracking sets.
///
/// The sets are `HashSet`s keyed by resource id, so redundant registration
/// from repeated mutations is harmless. `deferred_*` holds resources whose
/// uploads were staged mid-pass and cannot land until the pass boundary; the
/// boundary swaps them into the current sets.
#[derive(Default)]
pub(crate) struct CommandQueue {
    pub render: RenderPassScope,
    pub compute: ComputePassScope,
    pub buffer_uploads: HashSet<BufferId>,
    pub texture_uploads: HashSet<TextureId>,
    pub deferred_buffer_uploads: HashSet<BufferId>,
    pub deferred_texture_uploads: HashSet<TextureId>,
    pub capture: Option<CaptureBundle>,
    pub stats: FrameStats,
}

impl CommandQueue {
    /// Whether any resource is waiting on an upload flush.
    pub fn has_pending_uploads(&self) -> bool {
        !self.buffer_uploads.is_empty() || !self.texture_uploads.is_empty()
    }

    /// Pass boundary: deferred registrations become current.
    pub fn swap_deferred_uploads(&mut self) {
        self.buffer_uploads.extend(self.deferred_buffer_uploads.drain());
        self.texture_uploads.extend(self.deferred_texture_uploads.drain());
    }

    /// Register a buffer mutation. Mid-pass mutations of a resource the pass
    /// is reading defer to the boundary; everything else flushes with the
    /// next draw.
    pub fn register_buffer_upload(&mut self, id: BufferId, defer: bool) {
        if defer {
            self.deferred_buffer_uploads.insert(id);
        } else {
            self.buffer_uploads.insert(id);
        }
    }

    pub fn register_texture_upload(&mut self, id: TextureId, defer: bool) {
        if defer {
            self.deferred_texture_uploads.insert(id);
        } else {
            self.texture_uploads.insert(id);
        }
    }

    pub fn record(&mut self, command: DeviceCommand) {
        if let Some(capture) = &mut self.capture {
            capture.commands.push(command);
        }
    }
}
