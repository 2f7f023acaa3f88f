//! `helio-device` is an immediate-mode device abstraction over `wgpu`.
//!
//! A [`Device`] owns every GPU resource behind integer handles and mediates
//! all mutation and submission through an implicit render/compute pass pair:
//! callers set state and issue draws, and the device decides when passes
//! begin and end, when staged uploads land, and when stale mip chains are
//! regenerated.
//!
//! Highlights:
//! - Buffers accumulate coalesced sub-range writes in write-mapped staging
//!   slabs and flush them ahead of the consuming pass ([`buffer`]).
//! - Textures defer uploads the same way when a pass is already sampling
//!   them, and cache their views per (face, level, count) ([`texture`]).
//! - Bind groups resolve named slots lazily and rebuild only when a bound
//!   resource actually changes ([`bind_group`]).
//! - Draws are validated against disposal, framebuffer retargeting and stale
//!   mips before anything is recorded ([`pass`]).

mod bind_group;
mod buffer;
mod device;
mod framebuffer;
mod mipmap;
mod object;
mod pass;
mod program;
mod queue;
mod render_state;
mod retire;
mod texture;
mod vertex_layout;

pub use bind_group::{BindingDesc, BindingKind};
pub use buffer::{BufferKind, BufferUsage};
pub use device::{Device, MAX_BIND_GROUPS, MAX_VERTEX_BUFFERS};
pub use framebuffer::AttachmentTarget;
pub use object::{
    BindGroupId, BufferId, FramebufferId, ProgramId, SamplerId, TextureId, VertexLayoutId,
};
pub use pass::DrawValidation;
pub use program::ProgramEntryPoints;
pub use queue::CaptureBundle;
pub use render_state::{BlendStateDesc, DepthStateDesc, RasterStateDesc, RenderStateSet};
pub use texture::{TextureKind, UploadOutcome};
pub use vertex_layout::{VertexAttributeDesc, VertexBufferDesc};

pub use helio_gpu::sampler_cache::SamplerKey;
pub use helio_gpu::stats::{CacheStats, FrameStats, UploadStats};
