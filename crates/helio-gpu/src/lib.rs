//! `helio-gpu` contains device-independent GPU utilities used by helio.
//!
//! Currently this crate provides:
//! - Staged upload management backed by pools of write-mappable slabs
//!   (see [`StagingPool`]).
//! - Centralized caching of bind group layouts, samplers and render/compute
//!   pipelines with structural keys (see [`pipeline_cache::PipelineCache`]).
//! - Texture format metadata used for row-stride and depth/stencil decisions
//!   (see [`format`]).

mod arena;
mod capabilities;
mod context;
mod error;
mod upload;

pub mod format;
pub mod layout_cache;
pub mod pipeline_cache;
pub mod pipeline_key;
pub mod sampler_cache;
pub mod stats;

pub use arena::{align_up, LinearArena};
pub use capabilities::GpuCapabilities;
pub use context::GpuContext;
pub use error::StagingError;
pub use upload::{SlabAlloc, StagingConfig, StagingPool};

use std::hash::{Hash, Hasher};

/// Structural 64-bit hash used for all cache keys in this crate.
///
/// Not cryptographic and not stable across processes; only used for in-memory
/// cache lookups within one device session.
pub fn stable_hash64(value: &impl Hash) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
