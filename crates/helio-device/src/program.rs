//! Shader programs: WGSL module wrapper with a stable hash and captured
//! compilation diagnostics.

use std::sync::Arc;

use helio_gpu::{stable_hash64, GpuContext};

use crate::object::Identity;

/// Entry points a program exposes. Render programs carry a vertex entry and
/// usually a fragment entry; compute programs carry a compute entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramEntryPoints {
    pub vertex: Option<String>,
    pub fragment: Option<String>,
    pub compute: Option<String>,
}

impl ProgramEntryPoints {
    pub fn render(vertex: &str, fragment: Option<&str>) -> Self {
        Self {
            vertex: Some(vertex.to_string()),
            fragment: fragment.map(str::to_string),
            compute: None,
        }
    }

    pub fn compute(entry: &str) -> Self {
        Self {
            vertex: None,
            fragment: None,
            compute: Some(entry.to_string()),
        }
    }
}

/// A compiled shader module plus the metadata the pipeline cache keys on.
///
/// Module creation itself does not fail synchronously even for broken code;
/// validation diagnostics are captured through an error scope around module
/// creation, surfaced by [`compile_error`](Self::compile_error) and never
/// gate pipeline use.
pub struct ProgramResource {
    pub(crate) identity: Identity,
    /// Retained so the module can be recreated after device loss.
    source: String,
    pub(crate) module: Arc<wgpu::ShaderModule>,
    pub(crate) entry_points: ProgramEntryPoints,
    /// Vertex input attributes the program consumes: (name, shader location).
    pub(crate) attributes: Vec<(String, u32)>,
    pub(crate) hash: u64,
    compile_error: Option<String>,
}

fn create_module(ctx: &GpuContext, source: &str) -> (Arc<wgpu::ShaderModule>, Option<String>) {
    ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = ctx
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("helio program"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
    let error = pollster::block_on(ctx.device.pop_error_scope()).map(|err| err.to_string());
    (Arc::new(module), error)
}

impl ProgramResource {
    pub(crate) fn new(
        ctx: &GpuContext,
        source: &str,
        entry_points: ProgramEntryPoints,
        attributes: Vec<(String, u32)>,
    ) -> Self {
        let (module, compile_error) = create_module(ctx, source);
        let hash = stable_hash64(&(source, &entry_points));
        Self {
            identity: Identity::new(),
            source: source.to_string(),
            module,
            entry_points,
            attributes,
            hash,
            compile_error,
        }
    }

    /// Recreate the module against a replacement device.
    pub(crate) fn restore(&mut self, ctx: &GpuContext) {
        let (module, compile_error) = create_module(ctx, &self.source);
        self.module = module;
        self.compile_error = compile_error;
        self.identity.bump();
    }

    pub fn uid(&self) -> u64 {
        self.identity.uid
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn is_compute(&self) -> bool {
        self.entry_points.compute.is_some()
    }

    pub fn attributes(&self) -> &[(String, u32)] {
        &self.attributes
    }

    /// Validation diagnostics captured when the module was created. Empty
    /// when compilation reported no errors.
    pub fn compile_error(&self) -> &str {
        self.compile_error.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_point_constructors() {
        let render = ProgramEntryPoints::render("vs_main", Some("fs_main"));
        assert_eq!(render.vertex.as_deref(), Some("vs_main"));
        assert_eq!(render.fragment.as_deref(), Some("fs_main"));
        assert!(render.compute.is_none());

        let compute = ProgramEntryPoints::compute("cs_main");
        assert!(compute.vertex.is_none());
        assert_eq!(compute.compute.as_deref(), Some("cs_main"));
    }

    #[test]
    fn hash_distinguishes_sources_and_entries() {
        let a = stable_hash64(&("fn a() {}", ProgramEntryPoints::compute("a")));
        let b = stable_hash64(&("fn b() {}", ProgramEntryPoints::compute("a")));
        let c = stable_hash64(&("fn a() {}", ProgramEntryPoints::compute("c")));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
