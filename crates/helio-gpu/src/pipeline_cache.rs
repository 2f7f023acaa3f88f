use std::collections::HashMap;
use std::sync::Arc;

use crate::pipeline_key::{ComputePipelineKey, PipelineLayoutKey, RenderPipelineKey};
use crate::stats::CacheStats;

/// Everything needed to build a render pipeline on a cache miss.
///
/// The caller assembles the wgpu state fragments (targets, depth/stencil,
/// vertex buffers); the cache only decides whether creation happens.
pub struct RenderPipelineDesc<'a> {
    pub label: Option<&'a str>,
    pub layout: &'a wgpu::PipelineLayout,
    pub module: &'a wgpu::ShaderModule,
    pub vertex_entry: &'a str,
    pub fragment_entry: Option<&'a str>,
    pub buffers: &'a [wgpu::VertexBufferLayout<'a>],
    pub targets: &'a [Option<wgpu::ColorTargetState>],
    pub depth_stencil: Option<wgpu::DepthStencilState>,
    pub primitive: wgpu::PrimitiveState,
    pub multisample: wgpu::MultisampleState,
}

pub struct ComputePipelineDesc<'a> {
    pub label: Option<&'a str>,
    pub layout: &'a wgpu::PipelineLayout,
    pub module: &'a wgpu::ShaderModule,
    pub entry: &'a str,
}

/// Cache of render/compute pipelines and pipeline layouts, keyed by the
/// structural keys in [`crate::pipeline_key`].
///
/// Entries are inserted only after successful creation; a build that never
/// completes leaves no record and is retried on the next access.
#[derive(Default)]
pub struct PipelineCache {
    render: HashMap<RenderPipelineKey, Arc<wgpu::RenderPipeline>>,
    compute: HashMap<ComputePipelineKey, Arc<wgpu::ComputePipeline>>,
    layouts: HashMap<PipelineLayoutKey, Arc<wgpu::PipelineLayout>>,
    render_hits: u64,
    render_misses: u64,
    compute_hits: u64,
    compute_misses: u64,
    layout_hits: u64,
    layout_misses: u64,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_layout(
        &mut self,
        device: &wgpu::Device,
        key: &PipelineLayoutKey,
        bind_group_layouts: &[&wgpu::BindGroupLayout],
    ) -> Arc<wgpu::PipelineLayout> {
        if let Some(layout) = self.layouts.get(key) {
            self.layout_hits += 1;
            return Arc::clone(layout);
        }

        self.layout_misses += 1;
        let layout = Arc::new(device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("helio pipeline layout"),
            bind_group_layouts,
            push_constant_ranges: &[],
        }));
        self.layouts.insert(key.clone(), Arc::clone(&layout));
        layout
    }

    /// Fetch or build a render pipeline.
    ///
    /// Returns `None` when the key carries no framebuffer hash: the caller
    /// has not resolved a render target yet and must not draw.
    pub fn get_or_create_render(
        &mut self,
        device: &wgpu::Device,
        key: RenderPipelineKey,
        desc: RenderPipelineDesc<'_>,
    ) -> Option<Arc<wgpu::RenderPipeline>> {
        if key.framebuffer == 0 {
            return None;
        }

        if let Some(pipeline) = self.render.get(&key) {
            self.render_hits += 1;
            return Some(Arc::clone(pipeline));
        }

        self.render_misses += 1;
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: desc.label,
            layout: Some(desc.layout),
            vertex: wgpu::VertexState {
                module: desc.module,
                entry_point: desc.vertex_entry,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: desc.buffers,
            },
            fragment: desc.fragment_entry.map(|entry| wgpu::FragmentState {
                module: desc.module,
                entry_point: entry,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: desc.targets,
            }),
            primitive: desc.primitive,
            depth_stencil: desc.depth_stencil,
            multisample: desc.multisample,
            multiview: None,
        });

        let pipeline = Arc::new(pipeline);
        self.render.insert(key, Arc::clone(&pipeline));
        Some(pipeline)
    }

    pub fn get_or_create_compute(
        &mut self,
        device: &wgpu::Device,
        key: ComputePipelineKey,
        desc: ComputePipelineDesc<'_>,
    ) -> Arc<wgpu::ComputePipeline> {
        if let Some(pipeline) = self.compute.get(&key) {
            self.compute_hits += 1;
            return Arc::clone(pipeline);
        }

        self.compute_misses += 1;
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: desc.label,
            layout: Some(desc.layout),
            module: desc.module,
            entry_point: desc.entry,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        let pipeline = Arc::new(pipeline);
        self.compute.insert(key, Arc::clone(&pipeline));
        pipeline
    }

    /// Drop every cached object (device replacement: pipelines from the old
    /// device must never be reused).
    pub fn clear(&mut self) {
        self.render.clear();
        self.compute.clear();
        self.layouts.clear();
    }

    pub fn render_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.render_hits,
            misses: self.render_misses,
            entries: self.render.len(),
        }
    }

    pub fn compute_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.compute_hits,
            misses: self.compute_misses,
            entries: self.compute.len(),
        }
    }

    pub fn layout_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.layout_hits,
            misses: self.layout_misses,
            entries: self.layouts.len(),
        }
    }
}
