use crate::layout_cache::BindGroupLayoutCache;
use crate::pipeline_cache::PipelineCache;
use crate::sampler_cache::SamplerCache;
use crate::GpuCapabilities;

/// Wrapper around a `wgpu::Device`/`wgpu::Queue` pair that owns the shared
/// caches.
///
/// When a device is lost and recreated, pipelines, layouts and samplers from
/// the previous device become invalid. [`GpuContext::replace_device`] clears
/// the caches so old objects are never reused. There is no hidden global
/// state: components receive this context by reference.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub capabilities: GpuCapabilities,
    pub pipelines: PipelineCache,
    pub bind_group_layouts: BindGroupLayoutCache,
    pub samplers: SamplerCache,
}

impl GpuContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, capabilities: GpuCapabilities) -> Self {
        Self {
            device,
            queue,
            capabilities,
            pipelines: PipelineCache::new(),
            bind_group_layouts: BindGroupLayoutCache::new(),
            samplers: SamplerCache::new(),
        }
    }

    /// Replace the underlying device/queue (device-lost recovery).
    ///
    /// Clears every cache tied to the old device.
    pub fn replace_device(
        &mut self,
        device: wgpu::Device,
        queue: wgpu::Queue,
        capabilities: GpuCapabilities,
    ) {
        self.device = device;
        self.queue = queue;
        self.capabilities = capabilities;
        self.pipelines.clear();
        self.bind_group_layouts.clear();
        self.samplers.clear();
    }
}
