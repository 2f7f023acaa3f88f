/// Subset of GPU limits relevant for resource allocation and uploads.
#[derive(Debug, Clone, Copy)]
pub struct GpuCapabilities {
    pub min_uniform_buffer_offset_alignment: u32,
    pub min_storage_buffer_offset_alignment: u32,
    pub max_buffer_size: u64,
    pub max_texture_dimension_2d: u32,
    pub max_texture_dimension_3d: u32,
    pub supports_compute: bool,
}

impl GpuCapabilities {
    pub fn from_device(device: &wgpu::Device) -> Self {
        let limits = device.limits();
        Self {
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            min_storage_buffer_offset_alignment: limits.min_storage_buffer_offset_alignment,
            max_buffer_size: limits.max_buffer_size,
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
            max_texture_dimension_3d: limits.max_texture_dimension_3d,
            supports_compute: true,
        }
    }

    pub fn with_downlevel_flags(mut self, flags: wgpu::DownlevelFlags) -> Self {
        self.supports_compute = Self::supports_compute_from_downlevel_flags(flags);
        self
    }

    pub fn supports_compute_from_downlevel_flags(flags: wgpu::DownlevelFlags) -> bool {
        flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
    }
}
