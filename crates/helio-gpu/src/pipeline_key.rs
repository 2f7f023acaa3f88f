//! Structural cache keys for pipelines and pipeline layouts.
//!
//! Keys are tuples of small integers/enums with derived `Hash`; no string
//! concatenation happens on the hot path.

/// Key identifying a render pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPipelineKey {
    /// Hash of the shader program (module source + entry points).
    pub program: u64,
    /// Hash of the vertex-attribute subset the program consumes. Two
    /// programs sharing a vertex buffer but reading different attributes get
    /// different keys.
    pub vertex_layout: u64,
    /// Hash of the framebuffer's attachment formats and sample count. Zero
    /// means "no framebuffer resolved yet" and is never a valid key.
    pub framebuffer: u64,
    pub topology: wgpu::PrimitiveTopology,
    /// Hash of blend/depth/stencil/cull render state.
    pub state: u64,
    pub front_face_ccw: bool,
}

/// Key identifying a compute pipeline: purely a function of the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputePipelineKey {
    pub program: u64,
}

/// Key identifying a pipeline layout by its bind group layout hashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineLayoutKey {
    pub bind_group_layout_hashes: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stable_hash64;

    #[test]
    fn render_key_varies_with_vertex_subset() {
        let base = RenderPipelineKey {
            program: 1,
            vertex_layout: 10,
            framebuffer: 20,
            topology: wgpu::PrimitiveTopology::TriangleList,
            state: 30,
            front_face_ccw: true,
        };
        let other = RenderPipelineKey {
            vertex_layout: 11,
            ..base
        };
        assert_ne!(stable_hash64(&base), stable_hash64(&other));
        assert_ne!(base, other);
    }

    #[test]
    fn layout_key_is_order_sensitive() {
        let a = PipelineLayoutKey {
            bind_group_layout_hashes: vec![1, 2],
        };
        let b = PipelineLayoutKey {
            bind_group_layout_hashes: vec![2, 1],
        };
        assert_ne!(a, b);
    }
}
