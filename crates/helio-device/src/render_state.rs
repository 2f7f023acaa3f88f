//! Fixed-function render state: blend, depth/stencil, raster.
//!
//! The set hashes structurally into the pipeline cache key. Float fields are
//! hashed through their bit patterns so the key derives `Hash` without
//! rounding surprises.

use helio_gpu::format::FormatInfo;
use helio_gpu::stable_hash64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendStateDesc {
    pub enabled: bool,
    pub src_color: wgpu::BlendFactor,
    pub dst_color: wgpu::BlendFactor,
    pub color_op: wgpu::BlendOperation,
    pub src_alpha: wgpu::BlendFactor,
    pub dst_alpha: wgpu::BlendFactor,
    pub alpha_op: wgpu::BlendOperation,
    pub write_mask: wgpu::ColorWrites,
}

impl Default for BlendStateDesc {
    fn default() -> Self {
        Self {
            enabled: false,
            src_color: wgpu::BlendFactor::One,
            dst_color: wgpu::BlendFactor::Zero,
            color_op: wgpu::BlendOperation::Add,
            src_alpha: wgpu::BlendFactor::One,
            dst_alpha: wgpu::BlendFactor::Zero,
            alpha_op: wgpu::BlendOperation::Add,
            write_mask: wgpu::ColorWrites::ALL,
        }
    }
}

impl BlendStateDesc {
    pub fn alpha_blend() -> Self {
        Self {
            enabled: true,
            src_color: wgpu::BlendFactor::SrcAlpha,
            dst_color: wgpu::BlendFactor::OneMinusSrcAlpha,
            src_alpha: wgpu::BlendFactor::One,
            dst_alpha: wgpu::BlendFactor::OneMinusSrcAlpha,
            ..Self::default()
        }
    }

    fn to_wgpu(self) -> Option<wgpu::BlendState> {
        if !self.enabled {
            return None;
        }
        Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: self.src_color,
                dst_factor: self.dst_color,
                operation: self.color_op,
            },
            alpha: wgpu::BlendComponent {
                src_factor: self.src_alpha,
                dst_factor: self.dst_alpha,
                operation: self.alpha_op,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStateDesc {
    pub test_enabled: bool,
    pub write_enabled: bool,
    pub compare: wgpu::CompareFunction,
    pub bias: i32,
    /// `f32::to_bits` of the slope-scaled bias.
    pub bias_slope_scale_bits: u32,
}

impl Default for DepthStateDesc {
    fn default() -> Self {
        Self {
            test_enabled: true,
            write_enabled: true,
            compare: wgpu::CompareFunction::LessEqual,
            bias: 0,
            bias_slope_scale_bits: 0f32.to_bits(),
        }
    }
}

impl DepthStateDesc {
    pub fn set_bias_slope_scale(&mut self, value: f32) {
        self.bias_slope_scale_bits = value.to_bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RasterStateDesc {
    pub cull_mode: Option<wgpu::Face>,
}

/// The complete fixed-function state set bound on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderStateSet {
    pub blend: BlendStateDesc,
    pub depth: DepthStateDesc,
    pub raster: RasterStateDesc,
}

impl RenderStateSet {
    /// Structural hash fed into the pipeline cache key.
    pub fn hash(&self) -> u64 {
        stable_hash64(self)
    }

    pub(crate) fn primitive(
        &self,
        topology: wgpu::PrimitiveTopology,
        front_face_ccw: bool,
    ) -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology,
            strip_index_format: None,
            front_face: if front_face_ccw {
                wgpu::FrontFace::Ccw
            } else {
                wgpu::FrontFace::Cw
            },
            cull_mode: self.raster.cull_mode,
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        }
    }

    /// Depth/stencil descriptor for a given depth attachment, or `None` when
    /// the framebuffer carries no depth attachment. Gated on the format's
    /// actual aspects so a color-only target never claims depth state.
    pub(crate) fn depth_stencil(
        &self,
        depth_format: Option<(wgpu::TextureFormat, FormatInfo)>,
    ) -> Option<wgpu::DepthStencilState> {
        let (format, info) = depth_format?;
        if !info.is_depth_stencil() {
            return None;
        }
        Some(wgpu::DepthStencilState {
            format,
            depth_write_enabled: self.depth.write_enabled,
            depth_compare: if self.depth.test_enabled {
                self.depth.compare
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState {
                constant: self.depth.bias,
                slope_scale: f32::from_bits(self.depth.bias_slope_scale_bits),
                clamp: 0.0,
            },
        })
    }

    /// Color target state for one attachment format.
    pub(crate) fn color_target(&self, format: wgpu::TextureFormat) -> wgpu::ColorTargetState {
        wgpu::ColorTargetState {
            format,
            blend: self.blend.to_wgpu(),
            write_mask: self.blend.write_mask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helio_gpu::format::format_info;

    #[test]
    fn hash_varies_with_state() {
        let base = RenderStateSet::default();
        let mut blended = base;
        blended.blend = BlendStateDesc::alpha_blend();
        assert_ne!(base.hash(), blended.hash());
        assert_eq!(base.hash(), RenderStateSet::default().hash());
    }

    #[test]
    fn depth_state_gated_on_format_aspects() {
        let states = RenderStateSet::default();
        let depth = wgpu::TextureFormat::Depth32Float;
        let color = wgpu::TextureFormat::Rgba8Unorm;
        assert!(states
            .depth_stencil(Some((depth, format_info(depth))))
            .is_some());
        assert!(states
            .depth_stencil(Some((color, format_info(color))))
            .is_none());
        assert!(states.depth_stencil(None).is_none());
    }

    #[test]
    fn disabled_depth_test_compares_always() {
        let mut states = RenderStateSet::default();
        states.depth.test_enabled = false;
        let depth = wgpu::TextureFormat::Depth24PlusStencil8;
        let ds = states.depth_stencil(Some((depth, format_info(depth)))).unwrap();
        assert_eq!(ds.depth_compare, wgpu::CompareFunction::Always);
    }

    #[test]
    fn disabled_blend_omits_blend_state() {
        let states = RenderStateSet::default();
        let target = states.color_target(wgpu::TextureFormat::Rgba8Unorm);
        assert!(target.blend.is_none());
        assert_eq!(target.write_mask, wgpu::ColorWrites::ALL);
    }
}
