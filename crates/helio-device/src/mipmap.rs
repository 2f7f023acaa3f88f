//! Mipmap regeneration: successive fullscreen-blit downsample passes.

use std::collections::HashMap;
use std::sync::Arc;

use helio_gpu::format::format_info;
use helio_gpu::sampler_cache::SamplerKey;
use helio_gpu::GpuContext;
use tracing::warn;

use crate::texture::TextureResource;

const BLIT_SHADER: &str = r#"
@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOut {
    var out: VertexOut;
    let x = f32(i32(index & 1u) * 4 - 1);
    let y = f32(i32(index & 2u) * 2 - 1);
    out.position = vec4<f32>(x, y, 0.0, 1.0);
    out.uv = vec2<f32>(x * 0.5 + 0.5, 0.5 - y * 0.5);
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    return textureSample(src, src_sampler, in.uv);
}
"#;

/// Renders each mip level from the one above it with a linear-filtered
/// fullscreen triangle. One pipeline per destination format, cached for the
/// device's lifetime.
#[derive(Default)]
pub struct MipmapGenerator {
    module: Option<Arc<wgpu::ShaderModule>>,
    layout: Option<Arc<wgpu::BindGroupLayout>>,
    pipeline_layout: Option<Arc<wgpu::PipelineLayout>>,
    pipelines: HashMap<wgpu::TextureFormat, Arc<wgpu::RenderPipeline>>,
    sampler: Option<Arc<wgpu::Sampler>>,
}

impl MipmapGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop device-derived objects after a device swap.
    pub fn on_device_replaced(&mut self) {
        *self = Self::default();
    }

    fn ensure_shared(&mut self, ctx: &mut GpuContext) {
        if self.module.is_none() {
            self.module = Some(Arc::new(ctx.device.create_shader_module(
                wgpu::ShaderModuleDescriptor {
                    label: Some("helio mipmap blit"),
                    source: wgpu::ShaderSource::Wgsl(BLIT_SHADER.into()),
                },
            )));
        }
        if self.layout.is_none() {
            let layout = ctx.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("helio mipmap blit layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });
            let layout = Arc::new(layout);
            let pipeline_layout =
                ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("helio mipmap blit"),
                    bind_group_layouts: &[&layout],
                    push_constant_ranges: &[],
                });
            self.layout = Some(layout);
            self.pipeline_layout = Some(Arc::new(pipeline_layout));
        }
        if self.sampler.is_none() {
            self.sampler = Some(ctx.samplers.get_or_create(&ctx.device, SamplerKey::default()));
        }
    }

    fn pipeline(
        &mut self,
        ctx: &mut GpuContext,
        format: wgpu::TextureFormat,
    ) -> Arc<wgpu::RenderPipeline> {
        self.ensure_shared(ctx);
        if let Some(pipeline) = self.pipelines.get(&format) {
            return Arc::clone(pipeline);
        }
        let module = self.module.as_ref().unwrap();
        let layout = self.pipeline_layout.as_ref().unwrap();
        let pipeline = ctx.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("helio mipmap blit"),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: "vs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: "fs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        let pipeline = Arc::new(pipeline);
        self.pipelines.insert(format, Arc::clone(&pipeline));
        pipeline
    }

    /// Regenerate every level above 0 for every face/layer of `texture`,
    /// recording into `encoder`. Clears the texture's `mipmap_dirty` flag.
    pub fn generate(
        &mut self,
        ctx: &mut GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        texture: &mut TextureResource,
    ) {
        texture.mipmap_dirty = false;
        if texture.mip_level_count < 2 || texture.is_disposed() {
            return;
        }
        let info = format_info(texture.format);
        if info.is_compressed() || info.is_depth_stencil() {
            warn!(format = ?texture.format, "mipmap generation unsupported for format, skipping");
            return;
        }

        let pipeline = self.pipeline(ctx, texture.format);
        let layout = self.layout.as_ref().unwrap();
        let sampler = self.sampler.as_ref().unwrap();

        let faces = texture.kind.face_count() * texture.depth_or_layers;
        let mips = texture.mip_level_count;
        for face in 0..faces {
            for level in 1..mips {
                let (Some(src), Some(dst)) = (
                    texture.get_view(face, level - 1, 1),
                    texture.get_view(face, level, 1),
                ) else {
                    return;
                };
                let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("helio mipmap blit"),
                    layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&src),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(sampler),
                        },
                    ],
                });
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("helio mipmap blit"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &dst,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
    }
}
