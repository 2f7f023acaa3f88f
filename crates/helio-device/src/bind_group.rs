//! Bind groups: named resource slots over a cached layout, with tombstone
//! invalidation of the native object.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use helio_gpu::layout_cache::CachedBindGroupLayout;
use helio_gpu::sampler_cache::SamplerKey;
use helio_gpu::GpuContext;
use tracing::warn;

use crate::buffer::BufferResource;
use crate::object::{BufferId, Identity, TextureId};
use crate::texture::TextureResource;

/// What a layout slot expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer { read_only: bool },
    Texture {
        sample_type: wgpu::TextureSampleType,
        dimension: wgpu::TextureViewDimension,
    },
    Sampler { comparison: bool },
    /// Inline uniform value backed by a buffer the bind group owns.
    Value { size: u64 },
}

/// One named slot in a bind group layout.
#[derive(Debug, Clone)]
pub struct BindingDesc {
    pub name: String,
    pub binding: u32,
    pub visibility: wgpu::ShaderStages,
    pub kind: BindingKind,
    /// For texture slots: the name of a sampler slot auto-populated from the
    /// texture's default sampler unless one is set explicitly.
    pub auto_sampler: Option<String>,
}

impl BindingDesc {
    fn layout_entry(&self) -> wgpu::BindGroupLayoutEntry {
        let ty = match self.kind {
            BindingKind::UniformBuffer | BindingKind::Value { .. } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingKind::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingKind::Texture {
                sample_type,
                dimension,
            } => wgpu::BindingType::Texture {
                sample_type,
                view_dimension: dimension,
                multisampled: false,
            },
            BindingKind::Sampler { comparison } => wgpu::BindingType::Sampler(if comparison {
                wgpu::SamplerBindingType::Comparison
            } else {
                wgpu::SamplerBindingType::Filtering
            }),
        };
        wgpu::BindGroupLayoutEntry {
            binding: self.binding,
            visibility: self.visibility,
            ty,
            count: None,
        }
    }
}

/// The resource currently occupying a slot.
#[derive(Debug, Clone, PartialEq)]
enum Binding {
    Buffer(BufferId),
    Texture {
        id: TextureId,
        /// (face, base level, mip count); `None` samples the default view.
        view: Option<(u32, u32, u32)>,
    },
    Sampler {
        key: SamplerKey,
        /// Explicit samplers win over auto-bound companions.
        explicit: bool,
    },
    /// Bytes waiting to be written into the slot's owned uniform buffer.
    Value,
}

pub struct BindGroupResource {
    pub(crate) identity: Identity,
    entries: Vec<BindingDesc>,
    name_remap: HashMap<String, String>,
    bound: HashMap<u32, Binding>,
    /// Owned uniform buffers for `Value` slots, created lazily at build.
    value_buffers: HashMap<u32, Arc<wgpu::Buffer>>,
    /// Value bytes not yet written (buffer does not exist yet).
    value_pending: HashMap<u32, Vec<u8>>,
    native: Option<Arc<wgpu::BindGroup>>,
    layout: Option<CachedBindGroupLayout>,
}

impl BindGroupResource {
    pub(crate) fn new(entries: Vec<BindingDesc>, name_remap: HashMap<String, String>) -> Self {
        Self {
            identity: Identity::new(),
            entries,
            name_remap,
            bound: HashMap::new(),
            value_buffers: HashMap::new(),
            value_pending: HashMap::new(),
            native: None,
            layout: None,
        }
    }

    pub fn uid(&self) -> u64 {
        self.identity.uid
    }

    /// True when the cached native bind group is live (no rebuild needed).
    pub fn is_built(&self) -> bool {
        self.native.is_some()
    }

    fn resolve(&self, name: &str) -> Result<&BindingDesc> {
        let name = self.name_remap.get(name).map(String::as_str).unwrap_or(name);
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| anyhow!("no binding named {name:?}"))
    }

    fn set(&mut self, binding: u32, value: Binding) {
        // Re-setting the identical resource keeps the cached native object.
        if self.bound.get(&binding) == Some(&value) {
            return;
        }
        self.bound.insert(binding, value);
        self.native = None;
    }

    pub fn set_buffer(&mut self, name: &str, buffer: BufferId) -> Result<()> {
        let entry = self.resolve(name)?;
        if !matches!(
            entry.kind,
            BindingKind::UniformBuffer | BindingKind::StorageBuffer { .. }
        ) {
            bail!("binding {name:?} is not a buffer slot");
        }
        let binding = entry.binding;
        self.set(binding, Binding::Buffer(buffer));
        Ok(())
    }

    pub fn set_texture(&mut self, name: &str, texture: TextureId, default_sampler: SamplerKey) -> Result<()> {
        self.set_texture_view_inner(name, texture, None, default_sampler)
    }

    /// Bind a specific (face, base level, mip count) view.
    pub fn set_texture_view(
        &mut self,
        name: &str,
        texture: TextureId,
        view: (u32, u32, u32),
        default_sampler: SamplerKey,
    ) -> Result<()> {
        self.set_texture_view_inner(name, texture, Some(view), default_sampler)
    }

    fn set_texture_view_inner(
        &mut self,
        name: &str,
        texture: TextureId,
        view: Option<(u32, u32, u32)>,
        default_sampler: SamplerKey,
    ) -> Result<()> {
        let entry = self.resolve(name)?;
        if !matches!(entry.kind, BindingKind::Texture { .. }) {
            bail!("binding {name:?} is not a texture slot");
        }
        let binding = entry.binding;
        let auto_sampler = entry.auto_sampler.clone();
        self.set(binding, Binding::Texture { id: texture, view });

        // Companion sampler: populated from the texture's default unless an
        // explicit sampler occupies the slot.
        if let Some(sampler_name) = auto_sampler {
            let sampler_entry = self.resolve(&sampler_name)?;
            let comparison = matches!(sampler_entry.kind, BindingKind::Sampler { comparison: true });
            let sampler_binding = sampler_entry.binding;
            let explicit_set = matches!(
                self.bound.get(&sampler_binding),
                Some(Binding::Sampler { explicit: true, .. })
            );
            if !explicit_set {
                let key = if comparison && !default_sampler.is_comparison() {
                    SamplerKey {
                        compare: Some(wgpu::CompareFunction::LessEqual),
                        ..default_sampler
                    }
                } else {
                    default_sampler
                };
                self.set(sampler_binding, Binding::Sampler { key, explicit: false });
            }
        }
        Ok(())
    }

    pub fn set_sampler(&mut self, name: &str, key: SamplerKey) -> Result<()> {
        let entry = self.resolve(name)?;
        let BindingKind::Sampler { comparison } = entry.kind else {
            bail!("binding {name:?} is not a sampler slot");
        };
        if comparison != key.is_comparison() {
            bail!("sampler compare mode mismatch for binding {name:?}");
        }
        let binding = entry.binding;
        self.set(binding, Binding::Sampler { key, explicit: true });
        Ok(())
    }

    /// Write a POD value into a `Value` slot's owned uniform buffer.
    pub fn set_value<T: bytemuck::Pod>(&mut self, ctx: &GpuContext, name: &str, value: &T) -> Result<()> {
        self.set_raw_data(ctx, name, bytemuck::bytes_of(value))
    }

    /// Write raw bytes into a `Value` slot's owned uniform buffer.
    ///
    /// When the buffer already exists the bytes go straight through the
    /// queue and the cached bind group survives (buffer identity is
    /// unchanged). Before first build the bytes are held until the buffer is
    /// created.
    pub fn set_raw_data(&mut self, ctx: &GpuContext, name: &str, bytes: &[u8]) -> Result<()> {
        let entry = self.resolve(name)?;
        let BindingKind::Value { size } = entry.kind else {
            bail!("binding {name:?} is not a value slot");
        };
        if bytes.len() as u64 > size {
            bail!(
                "value for binding {name:?} is {} bytes, slot holds {size}",
                bytes.len()
            );
        }
        let binding = entry.binding;
        if let Some(buffer) = self.value_buffers.get(&binding) {
            ctx.queue.write_buffer(buffer, 0, bytes);
        } else {
            self.value_pending.insert(binding, bytes.to_vec());
        }
        self.set(binding, Binding::Value);
        Ok(())
    }

    /// Buffers currently bound (for draw validation and upload tracking).
    pub(crate) fn bound_buffers(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.bound.values().filter_map(|b| match b {
            Binding::Buffer(id) => Some(*id),
            _ => None,
        })
    }

    /// Textures currently bound.
    pub(crate) fn bound_textures(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.bound.values().filter_map(|b| match b {
            Binding::Texture { id, .. } => Some(*id),
            _ => None,
        })
    }

    /// The cached layout, creating it on first use.
    pub(crate) fn layout(&mut self, ctx: &mut GpuContext) -> CachedBindGroupLayout {
        if let Some(layout) = &self.layout {
            return layout.clone();
        }
        let entries: Vec<wgpu::BindGroupLayoutEntry> =
            self.entries.iter().map(BindingDesc::layout_entry).collect();
        let layout = ctx.bind_group_layouts.get_or_create(&ctx.device, &entries);
        self.layout = Some(layout.clone());
        layout
    }

    /// Drop device-derived state after a device swap.
    pub(crate) fn on_device_replaced(&mut self) {
        self.native = None;
        self.layout = None;
        self.value_buffers.clear();
    }

    /// Lazily (re)build the native bind group.
    ///
    /// Walks layout slots in order resolving each to a native resource.
    /// Returns `None` (and logs) when any required resource is unset or
    /// disposed; nothing partial is ever produced, and the next access
    /// retries.
    pub(crate) fn build(
        &mut self,
        ctx: &mut GpuContext,
        buffers: &HashMap<BufferId, BufferResource>,
        textures: &mut HashMap<TextureId, TextureResource>,
    ) -> Option<Arc<wgpu::BindGroup>> {
        if let Some(native) = &self.native {
            return Some(Arc::clone(native));
        }

        enum Resolved {
            Buffer(Arc<wgpu::Buffer>),
            View(Arc<wgpu::TextureView>),
            Sampler(Arc<wgpu::Sampler>),
        }

        let mut resolved: Vec<(u32, Resolved)> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let bound = self.bound.get(&entry.binding);
            match (&entry.kind, bound) {
                (BindingKind::UniformBuffer | BindingKind::StorageBuffer { .. }, Some(Binding::Buffer(id))) => {
                    let Some(native) = buffers.get(id).and_then(|b| b.native.clone()) else {
                        warn!(binding = %entry.name, "bind group build: buffer missing or disposed");
                        return None;
                    };
                    resolved.push((entry.binding, Resolved::Buffer(native)));
                }
                (BindingKind::Texture { .. }, Some(Binding::Texture { id, view })) => {
                    let Some(texture) = textures.get_mut(id) else {
                        warn!(binding = %entry.name, "bind group build: texture missing");
                        return None;
                    };
                    let view = match view {
                        Some((face, level, count)) => texture.get_view(*face, *level, *count),
                        None => texture.default_view(),
                    };
                    let Some(view) = view else {
                        warn!(binding = %entry.name, "bind group build: texture disposed");
                        return None;
                    };
                    resolved.push((entry.binding, Resolved::View(view)));
                }
                (BindingKind::Sampler { .. }, Some(Binding::Sampler { key, .. })) => {
                    let sampler = ctx.samplers.get_or_create(&ctx.device, *key);
                    resolved.push((entry.binding, Resolved::Sampler(sampler)));
                }
                (BindingKind::Value { size }, _) => {
                    let buffer = match self.value_buffers.get(&entry.binding) {
                        Some(buffer) => Arc::clone(buffer),
                        None => {
                            let buffer = Arc::new(ctx.device.create_buffer(&wgpu::BufferDescriptor {
                                label: Some("helio bind group value"),
                                size: helio_gpu::align_up(*size, 16),
                                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                                mapped_at_creation: false,
                            }));
                            if let Some(bytes) = self.value_pending.remove(&entry.binding) {
                                ctx.queue.write_buffer(&buffer, 0, &bytes);
                            }
                            self.value_buffers.insert(entry.binding, Arc::clone(&buffer));
                            buffer
                        }
                    };
                    resolved.push((entry.binding, Resolved::Buffer(buffer)));
                }
                _ => {
                    warn!(binding = %entry.name, "bind group build: required binding unset");
                    return None;
                }
            }
        }

        let layout = self.layout(ctx);
        let entries: Vec<wgpu::BindGroupEntry> = resolved
            .iter()
            .map(|(binding, res)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: match res {
                    Resolved::Buffer(b) => b.as_entire_binding(),
                    Resolved::View(v) => wgpu::BindingResource::TextureView(v),
                    Resolved::Sampler(s) => wgpu::BindingResource::Sampler(s),
                },
            })
            .collect();
        let native = Arc::new(ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("helio bind group"),
            layout: &layout.layout,
            entries: &entries,
        }));
        self.native = Some(Arc::clone(&native));
        Some(native)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture_entry() -> Vec<BindingDesc> {
        vec![
            BindingDesc {
                name: "albedo".into(),
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                kind: BindingKind::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    dimension: wgpu::TextureViewDimension::D2,
                },
                auto_sampler: Some("albedo_sampler".into()),
            },
            BindingDesc {
                name: "albedo_sampler".into(),
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                kind: BindingKind::Sampler { comparison: false },
                auto_sampler: None,
            },
        ]
    }

    #[test]
    fn rebinding_same_texture_keeps_tombstone_state() {
        let mut group = BindGroupResource::new(texture_entry(), HashMap::new());
        let id = TextureId(7);
        group.set_texture("albedo", id, SamplerKey::default()).unwrap();
        // No native object exists yet, but the bound map must be unchanged by
        // an identical re-set (no needless invalidation once built).
        let before = group.bound.clone();
        group.set_texture("albedo", id, SamplerKey::default()).unwrap();
        assert_eq!(group.bound, before);
        // A different texture changes the slot.
        group.set_texture("albedo", TextureId(8), SamplerKey::default()).unwrap();
        assert_ne!(group.bound, before);
    }

    #[test]
    fn auto_sampler_defers_to_explicit() {
        let mut group = BindGroupResource::new(texture_entry(), HashMap::new());
        group.set_sampler("albedo_sampler", SamplerKey::nearest()).unwrap();
        group
            .set_texture("albedo", TextureId(1), SamplerKey::default())
            .unwrap();
        match group.bound.get(&1) {
            Some(Binding::Sampler { key, explicit }) => {
                assert!(*explicit);
                assert_eq!(key.mag_filter, wgpu::FilterMode::Nearest);
            }
            other => panic!("unexpected sampler slot: {other:?}"),
        }
    }

    #[test]
    fn auto_sampler_follows_texture_default() {
        let mut group = BindGroupResource::new(texture_entry(), HashMap::new());
        group
            .set_texture("albedo", TextureId(1), SamplerKey::nearest())
            .unwrap();
        match group.bound.get(&1) {
            Some(Binding::Sampler { key, explicit }) => {
                assert!(!*explicit);
                assert_eq!(key.mag_filter, wgpu::FilterMode::Nearest);
            }
            other => panic!("unexpected sampler slot: {other:?}"),
        }
    }

    #[test]
    fn name_remap_resolves_setters() {
        let mut remap = HashMap::new();
        remap.insert("diffuse".to_string(), "albedo".to_string());
        let mut group = BindGroupResource::new(texture_entry(), remap);
        group
            .set_texture("diffuse", TextureId(1), SamplerKey::default())
            .unwrap();
        assert!(group.bound.contains_key(&0));
    }

    #[test]
    fn kind_mismatch_is_a_hard_error() {
        let mut group = BindGroupResource::new(texture_entry(), HashMap::new());
        assert!(group.set_buffer("albedo", BufferId(1)).is_err());
        assert!(group.set_sampler("albedo", SamplerKey::default()).is_err());
        assert!(group
            .set_texture("missing", TextureId(1), SamplerKey::default())
            .is_err());
    }

    #[test]
    fn comparison_mismatch_rejected() {
        let mut group = BindGroupResource::new(texture_entry(), HashMap::new());
        let err = group.set_sampler(
            "albedo_sampler",
            SamplerKey::with_compare(wgpu::CompareFunction::Less),
        );
        assert!(err.is_err());
    }
}
