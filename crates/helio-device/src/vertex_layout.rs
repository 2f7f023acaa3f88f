//! Vertex buffer layouts, filtered per-program to the attribute subset the
//! program actually consumes.

use helio_gpu::stable_hash64;

use crate::object::Identity;

/// One named attribute within a vertex buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexAttributeDesc {
    /// Semantic name matched against the program's input attributes.
    pub name: String,
    pub format: wgpu::VertexFormat,
    pub offset: u64,
}

/// One vertex buffer slot.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexBufferDesc {
    pub stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<VertexAttributeDesc>,
}

/// Owned form of `wgpu::VertexBufferLayout`, held so the borrowed layouts can
/// be materialized at pipeline-build time.
#[derive(Debug, Clone)]
pub struct OwnedVertexBufferLayout {
    pub array_stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

impl OwnedVertexBufferLayout {
    pub fn as_wgpu(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.array_stride,
            step_mode: self.step_mode,
            attributes: &self.attributes,
        }
    }
}

/// A vertex layout resource: the full description of every buffer slot and
/// attribute. Programs consume subsets of it; the pipeline cache keys on the
/// subset, not the full layout.
pub struct VertexLayoutResource {
    pub(crate) identity: Identity,
    pub(crate) buffers: Vec<VertexBufferDesc>,
}

impl VertexLayoutResource {
    pub(crate) fn new(buffers: Vec<VertexBufferDesc>) -> Self {
        Self {
            identity: Identity::new(),
            buffers,
        }
    }

    pub fn uid(&self) -> u64 {
        self.identity.uid
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Hash of the layout as seen by a program consuming `consumed`
    /// attributes (name, shader location pairs). Two programs sharing this
    /// layout but reading different attributes hash differently.
    pub(crate) fn subset_hash(&self, consumed: &[(String, u32)]) -> u64 {
        let mut key: Vec<(u64, u32, u64, u32, u32)> = Vec::new();
        for (slot, buffer) in self.buffers.iter().enumerate() {
            for attr in &buffer.attributes {
                if let Some((_, location)) = consumed.iter().find(|(name, _)| *name == attr.name) {
                    key.push((
                        slot as u64,
                        attr.format as u32,
                        attr.offset,
                        *location,
                        buffer.step_mode as u32,
                    ));
                }
            }
        }
        stable_hash64(&(key, self.strides()))
    }

    fn strides(&self) -> Vec<u64> {
        self.buffers.iter().map(|b| b.stride).collect()
    }

    /// Materialize the wgpu buffer layouts for a program's consumed
    /// attribute set. Buffer slots contributing no consumed attribute still
    /// appear (empty attribute list) so slot indices stay stable for
    /// `set_vertex_buffer`.
    pub(crate) fn filtered_layouts(&self, consumed: &[(String, u32)]) -> Vec<OwnedVertexBufferLayout> {
        self.buffers
            .iter()
            .map(|buffer| OwnedVertexBufferLayout {
                array_stride: buffer.stride,
                step_mode: buffer.step_mode,
                attributes: buffer
                    .attributes
                    .iter()
                    .filter_map(|attr| {
                        consumed
                            .iter()
                            .find(|(name, _)| *name == attr.name)
                            .map(|(_, location)| wgpu::VertexAttribute {
                                format: attr.format,
                                offset: attr.offset,
                                shader_location: *location,
                            })
                    })
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> VertexLayoutResource {
        VertexLayoutResource::new(vec![VertexBufferDesc {
            stride: 32,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: vec![
                VertexAttributeDesc {
                    name: "position".into(),
                    format: wgpu::VertexFormat::Float32x3,
                    offset: 0,
                },
                VertexAttributeDesc {
                    name: "normal".into(),
                    format: wgpu::VertexFormat::Float32x3,
                    offset: 12,
                },
                VertexAttributeDesc {
                    name: "uv".into(),
                    format: wgpu::VertexFormat::Float32x2,
                    offset: 24,
                },
            ],
        }])
    }

    #[test]
    fn subset_hash_depends_on_consumed_attributes() {
        let layout = layout();
        let full = vec![
            ("position".to_string(), 0),
            ("normal".to_string(), 1),
            ("uv".to_string(), 2),
        ];
        let position_only = vec![("position".to_string(), 0)];
        assert_ne!(layout.subset_hash(&full), layout.subset_hash(&position_only));
        assert_eq!(layout.subset_hash(&full), layout.subset_hash(&full));
    }

    #[test]
    fn filtered_layout_drops_unconsumed_attributes() {
        let layout = layout();
        let consumed = vec![("position".to_string(), 0), ("uv".to_string(), 1)];
        let filtered = layout.filtered_layouts(&consumed);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].attributes.len(), 2);
        assert_eq!(filtered[0].attributes[0].shader_location, 0);
        assert_eq!(filtered[0].attributes[1].shader_location, 1);
        assert_eq!(filtered[0].attributes[1].offset, 24);
        assert_eq!(filtered[0].array_stride, 32);
    }

    #[test]
    fn unknown_attribute_names_are_ignored() {
        let layout = layout();
        let consumed = vec![("tangent".to_string(), 0)];
        let filtered = layout.filtered_layouts(&consumed);
        assert!(filtered[0].attributes.is_empty());
    }
}
