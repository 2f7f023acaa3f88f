//! Framebuffer objects: attachment sets plus the bind-generation counter
//! passes use to detect retargeting.

use helio_gpu::stable_hash64;

use crate::object::{Identity, TextureId};

/// One attachment slot: a texture plus the face/layer and mip level rendered
/// into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentTarget {
    pub texture: TextureId,
    pub face: u32,
    pub level: u32,
}

/// Immutable snapshot of a framebuffer's attachment formats, captured when a
/// pass begins. `hash == 0` means no attachment has been resolved yet and no
/// pipeline can be built against it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FramebufferInfo {
    pub hash: u64,
    pub color_formats: Vec<wgpu::TextureFormat>,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
}

impl FramebufferInfo {
    pub(crate) fn from_formats(
        color_formats: Vec<wgpu::TextureFormat>,
        depth_format: Option<wgpu::TextureFormat>,
        width: u32,
        height: u32,
        sample_count: u32,
    ) -> Self {
        let hash = if color_formats.is_empty() && depth_format.is_none() {
            0
        } else {
            stable_hash64(&(&color_formats, depth_format, sample_count))
        };
        Self {
            hash,
            color_formats,
            depth_format,
            width,
            height,
            sample_count,
        }
    }
}

/// A render target: ordered color attachments plus an optional depth
/// attachment.
///
/// `bind_flag` is a generation counter bumped whenever an attachment is
/// retargeted (texture, face or level change). An active pass captures it at
/// begin; a draw observing a different value forces a pass restart. Merely
/// re-binding the same framebuffer does not bump it.
pub struct FramebufferResource {
    pub(crate) identity: Identity,
    pub(crate) color: Vec<Option<AttachmentTarget>>,
    pub(crate) depth: Option<AttachmentTarget>,
    pub(crate) bind_flag: u64,
    /// Regenerate color attachment mip chains when a pass targeting this
    /// framebuffer ends.
    pub(crate) generate_mipmaps: bool,
}

impl FramebufferResource {
    pub(crate) fn new(color_slots: usize) -> Self {
        Self {
            identity: Identity::new(),
            color: vec![None; color_slots],
            depth: None,
            bind_flag: 0,
            generate_mipmaps: false,
        }
    }

    pub fn uid(&self) -> u64 {
        self.identity.uid
    }

    pub fn bind_flag(&self) -> u64 {
        self.bind_flag
    }

    pub fn set_generate_mipmaps(&mut self, enabled: bool) {
        self.generate_mipmaps = enabled;
    }

    /// Retarget a color slot. Bumps `bind_flag` only when the target
    /// actually changes.
    pub fn set_color_attachment(&mut self, slot: usize, target: Option<AttachmentTarget>) {
        if slot >= self.color.len() {
            return;
        }
        if self.color[slot] != target {
            self.color[slot] = target;
            self.bind_flag += 1;
        }
    }

    /// Retarget the depth attachment. Bumps `bind_flag` only on change.
    pub fn set_depth_attachment(&mut self, target: Option<AttachmentTarget>) {
        if self.depth != target {
            self.depth = target;
            self.bind_flag += 1;
        }
    }

    /// Every texture referenced by an attachment.
    pub(crate) fn attachment_textures(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.color
            .iter()
            .flatten()
            .map(|a| a.texture)
            .chain(self.depth.iter().map(|a| a.texture))
    }

    pub(crate) fn color_targets(&self) -> impl Iterator<Item = &AttachmentTarget> {
        self.color.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(uid: u64) -> AttachmentTarget {
        AttachmentTarget {
            texture: TextureId(uid),
            face: 0,
            level: 0,
        }
    }

    #[test]
    fn bind_flag_bumps_only_on_retarget() {
        let mut fb = FramebufferResource::new(2);
        assert_eq!(fb.bind_flag(), 0);
        fb.set_color_attachment(0, Some(target(1)));
        assert_eq!(fb.bind_flag(), 1);
        // Same target again: no bump.
        fb.set_color_attachment(0, Some(target(1)));
        assert_eq!(fb.bind_flag(), 1);
        // Different level on the same texture: bump.
        fb.set_color_attachment(
            0,
            Some(AttachmentTarget {
                texture: TextureId(1),
                face: 0,
                level: 1,
            }),
        );
        assert_eq!(fb.bind_flag(), 2);
        fb.set_depth_attachment(Some(target(2)));
        assert_eq!(fb.bind_flag(), 3);
        fb.set_depth_attachment(Some(target(2)));
        assert_eq!(fb.bind_flag(), 3);
    }

    #[test]
    fn info_hash_zero_without_attachments() {
        let empty = FramebufferInfo::from_formats(Vec::new(), None, 0, 0, 1);
        assert_eq!(empty.hash, 0);
        let color = FramebufferInfo::from_formats(
            vec![wgpu::TextureFormat::Rgba8Unorm],
            None,
            64,
            64,
            1,
        );
        assert_ne!(color.hash, 0);
        let depth_only = FramebufferInfo::from_formats(
            Vec::new(),
            Some(wgpu::TextureFormat::Depth32Float),
            64,
            64,
            1,
        );
        assert_ne!(depth_only.hash, 0);
        assert_ne!(color.hash, depth_only.hash);
    }

    #[test]
    fn attachment_textures_covers_color_and_depth() {
        let mut fb = FramebufferResource::new(2);
        fb.set_color_attachment(0, Some(target(1)));
        fb.set_color_attachment(1, Some(target(2)));
        fb.set_depth_attachment(Some(target(3)));
        let ids: Vec<u64> = fb.attachment_textures().map(|t| t.uid()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
