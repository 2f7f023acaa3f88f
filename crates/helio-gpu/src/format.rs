//! Texture format metadata needed for upload row-stride math and
//! depth/stencil pipeline-state gating.

use crate::arena::align_up;

/// Block/aspect metadata for a texture format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    /// Texel width of one block (1 for uncompressed formats).
    pub block_width: u32,
    /// Texel height of one block (1 for uncompressed formats).
    pub block_height: u32,
    /// Bytes per block (bytes per texel for uncompressed formats).
    pub block_size: u32,
    pub has_depth: bool,
    pub has_stencil: bool,
}

impl FormatInfo {
    pub fn is_compressed(&self) -> bool {
        self.block_width > 1 || self.block_height > 1
    }

    pub fn is_depth_stencil(&self) -> bool {
        self.has_depth || self.has_stencil
    }

    /// Number of blocks covering `width` texels.
    pub fn blocks_wide(&self, width: u32) -> u32 {
        width.div_ceil(self.block_width)
    }

    /// Number of block rows covering `height` texels.
    pub fn block_rows(&self, height: u32) -> u32 {
        height.div_ceil(self.block_height)
    }

    /// Tight bytes-per-row for `width` texels (no 256-byte padding).
    pub fn unpadded_bytes_per_row(&self, width: u32) -> u32 {
        self.blocks_wide(width) * self.block_size
    }

    /// Bytes-per-row padded to WebGPU's buffer-copy row alignment.
    pub fn padded_bytes_per_row(&self, width: u32) -> u32 {
        align_up(
            self.unpadded_bytes_per_row(width) as u64,
            wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64,
        ) as u32
    }
}

/// Metadata lookup for the formats the device layer supports.
pub fn format_info(format: wgpu::TextureFormat) -> FormatInfo {
    use wgpu::TextureFormat as F;

    let uncompressed = |block_size| FormatInfo {
        block_width: 1,
        block_height: 1,
        block_size,
        has_depth: false,
        has_stencil: false,
    };
    let bc = |block_size| FormatInfo {
        block_width: 4,
        block_height: 4,
        block_size,
        has_depth: false,
        has_stencil: false,
    };

    match format {
        F::R8Unorm | F::R8Snorm | F::R8Uint | F::R8Sint => uncompressed(1),
        F::R16Uint | F::R16Sint | F::R16Float | F::Rg8Unorm | F::Rg8Snorm | F::Rg8Uint
        | F::Rg8Sint => uncompressed(2),
        F::R32Uint | F::R32Sint | F::R32Float | F::Rg16Uint | F::Rg16Sint | F::Rg16Float
        | F::Rgba8Unorm | F::Rgba8UnormSrgb | F::Rgba8Snorm | F::Rgba8Uint | F::Rgba8Sint
        | F::Bgra8Unorm | F::Bgra8UnormSrgb | F::Rgb10a2Unorm | F::Rg11b10Float => uncompressed(4),
        F::Rg32Uint | F::Rg32Sint | F::Rg32Float | F::Rgba16Uint | F::Rgba16Sint
        | F::Rgba16Float => uncompressed(8),
        F::Rgba32Uint | F::Rgba32Sint | F::Rgba32Float => uncompressed(16),

        F::Depth16Unorm => FormatInfo {
            block_width: 1,
            block_height: 1,
            block_size: 2,
            has_depth: true,
            has_stencil: false,
        },
        F::Depth32Float => FormatInfo {
            block_width: 1,
            block_height: 1,
            block_size: 4,
            has_depth: true,
            has_stencil: false,
        },
        F::Depth24Plus => FormatInfo {
            block_width: 1,
            block_height: 1,
            block_size: 4,
            has_depth: true,
            has_stencil: false,
        },
        F::Depth24PlusStencil8 | F::Depth32FloatStencil8 => FormatInfo {
            block_width: 1,
            block_height: 1,
            block_size: 4,
            has_depth: true,
            has_stencil: true,
        },
        F::Stencil8 => FormatInfo {
            block_width: 1,
            block_height: 1,
            block_size: 1,
            has_depth: false,
            has_stencil: true,
        },

        F::Bc1RgbaUnorm | F::Bc1RgbaUnormSrgb | F::Bc4RUnorm | F::Bc4RSnorm => bc(8),
        F::Bc2RgbaUnorm | F::Bc2RgbaUnormSrgb | F::Bc3RgbaUnorm | F::Bc3RgbaUnormSrgb
        | F::Bc5RgUnorm | F::Bc5RgSnorm | F::Bc6hRgbFloat | F::Bc6hRgbUfloat
        | F::Bc7RgbaUnorm | F::Bc7RgbaUnormSrgb => bc(16),

        // Formats outside the supported set are treated as 4-byte texels;
        // copy math stays safe because wgpu validates actual copies.
        _ => uncompressed(4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba8_row_math() {
        let info = format_info(wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(info.unpadded_bytes_per_row(64), 256);
        assert_eq!(info.padded_bytes_per_row(64), 256);
        assert_eq!(info.unpadded_bytes_per_row(60), 240);
        assert_eq!(info.padded_bytes_per_row(60), 256);
        assert!(!info.is_compressed());
    }

    #[test]
    fn bc1_uses_block_dimensions() {
        let info = format_info(wgpu::TextureFormat::Bc1RgbaUnorm);
        assert!(info.is_compressed());
        assert_eq!(info.blocks_wide(64), 16);
        assert_eq!(info.block_rows(64), 16);
        assert_eq!(info.unpadded_bytes_per_row(64), 128);
        assert_eq!(info.padded_bytes_per_row(64), 256);
        // Non-multiple-of-4 dimensions round up to whole blocks.
        assert_eq!(info.blocks_wide(65), 17);
    }

    #[test]
    fn depth_formats_report_aspects() {
        assert!(format_info(wgpu::TextureFormat::Depth32Float).has_depth);
        assert!(!format_info(wgpu::TextureFormat::Depth32Float).has_stencil);
        let ds = format_info(wgpu::TextureFormat::Depth24PlusStencil8);
        assert!(ds.has_depth && ds.has_stencil);
        assert!(!format_info(wgpu::TextureFormat::Rgba8Unorm).is_depth_stencil());
    }
}
