//! Texture allocation, mip resolution, uploads and readback against a live
//! device.

mod common;

use helio_device::UploadOutcome;
use pretty_assertions::assert_eq;

#[test]
fn auto_mip_levels_resolve_full_chain() {
    let Some(mut device) = common::device("auto_mip_levels_resolve_full_chain") else {
        return;
    };

    let texture = device
        .create_texture_2d(wgpu::TextureFormat::Rgba8Unorm, 64, 64, 0, false)
        .unwrap();
    assert_eq!(device.texture_mip_level_count(texture), Some(7));
    device.dispose_texture(texture);

    // Explicit requests clamp to the chain length.
    let texture = device
        .create_texture_2d(wgpu::TextureFormat::Rgba8Unorm, 64, 64, 99, false)
        .unwrap();
    assert_eq!(device.texture_mip_level_count(texture), Some(7));
    device.dispose_texture(texture);
}

#[test]
fn depth_3d_and_video_textures_never_mip() {
    let Some(mut device) = common::device("depth_3d_and_video_textures_never_mip") else {
        return;
    };

    let depth = device
        .create_texture_2d(wgpu::TextureFormat::Depth32Float, 64, 64, 0, true)
        .unwrap();
    assert_eq!(device.texture_mip_level_count(depth), Some(1));
    device.dispose_texture(depth);

    let volume = device
        .create_texture_3d(wgpu::TextureFormat::Rgba8Unorm, 32, 32, 8)
        .unwrap();
    assert_eq!(device.texture_mip_level_count(volume), Some(1));
    device.dispose_texture(volume);

    let video = device
        .create_texture_video(wgpu::TextureFormat::Rgba8Unorm, 64, 64)
        .unwrap();
    assert_eq!(device.texture_mip_level_count(video), Some(1));
    device.dispose_texture(video);
}

#[test]
fn unbound_texture_upload_is_immediate() {
    let Some(mut device) = common::device("unbound_texture_upload_is_immediate") else {
        return;
    };

    let texture = device
        .create_texture_2d(wgpu::TextureFormat::Rgba8Unorm, 4, 4, 1, false)
        .unwrap();

    let mut pixels = Vec::with_capacity(64);
    for i in 0..16u8 {
        pixels.extend_from_slice(&[i, i.wrapping_mul(3), 255 - i, 255]);
    }
    let outcome = device
        .update_texture(
            texture,
            0,
            wgpu::Origin3d::ZERO,
            wgpu::Extent3d {
                width: 4,
                height: 4,
                depth_or_array_layers: 1,
            },
            &pixels,
        )
        .unwrap();
    assert_eq!(outcome, UploadOutcome::Immediate);
    assert_eq!(device.texture_pending_uploads(texture), 0);

    let read = device.read_pixels(texture, 0, 0).unwrap();
    assert_eq!(read, pixels);

    device.dispose_texture(texture);
}

#[test]
fn mip_region_upload_is_validated() {
    let Some(mut device) = common::device("mip_region_upload_is_validated") else {
        return;
    };

    let texture = device
        .create_texture_2d(wgpu::TextureFormat::Rgba8Unorm, 8, 8, 0, false)
        .unwrap();

    // Level out of range.
    assert!(device
        .update_texture(
            texture,
            9,
            wgpu::Origin3d::ZERO,
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            &[0; 4],
        )
        .is_err());
    // Data length mismatch.
    assert!(device
        .update_texture(
            texture,
            0,
            wgpu::Origin3d::ZERO,
            wgpu::Extent3d {
                width: 8,
                height: 8,
                depth_or_array_layers: 1,
            },
            &[0; 16],
        )
        .is_err());

    device.dispose_texture(texture);
}

#[test]
fn zero_sized_alloc_and_disposed_upload_are_rejected() {
    let Some(mut device) = common::device("zero_sized_alloc_and_disposed_upload_are_rejected")
    else {
        return;
    };

    assert!(device
        .create_texture_2d(wgpu::TextureFormat::Rgba8Unorm, 0, 4, 1, false)
        .is_err());

    let texture = device
        .create_texture_2d(wgpu::TextureFormat::Rgba8Unorm, 4, 4, 1, false)
        .unwrap();
    device.dispose_texture(texture);
    assert!(device
        .update_texture(
            texture,
            0,
            wgpu::Origin3d::ZERO,
            wgpu::Extent3d {
                width: 4,
                height: 4,
                depth_or_array_layers: 1,
            },
            &[0; 64],
        )
        .is_err());
}

#[test]
fn texture_dispose_is_idempotent() {
    let Some(mut device) = common::device("texture_dispose_is_idempotent") else {
        return;
    };

    let baseline = device.video_memory_cost();
    let texture = device
        .create_texture_2d(wgpu::TextureFormat::Rgba8Unorm, 16, 16, 1, false)
        .unwrap();
    assert!(device.video_memory_cost() > baseline);

    device.dispose_texture(texture);
    assert!(device.texture_is_disposed(texture));
    assert_eq!(device.video_memory_cost(), baseline);

    device.dispose_texture(texture);
    assert!(device.texture_is_disposed(texture));
    assert_eq!(device.video_memory_cost(), baseline);

    device.restore_texture(texture).unwrap();
    assert!(!device.texture_is_disposed(texture));
    device.dispose_texture(texture);
}

#[test]
fn read_pixels_tightens_padded_rows() {
    let Some(mut device) = common::device("read_pixels_tightens_padded_rows") else {
        return;
    };

    // 5 pixels per row: 20 unpadded bytes, padded to 256 in the copy.
    let texture = device
        .create_texture_2d(wgpu::TextureFormat::Rgba8Unorm, 5, 3, 1, false)
        .unwrap();
    let pixels: Vec<u8> = (0..60).collect();
    device
        .update_texture(
            texture,
            0,
            wgpu::Origin3d::ZERO,
            wgpu::Extent3d {
                width: 5,
                height: 3,
                depth_or_array_layers: 1,
            },
            &pixels,
        )
        .unwrap();

    let read = device.read_pixels(texture, 0, 0).unwrap();
    assert_eq!(read, pixels);

    device.dispose_texture(texture);
}
