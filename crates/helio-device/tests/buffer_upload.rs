//! Buffer staging, coalescing and readback against a live device.

mod common;

use helio_device::BufferUsage;
use pretty_assertions::assert_eq;

#[test]
fn uniform_roundtrip_through_staging() {
    let Some(mut device) = common::device("uniform_roundtrip_through_staging") else {
        return;
    };

    let buffer = device
        .create_buffer(256, BufferUsage::UNIFORM | BufferUsage::READ | BufferUsage::WRITE, false)
        .unwrap();

    let mut bytes = Vec::new();
    for v in [1.0f32, 1.0, 1.0, 1.0] {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    device.buffer_sub_data(buffer, 0, &bytes).unwrap();
    assert_eq!(device.buffer_pending_uploads(buffer), 1);

    device.flush();
    assert_eq!(device.buffer_pending_uploads(buffer), 0);

    let read = device.get_buffer_sub_data(buffer, 0, 16).unwrap();
    assert_eq!(read, bytes);

    device.dispose_buffer(buffer);
}

#[test]
fn last_write_wins_on_overlap() {
    let Some(mut device) = common::device("last_write_wins_on_overlap") else {
        return;
    };

    let buffer = device
        .create_buffer(64, BufferUsage::READ | BufferUsage::WRITE, false)
        .unwrap();

    device.buffer_sub_data(buffer, 0, &[0xAA; 32]).unwrap();
    device.buffer_sub_data(buffer, 16, &[0xBB; 32]).unwrap();
    // Overlapping writes collapse into one pending entry over the union.
    assert_eq!(device.buffer_pending_uploads(buffer), 1);

    device.flush();
    let read = device.get_buffer_sub_data(buffer, 0, 48).unwrap();
    assert_eq!(&read[..16], &[0xAA; 16]);
    assert_eq!(&read[16..], &[0xBB; 32]);

    device.dispose_buffer(buffer);
}

#[test]
fn disjoint_writes_all_land() {
    let Some(mut device) = common::device("disjoint_writes_all_land") else {
        return;
    };

    let buffer = device
        .create_buffer(64, BufferUsage::READ | BufferUsage::WRITE, false)
        .unwrap();

    device.buffer_sub_data(buffer, 0, &[1; 8]).unwrap();
    device.buffer_sub_data(buffer, 32, &[2; 8]).unwrap();
    assert_eq!(device.buffer_pending_uploads(buffer), 2);

    device.flush();
    let read = device.get_buffer_sub_data(buffer, 0, 40).unwrap();
    assert_eq!(&read[..8], &[1; 8]);
    assert_eq!(&read[32..40], &[2; 8]);

    device.dispose_buffer(buffer);
}

#[test]
fn misaligned_or_out_of_bounds_writes_are_hard_errors() {
    let Some(mut device) = common::device("misaligned_or_out_of_bounds_writes_are_hard_errors") else {
        return;
    };

    let buffer = device
        .create_buffer(64, BufferUsage::WRITE, false)
        .unwrap();

    assert!(device.buffer_sub_data(buffer, 2, &[0; 4]).is_err());
    assert!(device.buffer_sub_data(buffer, 0, &[0; 6]).is_err());
    assert!(device.buffer_sub_data(buffer, 60, &[0; 8]).is_err());
    assert_eq!(device.buffer_pending_uploads(buffer), 0);

    device.dispose_buffer(buffer);
}

#[test]
fn oversized_buffer_allocation_is_rejected() {
    let Some(mut device) = common::device("oversized_buffer_allocation_is_rejected") else {
        return;
    };

    let max = device.context().capabilities.max_buffer_size;
    let err = device
        .create_buffer(max + 4, BufferUsage::WRITE, false)
        .unwrap_err();
    assert!(err.to_string().contains("too large"));
}

#[test]
fn clear_pending_discards_staged_writes() {
    let Some(mut device) = common::device("clear_pending_discards_staged_writes") else {
        return;
    };

    let buffer = device
        .create_buffer(64, BufferUsage::READ | BufferUsage::WRITE, false)
        .unwrap();
    device.buffer_sub_data(buffer, 0, &[0; 64]).unwrap();
    device.flush();

    device.buffer_sub_data(buffer, 0, &[0xFF; 64]).unwrap();
    device.clear_pending_uploads(buffer);
    assert_eq!(device.buffer_pending_uploads(buffer), 0);

    device.flush();
    let read = device.get_buffer_sub_data(buffer, 0, 64).unwrap();
    assert_eq!(read, vec![0; 64]);

    device.dispose_buffer(buffer);
}

#[test]
fn dispose_is_idempotent() {
    let Some(mut device) = common::device("dispose_is_idempotent") else {
        return;
    };

    let baseline = device.video_memory_cost();
    let buffer = device
        .create_buffer(1024, BufferUsage::WRITE, false)
        .unwrap();
    assert!(device.video_memory_cost() > baseline);

    device.dispose_buffer(buffer);
    assert!(device.buffer_is_disposed(buffer));
    let after = device.video_memory_cost();
    assert_eq!(after, baseline);

    // Second dispose is a no-op.
    device.dispose_buffer(buffer);
    assert!(device.buffer_is_disposed(buffer));
    assert_eq!(device.video_memory_cost(), after);

    // Restore brings the native handle back (contents undefined).
    device.restore_buffer(buffer);
    assert!(!device.buffer_is_disposed(buffer));
    device.dispose_buffer(buffer);
}

#[test]
fn dynamic_buffer_reuses_staging_slab() {
    let Some(mut device) = common::device("dynamic_buffer_reuses_staging_slab") else {
        return;
    };

    let buffer = device
        .create_buffer(256, BufferUsage::WRITE, true)
        .unwrap();

    for cycle in 0..4u8 {
        device.buffer_sub_data(buffer, 0, &[cycle; 256]).unwrap();
        device.flush();
        // Settle the asynchronous slab remap before the next cycle.
        device.context().device.poll(wgpu::Maintain::Wait);
    }
    assert_eq!(device.buffer_staging_slab_count(buffer), 1);

    device.dispose_buffer(buffer);
}
