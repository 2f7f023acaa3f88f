//! Compute dispatch through the implicit compute pass.

mod common;

use std::collections::HashMap;

use helio_device::{BindingDesc, BindingKind, BufferUsage, ProgramEntryPoints};
use pretty_assertions::assert_eq;

const FILL_INDICES: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        data[id.x] = id.x * 3u;
    }
}
"#;

#[test]
fn dispatch_fills_storage_buffer() {
    let Some(mut device) = common::device("dispatch_fills_storage_buffer") else {
        return;
    };
    if !device.context().capabilities.supports_compute {
        common::skip_or_panic("dispatch_fills_storage_buffer", "adapter lacks compute support");
        return;
    }

    let storage = device
        .create_structured_buffer(64, 4, BufferUsage::READ | BufferUsage::WRITE, false)
        .unwrap();
    let group = device.create_bind_group(
        vec![BindingDesc {
            name: "data".into(),
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            kind: BindingKind::StorageBuffer { read_only: false },
            auto_sampler: None,
        }],
        HashMap::new(),
    );
    device.bind_group_set_buffer(group, "data", storage).unwrap();

    let program = device.create_program(
        FILL_INDICES,
        ProgramEntryPoints::compute("cs_main"),
        Vec::new(),
    );
    device.set_program(Some(program));
    device.set_bind_group(0, Some(group));
    device.compute(1, 1, 1).unwrap();
    device.flush();
    assert_eq!(device.frame_stats().dispatches, 1);

    let bytes = device.get_buffer_sub_data(storage, 0, 256).unwrap();
    for (i, chunk) in bytes.chunks_exact(4).enumerate() {
        assert_eq!(u32::from_le_bytes(chunk.try_into().unwrap()), i as u32 * 3);
    }

    device.dispose_buffer(storage);
}

#[test]
fn staged_writes_land_before_the_dispatch_reads() {
    let Some(mut device) = common::device("staged_writes_land_before_the_dispatch_reads") else {
        return;
    };
    if !device.context().capabilities.supports_compute {
        common::skip_or_panic(
            "staged_writes_land_before_the_dispatch_reads",
            "adapter lacks compute support",
        );
        return;
    }

    let storage = device
        .create_structured_buffer(16, 4, BufferUsage::READ | BufferUsage::WRITE, false)
        .unwrap();
    let group = device.create_bind_group(
        vec![BindingDesc {
            name: "data".into(),
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            kind: BindingKind::StorageBuffer { read_only: false },
            auto_sampler: None,
        }],
        HashMap::new(),
    );
    device.bind_group_set_buffer(group, "data", storage).unwrap();

    // Doubling shader: observes whatever the staged write put there.
    let program = device.create_program(
        r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(16)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        data[id.x] = data[id.x] * 2u;
    }
}
"#,
        ProgramEntryPoints::compute("cs_main"),
        Vec::new(),
    );

    let mut bytes = Vec::new();
    for i in 0..16u32 {
        bytes.extend_from_slice(&i.to_le_bytes());
    }
    device.buffer_sub_data(storage, 0, &bytes).unwrap();
    assert_eq!(device.buffer_pending_uploads(storage), 1);

    device.set_program(Some(program));
    device.set_bind_group(0, Some(group));
    device.compute(1, 1, 1).unwrap();
    // The staged write drained into the dispatch's command buffer.
    assert_eq!(device.buffer_pending_uploads(storage), 0);
    device.flush();

    let read = device.get_buffer_sub_data(storage, 0, 64).unwrap();
    for (i, chunk) in read.chunks_exact(4).enumerate() {
        assert_eq!(u32::from_le_bytes(chunk.try_into().unwrap()), i as u32 * 2);
    }

    device.dispose_buffer(storage);
}
