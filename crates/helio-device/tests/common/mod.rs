//! Shared helpers for `helio-device` integration tests.

use std::sync::{Mutex, MutexGuard, OnceLock};

use helio_device::{Device, MAX_BIND_GROUPS, MAX_VERTEX_BUFFERS};

pub fn require_webgpu() -> bool {
    let Ok(raw) = std::env::var("HELIO_REQUIRE_WEBGPU") else {
        return false;
    };

    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

pub fn skip_or_panic(test_name: &str, reason: &str) {
    if require_webgpu() {
        panic!("HELIO_REQUIRE_WEBGPU is enabled but {test_name} cannot run: {reason}");
    }
    eprintln!("skipping {test_name}: {reason}");
}

/// Return a shared, leaked device for this integration-test binary.
///
/// Some wgpu backends/drivers have been observed to crash inside the
/// allocator when repeatedly creating/dropping `wgpu::Device`s across many
/// `#[test]` cases in a single process, so device creation is centralized
/// here and the one device is reused across tests.
pub fn device(test_name: &str) -> Option<MutexGuard<'static, Device>> {
    static DEVICE: OnceLock<Option<&'static Mutex<Device>>> = OnceLock::new();

    let device = DEVICE.get_or_init(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        match Device::new_for_tests() {
            Ok(device) => Some(Box::leak(Box::new(Mutex::new(device)))),
            Err(err) => {
                eprintln!("headless device creation failed: {err:#}");
                None
            }
        }
    });

    let Some(device) = device.as_ref() else {
        skip_or_panic(test_name, "wgpu adapter not found");
        return None;
    };

    let mut device = device.lock().unwrap();
    reset_state(&mut device);
    Some(device)
}

/// Unbind everything a previous test may have left behind and start a fresh
/// frame so per-frame stats begin at zero.
fn reset_state(device: &mut Device) {
    device.flush();
    device.set_program(None);
    device.set_vertex_layout(None);
    device.set_framebuffer(None);
    device.set_viewport(None);
    device.set_scissor(None);
    device.set_render_states(Default::default());
    device.set_index_buffer(None);
    for index in 0..MAX_BIND_GROUPS {
        device.set_bind_group(index as u32, None);
    }
    for slot in 0..MAX_VERTEX_BUFFERS {
        device.set_vertex_buffer(slot as u32, None);
    }
    device.end_frame();
}
