//! Cheap counters for caches and the upload path, suitable for
//! profiling/telemetry snapshots.

/// Hit/miss counters reported by each cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Byte counters for the staged upload path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// Bytes written through the immediate `write_buffer`/`write_texture`
    /// path (resource not in flight).
    pub bytes_immediate: u64,
    /// Bytes staged into mapped slabs for a deferred flush.
    pub bytes_staged: u64,
    /// Staged-write flushes forced by a pass end.
    pub forced_flushes: u64,
}

impl UploadStats {
    pub fn bytes_total(&self) -> u64 {
        self.bytes_immediate + self.bytes_staged
    }
}

/// Per-frame pass/draw counters maintained by the command queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub render_passes: u32,
    pub compute_passes: u32,
    pub draw_calls: u32,
    pub draws_dropped: u32,
    pub dispatches: u32,
    pub mipmap_regenerations: u32,
}
