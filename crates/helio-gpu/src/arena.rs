use std::fmt;

/// Round `value` up to the nearest multiple of `alignment`.
///
/// `alignment` must be > 0.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);

    // `value + alignment - 1` can overflow for pathological inputs, so use a
    // checked path and fall back to saturating behaviour.
    let add = alignment - 1;
    match value.checked_add(add) {
        Some(v) => v / alignment * alignment,
        None => u64::MAX / alignment * alignment,
    }
}

/// A linear allocator for sub-allocating a fixed byte range.
///
/// This is intentionally CPU-only: it tracks offsets into a staging slab, not
/// actual GPU memory. Allocation offsets honour WebGPU's mapped-range rules
/// (8-byte offset granularity, 4-byte size granularity) when the caller asks
/// for them.
#[derive(Clone)]
pub struct LinearArena {
    capacity: u64,
    cursor: u64,
}

impl LinearArena {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            cursor: 0,
        }
    }

    /// Reset the cursor; all previous allocations become invalid.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes remaining until the arena is full (before alignment padding).
    pub fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.cursor)
    }

    /// True once at least one allocation has been made since the last reset.
    pub fn is_used(&self) -> bool {
        self.cursor != 0
    }

    /// Allocate `size` bytes at `alignment`, returning the byte offset.
    pub fn alloc(&mut self, size: u64, alignment: u64) -> Option<u64> {
        let alignment = alignment.max(1);
        let aligned = align_up(self.cursor, alignment);
        let end = aligned.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        self.cursor = end;
        Some(aligned)
    }
}

impl fmt::Debug for LinearArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearArena")
            .field("capacity", &self.capacity)
            .field("cursor", &self.cursor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(13, 8), 16);
        assert_eq!(align_up(255, 256), 256);
        assert_eq!(align_up(256, 256), 256);
    }

    #[test]
    fn alloc_respects_alignment_and_capacity() {
        let mut arena = LinearArena::new(64);

        assert_eq!(arena.alloc(1, 1).unwrap(), 0);
        assert_eq!(arena.alloc(1, 16).unwrap(), 16);
        assert_eq!(arena.alloc(16, 32).unwrap(), 32);
        assert!(arena.alloc(33, 1).is_none());
    }

    #[test]
    fn reset_reclaims_space() {
        let mut arena = LinearArena::new(64);
        assert_eq!(arena.alloc(8, 4).unwrap(), 0);
        assert!(arena.is_used());

        arena.reset();
        assert!(!arena.is_used());
        assert_eq!(arena.alloc(8, 4).unwrap(), 0);
    }
}
