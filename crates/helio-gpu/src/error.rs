use std::fmt;

/// Errors raised by the staging/upload subsystem.
#[derive(Debug)]
pub enum StagingError {
    InvalidConfig(&'static str),
    /// Requested allocation exceeds the device's maximum buffer size.
    AllocationTooLarge {
        requested: u64,
        max: u64,
    },
    /// Misaligned destination offset or upload size. Copy alignment is a hard
    /// contract of the underlying copy primitive.
    Misaligned {
        offset: u64,
        size: u64,
    },
    /// Write range exceeds the destination resource.
    OutOfBounds {
        offset: u64,
        size: u64,
        resource_size: u64,
    },
}

impl fmt::Display for StagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StagingError::InvalidConfig(msg) => write!(f, "invalid staging config: {msg}"),
            StagingError::AllocationTooLarge { requested, max } => write!(
                f,
                "staging allocation too large: requested {requested} bytes, max {max} bytes"
            ),
            StagingError::Misaligned { offset, size } => write!(
                f,
                "misaligned upload: offset {offset} and size {size} must be 4-byte aligned"
            ),
            StagingError::OutOfBounds {
                offset,
                size,
                resource_size,
            } => write!(
                f,
                "upload range out of bounds: offset {offset} + size {size} exceeds resource size {resource_size}"
            ),
        }
    }
}

impl std::error::Error for StagingError {}
