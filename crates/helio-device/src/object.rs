//! Identity and lifecycle primitives shared by every device-owned resource.
//!
//! Every resource carries a process-unique `uid` and a change-id `cid` that
//! increments on every reload/restore. Auxiliary state (upload tracking,
//! bind references) is keyed by these integer ids rather than by object
//! identity, so side tables never need identity-keyed maps.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next process-unique resource id.
pub fn next_uid() -> u64 {
    NEXT_UID.fetch_add(1, Ordering::Relaxed)
}

/// Identity carried by every GPU resource.
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    /// Process-unique, monotonic.
    pub uid: u64,
    /// Change id, incremented on every reload/restore.
    pub cid: u32,
}

impl Identity {
    pub fn new() -> Self {
        Self {
            uid: next_uid(),
            cid: 0,
        }
    }

    /// Record a reload: native state was recreated.
    pub fn bump(&mut self) {
        self.cid = self.cid.wrapping_add(1);
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! resource_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// The underlying process-unique uid.
            pub fn uid(self) -> u64 {
                self.0
            }
        }
    };
}

resource_id!(
    /// Handle to a GPU buffer owned by the device registry.
    BufferId
);
resource_id!(
    /// Handle to a texture owned by the device registry.
    TextureId
);
resource_id!(
    /// Handle to a bind group owned by the device registry.
    BindGroupId
);
resource_id!(
    /// Handle to a framebuffer owned by the device registry.
    FramebufferId
);
resource_id!(
    /// Handle to a sampler description owned by the device registry.
    SamplerId
);
resource_id!(
    /// Handle to a shader program owned by the device registry.
    ProgramId
);
resource_id!(
    /// Handle to a vertex layout owned by the device registry.
    VertexLayoutId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uids_are_unique_and_monotonic() {
        let a = next_uid();
        let b = next_uid();
        assert!(b > a);
    }

    #[test]
    fn bump_increments_cid() {
        let mut id = Identity::new();
        assert_eq!(id.cid, 0);
        id.bump();
        assert_eq!(id.cid, 1);
    }
}
