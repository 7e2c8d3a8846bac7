use std::collections::HashSet;

use types::DeviceIdentity;

/// Identities already announced during this process lifetime.
///
/// Append-only and memory-only: a restart forgets everything, and every
/// device is announced again the next time it is heard. Not synchronized;
/// the dispatcher owns it and handles lines one at a time.
#[derive(Debug, Default)]
pub struct DiscoveryTracker {
    seen: HashSet<DeviceIdentity>,
}

impl DiscoveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `identity` and returns true if it had not been seen before.
    pub fn mark_if_new(&mut self, identity: &DeviceIdentity) -> bool {
        if self.seen.contains(identity) {
            return false;
        }
        self.seen.insert(identity.clone())
    }

    pub fn contains(&self, identity: &DeviceIdentity) -> bool {
        self.seen.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
