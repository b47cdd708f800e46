use std::fmt;
use std::sync::Weak;

use super::SyncShared;

/// Handle to a registered synchronizer callback.
///
/// Dropping the handle unregisters the callback.
#[must_use = "dropping a Subscription disconnects its callback"]
pub struct Subscription {
    shared: Weak<SyncShared>,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(shared: Weak<SyncShared>, id: u64) -> Self {
        Self { shared, id }
    }

    /// Unregisters the callback now. Returns `false` if the synchronizer is
    /// already gone.
    pub fn disconnect(mut self) -> bool {
        self.release()
    }

    /// Whether the callback is still registered.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.upgrade().is_some_and(|shared| {
            shared
                .subscribers
                .lock()
                .iter()
                .any(|s| s.id == self.id)
        })
    }

    fn release(&mut self) -> bool {
        let shared = std::mem::take(&mut self.shared);
        shared.upgrade().is_some_and(|shared| shared.disconnect(self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
