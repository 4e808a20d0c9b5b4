use std::sync::Arc;

use spoolwatch::status::{StatusSnapshot, StatusSource};
use spoolwatch_hal::sync::{Lock, Shared};

/// The latest status, shared between its producer and the firmware tick.
///
/// The producer may run on any task or thread. Reads and writes copy the
/// whole snapshot inside a single critical section, so the tick always
/// observes a consistent snapshot.
#[derive(Debug, Clone, Default)]
pub struct SharedStatus(Arc<Shared<Lock, StatusSnapshot>>);

impl SharedStatus {
    /// Creates a [`SharedStatus`] holding `snapshot`.
    #[must_use]
    pub fn new(snapshot: StatusSnapshot) -> Self {
        Self(Arc::new(Shared::new(Lock::new(), snapshot)))
    }

    /// Publishes a new snapshot.
    pub fn publish(&self, snapshot: StatusSnapshot) {
        self.0.set(snapshot);
    }

    /// Updates the snapshot in place, returning the new one.
    ///
    /// `f` runs inside a critical section and must be short.
    pub fn update(&self, f: impl FnOnce(StatusSnapshot) -> StatusSnapshot) -> StatusSnapshot {
        self.0.update(f)
    }
}

impl StatusSource for SharedStatus {
    fn snapshot(&self) -> StatusSnapshot {
        self.0.get()
    }
}
