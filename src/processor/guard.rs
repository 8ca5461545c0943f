//! Single-flight admission for bulk catch-up passes.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Binary, non-blocking admission gate: at most one permit is outstanding.
///
/// A denied [`SingleFlight::try_enter`] is a normal outcome. Callers drop the
/// trigger instead of waiting or retrying.
#[derive(Debug, Clone)]
pub struct SingleFlight {
    permits: Arc<Semaphore>,
}

/// Proof of admission. Releases the guard when dropped.
#[derive(Debug)]
pub struct SingleFlightPermit {
    _permit: OwnedSemaphorePermit,
}

impl SingleFlightPermit {
    /// Releases the guard explicitly.
    pub fn exit(self) {}
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn try_enter(&self) -> Option<SingleFlightPermit> {
        self.permits
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| SingleFlightPermit { _permit: permit })
    }

    /// Whether an admitted section is currently open.
    pub fn is_active(&self) -> bool {
        self.permits.available_permits() == 0
    }
}
