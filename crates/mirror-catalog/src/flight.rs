//! Single-flight gate for refresh runs.
//!
//! At most one refresh runs per process. Acquisition is a compare-exchange on
//! an atomic flag; there is no queueing and no waiting. The returned
//! [`FlightGuard`] clears the flag when dropped, which covers success,
//! failure, and unwinding alike.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use ulid::Ulid;

/// Details of the run currently holding the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlightInfo {
    /// Unique holder ID.
    pub holder_id: String,
    /// When the gate was acquired.
    pub acquired_at: DateTime<Utc>,
    /// Operation that acquired the gate.
    pub operation: String,
}

/// The `idle`/`running` flag shared by every handle of an orchestrator.
#[derive(Debug, Clone, Default)]
pub struct RefreshGate {
    running: Arc<AtomicBool>,
}

impl RefreshGate {
    /// Creates an idle gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `idle -> running`. Returns `None` if a run is already in flight.
    #[must_use]
    pub fn try_acquire(&self, operation: &str) -> Option<FlightGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        let info = FlightInfo {
            holder_id: Ulid::new().to_string(),
            acquired_at: Utc::now(),
            operation: operation.to_string(),
        };
        debug!(holder = %info.holder_id, operation, "refresh gate acquired");

        Some(FlightGuard {
            running: Arc::clone(&self.running),
            info,
        })
    }

    /// Returns true while a run holds the gate.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Proof of holding the gate. Dropping it moves `running -> idle`.
#[derive(Debug)]
pub struct FlightGuard {
    running: Arc<AtomicBool>,
    info: FlightInfo,
}

impl FlightGuard {
    /// Returns details of this acquisition.
    #[must_use]
    pub fn info(&self) -> &FlightInfo {
        &self.info
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        debug!(holder = %self.info.holder_id, "refresh gate released");
    }
}
