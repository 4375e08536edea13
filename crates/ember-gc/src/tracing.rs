//! Scan tracing support.
//!
//! When the `tracing` feature is enabled, this module emits structured
//! events for card-table scan passes; otherwise every helper is a
//! zero-cost stub.

/// Event helpers; real when the `tracing` feature is enabled.
#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Stable identifier for one scan pass, correlating its events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ScavengeId(pub u64);

    static NEXT_SCAVENGE_ID: AtomicU64 = AtomicU64::new(1);

    /// Generates the next scan-pass id.
    pub fn next_scavenge_id() -> ScavengeId {
        ScavengeId(NEXT_SCAVENGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Logs the start of a scan pass.
    pub fn log_scavenge_start(id: ScavengeId, workers: usize) {
        tracing::debug!(scavenge_id = id.0, workers, "card_scan_start");
    }

    /// Logs the end of a scan pass.
    pub fn log_scavenge_end(id: ScavengeId, objects_pushed: usize, young_refs_claimed: usize) {
        tracing::debug!(
            scavenge_id = id.0,
            objects_pushed,
            young_refs_claimed,
            "card_scan_end"
        );
    }

    /// Logs a verification pass.
    pub fn log_verify_pass(kind: &str) {
        tracing::debug!(kind, "card_verify");
    }
}

/// Event helpers; zero-cost stubs when the `tracing` feature is off.
#[cfg(not(feature = "tracing"))]
pub mod internal {
    /// Stable identifier for one scan pass (stub).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ScavengeId(pub u64);

    /// Stub id generator when tracing is disabled.
    pub fn next_scavenge_id() -> ScavengeId {
        ScavengeId(0)
    }

    /// Stub event when tracing is disabled.
    pub fn log_scavenge_start(_id: ScavengeId, _workers: usize) {}

    /// Stub event when tracing is disabled.
    pub fn log_scavenge_end(_id: ScavengeId, _objects_pushed: usize, _young_refs_claimed: usize) {}

    /// Stub event when tracing is disabled.
    pub fn log_verify_pass(_kind: &str) {}
}

pub use internal::ScavengeId;
