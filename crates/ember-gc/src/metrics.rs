//! Scavenge metrics and statistics.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Statistics from one card-table scan pass.
#[derive(Debug, Clone, Copy)]
pub struct ScavengeMetrics {
    /// Wall time of the pass, barrier to barrier.
    pub duration: Duration,
    /// Worker threads that participated.
    pub workers: usize,
    /// Whole objects handed to the promotion side.
    pub objects_pushed: usize,
    /// Large-array element ranges handed to the promotion side.
    pub array_ranges_pushed: usize,
    /// Distinct young referents claimed.
    pub young_refs_claimed: usize,
    /// Promotion-queue drains that moved work.
    pub queue_drains: usize,
}

impl ScavengeMetrics {
    /// All-zero metrics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::ZERO,
            workers: 0,
            objects_pushed: 0,
            array_ranges_pushed: 0,
            young_refs_claimed: 0,
            queue_drains: 0,
        }
    }
}

impl Default for ScavengeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-level cumulative scan statistics.
#[derive(Debug)]
pub struct GlobalScavengeMetrics {
    scavenges: AtomicUsize,
    pause_ns: AtomicU64,
    objects_pushed: AtomicUsize,
    young_refs_claimed: AtomicUsize,
}

impl GlobalScavengeMetrics {
    const fn new() -> Self {
        Self {
            scavenges: AtomicUsize::new(0),
            pause_ns: AtomicU64::new(0),
            objects_pushed: AtomicUsize::new(0),
            young_refs_claimed: AtomicUsize::new(0),
        }
    }

    /// Total scan passes since process start.
    #[inline]
    #[must_use]
    pub fn total_scavenges(&self) -> usize {
        self.scavenges.load(Ordering::Relaxed)
    }

    /// Total scan time in nanoseconds.
    #[inline]
    #[must_use]
    pub fn total_pause_ns(&self) -> u64 {
        self.pause_ns.load(Ordering::Relaxed)
    }

    /// Total objects handed to the promotion side.
    #[inline]
    #[must_use]
    pub fn total_objects_pushed(&self) -> usize {
        self.objects_pushed.load(Ordering::Relaxed)
    }

    /// Total distinct young referents claimed.
    #[inline]
    #[must_use]
    pub fn total_young_refs_claimed(&self) -> usize {
        self.young_refs_claimed.load(Ordering::Relaxed)
    }
}

static GLOBAL_METRICS: GlobalScavengeMetrics = GlobalScavengeMetrics::new();

/// Returns the process-level cumulative scan statistics.
#[must_use]
pub fn global_scavenge_metrics() -> &'static GlobalScavengeMetrics {
    &GLOBAL_METRICS
}

thread_local! {
    static LAST_METRICS: Cell<ScavengeMetrics> = const { Cell::new(ScavengeMetrics::new()) };
}

/// Metrics from the last scan pass driven by this thread.
#[must_use]
pub fn last_scavenge_metrics() -> ScavengeMetrics {
    LAST_METRICS.with(Cell::get)
}

/// Records one finished scan pass.
pub fn record_scavenge(metrics: ScavengeMetrics) {
    LAST_METRICS.with(|m| m.set(metrics));

    let g = global_scavenge_metrics();
    g.scavenges.fetch_add(1, Ordering::Relaxed);
    g.pause_ns.fetch_add(
        metrics.duration.as_nanos().try_into().unwrap_or(u64::MAX),
        Ordering::Relaxed,
    );
    g.objects_pushed
        .fetch_add(metrics.objects_pushed, Ordering::Relaxed);
    g.young_refs_claimed
        .fetch_add(metrics.young_refs_claimed, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_updates_last_and_global() {
        let before = global_scavenge_metrics().total_scavenges();
        let metrics = ScavengeMetrics {
            duration: Duration::from_micros(10),
            workers: 2,
            objects_pushed: 5,
            array_ranges_pushed: 1,
            young_refs_claimed: 3,
            queue_drains: 2,
        };
        record_scavenge(metrics);

        assert_eq!(last_scavenge_metrics().objects_pushed, 5);
        assert_eq!(last_scavenge_metrics().workers, 2);
        assert!(global_scavenge_metrics().total_scavenges() > before);
    }

    #[test]
    fn zeroed_defaults() {
        let m = ScavengeMetrics::default();
        assert_eq!(m.duration, Duration::ZERO);
        assert_eq!(m.objects_pushed, 0);
        assert_eq!(m.queue_drains, 0);
    }
}
