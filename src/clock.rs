use std::{
    fmt,
    sync::atomic::{AtomicI64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

/// Local, per-server notion of "when was this session established".
///
/// Used only ordinally for tie-breaking across peers (§9 of the design notes): skew between
/// servers need not be bounded, each server only needs to be internally consistent. Wallclock
/// is the default source; a monotonically increasing logical counter is an equally correct
/// substitute and is what the test suite uses to get deterministic orderings.
pub type Timestamp = i64;

/// Source of `established_at` values for a [`crate::registry::NodeConnRegistry`].
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wallclock source: milliseconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_millis() as Timestamp
    }
}

/// Monotonically increasing logical counter, substituting for wallclock per the §9 design note.
///
/// Handy in tests: it sidesteps both clock resolution (two inserts in the same millisecond) and
/// NTP-step regressions that would otherwise make tie-break assertions flaky.
#[derive(Debug, Default)]
pub struct LogicalClock {
    next: AtomicI64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self { next: AtomicI64::new(0) }
    }
}

impl Clock for LogicalClock {
    fn now(&self) -> Timestamp {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
