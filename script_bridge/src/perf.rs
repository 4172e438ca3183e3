use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Accumulated time spent on behalf of one subsystem.
#[derive(Debug)]
pub struct PerfCounter {
    name: &'static str,
    active: AtomicBool,
    samples: AtomicU64,
    total_nanos: AtomicU64,
    last_nanos: AtomicU64,
}

impl PerfCounter {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            active: AtomicBool::new(false),
            samples: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            last_nanos: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Mark the subsystem idle so monitors stop attributing time to it.
    pub fn set_inactive(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed))
    }

    pub fn last(&self) -> Duration {
        Duration::from_nanos(self.last_nanos.load(Ordering::Relaxed))
    }

    fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.last_nanos.store(nanos, Ordering::Relaxed);
    }
}

/// Scoped measurement: activates the counter on creation and records the
/// elapsed time when dropped.
pub struct PerfMeasurer {
    counter: Arc<PerfCounter>,
    started: Instant,
    _span: tracing::span::EnteredSpan,
}

impl PerfMeasurer {
    pub fn start(counter: Arc<PerfCounter>) -> Self {
        counter.active.store(true, Ordering::Relaxed);
        let span = tracing::trace_span!(target: "script_bridge::perf", "perf", element = counter.name);
        Self {
            counter,
            started: Instant::now(),
            _span: span.entered(),
        }
    }
}

impl Drop for PerfMeasurer {
    fn drop(&mut self) {
        self.counter.record(self.started.elapsed());
    }
}
