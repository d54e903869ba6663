use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by a receiver's threads. Sampling never resets them.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub metrics_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub errors: AtomicU64,
    pub dropped: AtomicU64,
    /// Open TCP connections.
    pub active: AtomicU64,
    /// UDP datagrams that did not end on a line boundary.
    pub incomplete_received: AtomicU64,
}

impl Counters {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn sub(counter: &AtomicU64, n: u64) {
        counter.fetch_sub(n, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> f64 {
        counter.load(Ordering::Relaxed) as f64
    }

    /// Report the counters every transport has.
    pub fn report_common<F: FnMut(&str, f64)>(&self, send: &mut F) {
        send("metricsReceived", Counters::get(&self.metrics_received));
        send("bytesReceived", Counters::get(&self.bytes_received));
        send("errors", Counters::get(&self.errors));
        send("dropped", Counters::get(&self.dropped));
    }

    pub fn report_active<F: FnMut(&str, f64)>(&self, send: &mut F) {
        send("active", Counters::get(&self.active));
    }

    pub fn report_incomplete<F: FnMut(&str, f64)>(&self, send: &mut F) {
        send("incompleteReceived", Counters::get(&self.incomplete_received));
    }
}
