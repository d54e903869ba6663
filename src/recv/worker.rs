//! Decode workers: pending payloads in, encoded rows out.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use crossbeam_channel::{self as channel, Receiver, Sender};
use tracing::{debug, warn, Dispatch};

use super::super::row::WriteBuffer;
use super::collector::{Collector, Rejected};
use super::plaintext::{lines, parse_line};
use super::stat::Counters;

/// How long a worker waits on a full output queue before checking whether
/// the receiver is stopping.
const PUSH_POLL: Duration = Duration::from_millis(100);

/// State every thread of one receiver shares.
#[derive(Debug)]
pub(crate) struct Shared {
    pub counters: Counters,
    pub stopping: AtomicBool,
}

impl Shared {
    pub fn new() -> Arc<Shared> {
        Arc::new(Shared {
            counters: Counters::default(),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release)
    }
}

/// Spawn a named thread that logs to `logger`.
pub(crate) fn spawn<F>(name: String, logger: &Dispatch, f: F) -> io::Result<JoinHandle<()>>
    where F: FnOnce() + Send + 'static {
    let logger = logger.clone();
    thread::Builder::new()
        .name(name)
        .spawn(move || tracing::dispatcher::with_default(&logger, f))
}

/// Spawn `count` workers behind a fresh pending queue and return its sending
/// half. Each worker exits once that queue is closed and empty.
///
/// If a spawn fails the queue is closed and the workers already running are
/// joined before the error is returned.
pub(crate) fn spawn_workers(
    prefix: &str,
    count: usize,
    collector: &Collector,
    shared: &Arc<Shared>,
    logger: &Dispatch,
) -> io::Result<(Sender<Bytes>, Vec<JoinHandle<()>>)> {
    let (send, pending) = channel::bounded(count);

    spawn_each(count, send, |n| {
        let worker = Worker {
            pending: pending.clone(),
            collector: collector.clone(),
            shared: Arc::clone(shared),
        };
        spawn(format!("{}-parse-{}", prefix, n), logger, move || worker.run())
    })
}

fn spawn_each<F>(
    count: usize,
    send: Sender<Bytes>,
    mut spawn_one: F,
) -> io::Result<(Sender<Bytes>, Vec<JoinHandle<()>>)>
    where F: FnMut(usize) -> io::Result<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(count);

    for n in 0..count {
        match spawn_one(n) {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                drop(send);
                for handle in handles {
                    let _ = handle.join();
                }
                return Err(err);
            }
        }
    }

    Ok((send, handles))
}

struct Worker {
    pending: Receiver<Bytes>,
    collector: Collector,
    shared: Arc<Shared>,
}

impl Worker {
    fn run(self) {
        for payload in self.pending.iter() {
            let buf = self.decode(&payload);
            if !buf.is_empty() {
                self.push(buf);
            }
        }
        debug!("parse worker exiting");
    }

    fn decode(&self, payload: &[u8]) -> WriteBuffer {
        let counters = &self.shared.counters;
        let received_at = now();
        let mut buf = WriteBuffer::with_capacity(payload.len() * 2);

        for line in lines(payload) {
            match parse_line(line) {
                Ok(point) => buf.write_point(&point, received_at),
                Err(err) => {
                    Counters::add(&counters.errors, 1);
                    warn!(
                        line = %String::from_utf8_lossy(line),
                        error = err.description(),
                        "malformed line"
                    );
                }
            }
        }

        Counters::add(&counters.metrics_received, buf.rows() as u64);
        buf
    }

    fn push(&self, mut buf: WriteBuffer) {
        loop {
            match self.collector.push(buf, PUSH_POLL) {
                Ok(()) => return,
                Err(Rejected::Full(rejected)) => {
                    if !self.shared.is_stopping() {
                        buf = rejected;
                        continue;
                    }
                    self.drop_rows(rejected, "write queue full while stopping");
                    return;
                }
                Err(Rejected::Closed(rejected)) => {
                    self.drop_rows(rejected, "write queue closed");
                    return;
                }
            }
        }
    }

    fn drop_rows(&self, buf: WriteBuffer, reason: &str) {
        Counters::add(&self.shared.counters.dropped, buf.rows() as u64);
        warn!(rows = buf.rows(), reason, "dropping rows");
    }
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
