use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use super::collector::Collector;
use super::error::Error;
use super::options::Config;
use super::stat::Counters;
use super::worker::{self, Shared};

/// How often the reader wakes up to check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Largest possible UDP payload.
const MAX_DATAGRAM: usize = 65_535;

/// Listens for plaintext metrics in UDP datagrams.
#[derive(Debug)]
pub struct UdpReceiver {
    addr: SocketAddr,
    parse_threads: usize,
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl UdpReceiver {
    pub(crate) fn listen(
        addr: SocketAddr,
        collector: Collector,
        config: Config,
    ) -> Result<UdpReceiver, Error> {
        let socket = UdpSocket::bind(addr).map_err(Error::activation(addr))?;
        let local_addr = socket.local_addr().map_err(Error::activation(addr))?;
        socket
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(Error::activation(addr))?;

        let logger = config.logger().clone();
        let shared = Shared::new();
        let (pending_send, mut threads) = worker::spawn_workers(
            "udp",
            config.parse_threads(),
            &collector,
            &shared,
            &logger,
        )
        .map_err(Error::activation(addr))?;

        let parse_threads = threads.len();

        let reader = {
            let shared = Arc::clone(&shared);
            worker::spawn("udp-read".to_owned(), &logger, move || {
                read_loop(socket, pending_send, shared)
            })
        };

        match reader {
            // Reader first, so stop joins it before the workers.
            Ok(handle) => threads.insert(0, handle),
            Err(err) => {
                for handle in threads {
                    let _ = handle.join();
                }
                return Err(Error::activation(addr)(err));
            }
        }

        tracing::dispatcher::with_default(&logger, || {
            info!(addr = %local_addr, threads = config.parse_threads(), "listening on udp")
        });

        Ok(UdpReceiver {
            addr: local_addr,
            parse_threads,
            shared,
            threads: Mutex::new(threads),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of parse workers started.
    pub fn parse_threads(&self) -> usize {
        self.parse_threads
    }

    pub fn stat<F: FnMut(&str, f64)>(&self, mut send: F) {
        self.shared.counters.report_common(&mut send);
        self.shared.counters.report_incomplete(&mut send);
    }

    /// Stop reading, then wait for the parse workers to drain what was
    /// already received. Concurrent callers all wait until the receiver is
    /// down.
    pub fn stop(&self) {
        self.shared.stop();

        // Held across the joins so a second caller blocks until they finish.
        let mut threads = match self.threads.lock() {
            Ok(threads) => threads,
            Err(poisoned) => poisoned.into_inner(),
        };

        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for UdpReceiver {
    fn drop(&mut self) {
        self.stop()
    }
}

fn read_loop(socket: UdpSocket, pending: Sender<Bytes>, shared: Arc<Shared>) {
    let counters = &shared.counters;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    while !shared.is_stopping() {
        let (n, peer) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(ref err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(err) => {
                Counters::add(&counters.errors, 1);
                warn!(error = %err, "error reading datagram");
                continue;
            }
        };

        Counters::add(&counters.bytes_received, n as u64);
        let datagram = &buf[..n];

        // A datagram not ending in a newline may have been truncated, so its
        // tail is not trusted.
        let complete = match datagram.iter().rposition(|&c| c == b'\n') {
            Some(pos) if pos + 1 == n => datagram,
            Some(pos) => {
                Counters::add(&counters.incomplete_received, 1);
                debug!(%peer, "incomplete datagram");
                &datagram[..pos + 1]
            }
            None => {
                Counters::add(&counters.incomplete_received, 1);
                debug!(%peer, "incomplete datagram");
                continue;
            }
        };

        if pending.send(Bytes::copy_from_slice(complete)).is_err() {
            break;
        }
    }

    debug!("udp reader exiting");
}
