use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::Sender;
use tracing::{debug, info, warn, Dispatch};

use super::collector::Collector;
use super::error::Error;
use super::options::Config;
use super::stat::Counters;
use super::worker::{self, Shared};

/// How often blocked threads wake up to check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lines longer than this without a newline are discarded.
const MAX_LINE: usize = 64 * 1024;

const READ_CHUNK: usize = 16 * 1024;

/// Listens on a TCP socket for newline-delimited plaintext metrics.
#[derive(Debug)]
pub struct TcpReceiver {
    addr: SocketAddr,
    parse_threads: usize,
    shared: Arc<Shared>,
    threads: Mutex<Threads>,
}

#[derive(Debug, Default)]
struct Threads {
    accept: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl TcpReceiver {
    pub(crate) fn listen(
        addr: SocketAddr,
        collector: Collector,
        config: Config,
    ) -> Result<TcpReceiver, Error> {
        let listener = TcpListener::bind(addr).map_err(Error::activation(addr))?;
        let local_addr = listener.local_addr().map_err(Error::activation(addr))?;
        // Non-blocking so the accept loop can observe shutdown.
        listener
            .set_nonblocking(true)
            .map_err(Error::activation(addr))?;

        let logger = config.logger().clone();
        let shared = Shared::new();
        let (pending_send, workers) = worker::spawn_workers(
            "tcp",
            config.parse_threads(),
            &collector,
            &shared,
            &logger,
        )
        .map_err(Error::activation(addr))?;

        let accept = {
            let shared = Arc::clone(&shared);
            let read_timeout = config.read_timeout();
            let conn_logger = logger.clone();
            worker::spawn("tcp-accept".to_owned(), &logger, move || {
                accept_loop(listener, pending_send, shared, read_timeout, conn_logger)
            })
        };

        let accept = match accept {
            Ok(handle) => handle,
            Err(err) => {
                // The listener and the pending sender went down with the
                // closure, so the workers are already draining out.
                for handle in workers {
                    let _ = handle.join();
                }
                return Err(Error::activation(addr)(err));
            }
        };

        tracing::dispatcher::with_default(&logger, || {
            info!(addr = %local_addr, threads = config.parse_threads(), "listening on tcp")
        });

        Ok(TcpReceiver {
            addr: local_addr,
            parse_threads: workers.len(),
            shared,
            threads: Mutex::new(Threads {
                accept: Some(accept),
                workers,
            }),
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
        self.shared.counters.report_active(&mut send);
    }

    /// Stop accepting, close every client, then wait for the parse workers
    /// to drain what was already read. Concurrent callers all wait until
    /// the receiver is down.
    pub fn stop(&self) {
        self.shared.stop();

        // Held across the joins so a second caller blocks until they finish.
        let mut threads = match self.threads.lock() {
            Ok(threads) => threads,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Joining the accept thread also joins every client thread, and
        // with them the last pending senders.
        if let Some(accept) = threads.accept.take() {
            let _ = accept.join();
        }
        for handle in threads.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for TcpReceiver {
    fn drop(&mut self) {
        self.stop()
    }
}

fn accept_loop(
    listener: TcpListener,
    pending: Sender<Bytes>,
    shared: Arc<Shared>,
    read_timeout: Duration,
    logger: Dispatch,
) {
    let mut clients: Vec<JoinHandle<()>> = Vec::new();

    while !shared.is_stopping() {
        match listener.accept() {
            Ok((stream, peer)) => {
                let client = Client {
                    stream,
                    peer,
                    pending: pending.clone(),
                    shared: Arc::clone(&shared),
                    read_timeout,
                };
                match worker::spawn(format!("tcp-client-{}", peer), &logger, move || client.run()) {
                    Ok(handle) => clients.push(handle),
                    Err(err) => {
                        Counters::add(&shared.counters.errors, 1);
                        warn!(%peer, error = %err, "cannot spawn client thread");
                    }
                }
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(err) => {
                Counters::add(&shared.counters.errors, 1);
                warn!(error = %err, "accept failed");
                thread::sleep(POLL_INTERVAL);
            }
        }

        clients.retain(|handle| !handle.is_finished());
    }

    drop(listener);
    for handle in clients {
        let _ = handle.join();
    }
    debug!("accept loop exiting");
}

struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    pending: Sender<Bytes>,
    shared: Arc<Shared>,
    read_timeout: Duration,
}

impl Client {
    fn run(mut self) {
        Counters::add(&self.shared.counters.active, 1);
        debug!(peer = %self.peer, "client connected");

        if let Err(err) = self.read_lines() {
            Counters::add(&self.shared.counters.errors, 1);
            warn!(peer = %self.peer, error = %err, "error reading from client");
        }

        let _ = self.stream.shutdown(Shutdown::Both);
        Counters::sub(&self.shared.counters.active, 1);
        debug!(peer = %self.peer, "client disconnected");
    }

    fn read_lines(&mut self) -> io::Result<()> {
        // Accepted sockets may inherit the listener's non-blocking mode.
        self.stream.set_nonblocking(false)?;
        self.stream.set_read_timeout(Some(POLL_INTERVAL))?;

        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];
        let mut last_read = Instant::now();
        let mut discarding = false;

        loop {
            if self.shared.is_stopping() {
                return Ok(());
            }

            let n = match self.stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(ref err) if is_timeout(err) => {
                    if last_read.elapsed() >= self.read_timeout {
                        debug!(peer = %self.peer, "client idle, closing");
                        return Ok(());
                    }
                    continue;
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };

            last_read = Instant::now();
            Counters::add(&self.shared.counters.bytes_received, n as u64);
            let mut data = &chunk[..n];

            if discarding {
                // Skip the rest of an oversized line.
                match data.iter().position(|&c| c == b'\n') {
                    Some(pos) => {
                        data = &data[pos + 1..];
                        discarding = false;
                    }
                    None => continue,
                }
            }

            buf.extend_from_slice(data);

            if let Some(pos) = buf.iter().rposition(|&c| c == b'\n') {
                let lines = buf.split_to(pos + 1).freeze();
                if !self.forward(lines) {
                    return Ok(());
                }
            }

            if buf.len() > MAX_LINE {
                Counters::add(&self.shared.counters.errors, 1);
                warn!(peer = %self.peer, len = buf.len(), "line too long, discarding");
                buf.clear();
                discarding = true;
            }
        }

        // EOF: a final unterminated line is still a line.
        if !buf.is_empty() && !discarding {
            self.forward(buf.freeze());
        }
        Ok(())
    }

    fn forward(&self, payload: Bytes) -> bool {
        self.pending.send(payload).is_ok()
    }
} // impl Client

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use super::super::super::row::WriteBuffer;
    use crossbeam_channel::Receiver;

    fn receiver(config: Config) -> (TcpReceiver, Receiver<WriteBuffer>) {
        let (collector, rows) = Collector::unbounded();
        let receiver =
            TcpReceiver::listen("127.0.0.1:0".parse().unwrap(), collector, config).unwrap();
        (receiver, rows)
    }

    fn stat(receiver: &TcpReceiver, name: &str) -> f64 {
        let mut found = None;
        receiver.stat(|n, v| {
            if n == name {
                found = Some(v)
            }
        });
        found.unwrap()
    }

    #[test]
    fn it_receives_lines_split_across_writes() {
        let (receiver, rows) = receiver(Config::default());

        let mut client = TcpStream::connect(receiver.local_addr()).unwrap();
        client.write_all(b"foo 1 1500000000\nbar 2 15000").unwrap();
        client.flush().unwrap();
        thread::sleep(Duration::from_millis(50));
        client.write_all(b"00000\n").unwrap();
        drop(client);

        let mut total = 0;
        while total < 2 {
            let buf = rows.recv_timeout(Duration::from_secs(5)).unwrap();
            total += buf.rows();
        }

        receiver.stop();
        assert_eq!(stat(&receiver, "metricsReceived"), 2.0);
        assert_eq!(stat(&receiver, "errors"), 0.0);
    }

    #[test]
    fn it_forwards_an_unterminated_last_line_on_eof() {
        let (receiver, rows) = receiver(Config::default());

        let mut client = TcpStream::connect(receiver.local_addr()).unwrap();
        client.write_all(b"foo 1 1500000000").unwrap();
        drop(client);

        let buf = rows.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(buf.rows(), 1);
        receiver.stop();
    }

    #[test]
    fn it_discards_oversized_lines() {
        let (receiver, rows) = receiver(Config::default());

        let mut client = TcpStream::connect(receiver.local_addr()).unwrap();
        client.write_all(&vec![b'x'; MAX_LINE + 10]).unwrap();
        client.write_all(b"still the long line\nfoo 1 1500000000\n").unwrap();
        drop(client);

        let buf = rows.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(buf.rows(), 1);

        receiver.stop();
        assert_eq!(stat(&receiver, "errors"), 1.0);
    }

    #[test]
    fn it_closes_idle_clients() {
        let config = Config {
            read_timeout: Duration::from_millis(100),
            ..Config::default()
        };
        let (receiver, _rows) = receiver(config);

        let mut client = TcpStream::connect(receiver.local_addr()).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let mut buf = [0u8; 1];
        // Server side shuts the connection down, so the read sees EOF.
        assert_eq!(client.read(&mut buf).unwrap(), 0);

        let deadline = Instant::now() + Duration::from_secs(5);
        while stat(&receiver, "active") != 0.0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(stat(&receiver, "active"), 0.0);
        receiver.stop();
    }

    #[test]
    fn it_stops_with_clients_still_connected() {
        let (receiver, _rows) = receiver(Config::default());
        let _client = TcpStream::connect(receiver.local_addr()).unwrap();

        let started = Instant::now();
        receiver.stop();
        receiver.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(TcpStream::connect(receiver.local_addr()).is_err());
    }

    #[test]
    fn it_makes_every_concurrent_stop_wait() {
        let (receiver, _rows) = receiver(Config::default());
        let _client = TcpStream::connect(receiver.local_addr()).unwrap();

        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    receiver.stop();
                    // Every receiver thread has exited and released its
                    // handle on the shared state.
                    assert_eq!(Arc::strong_count(&receiver.shared), 1);
                });
            }
        });
    }
}
