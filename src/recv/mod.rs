//! Receivers are how metrics come into the pipeline.
//!
//! A receiver listens on one endpoint, parses Graphite plaintext lines and
//! produces [`WriteBuffer`](crate::row::WriteBuffer)s into a [`Collector`]
//! shared with the writer. There are two transports:
//!   - TCP (`tcp://host:port`), newline-delimited streams
//!   - UDP (`udp://host:port`), one or more lines per datagram
//!
//! The only way to get a [`Receiver`] is [`new`] or [`Builder::listen`],
//! and both hand it back already listening.

mod collector;
mod endpoint;
mod error;
mod options;
pub mod plaintext;
mod stat;
mod tcp;
mod udp;
mod worker;

use std::net::SocketAddr;

pub use self::collector::Collector;
pub use self::endpoint::{Endpoint, Scheme};
pub use self::error::Error;
pub use self::options::{Builder, Config, Opt, DEFAULT_READ_TIMEOUT, MAX_PARSE_THREADS};
pub use self::tcp::TcpReceiver;
pub use self::udp::UdpReceiver;

/// A listening receiver of either transport.
#[derive(Debug)]
pub enum Receiver {
    Tcp(TcpReceiver),
    Udp(UdpReceiver),
}

impl Receiver {
    /// Report every counter as `(name, value)`. Counters keep their values
    /// after being read, and reading is safe after [`stop`](Receiver::stop).
    pub fn stat<F: FnMut(&str, f64)>(&self, send: F) {
        match self {
            Receiver::Tcp(r) => r.stat(send),
            Receiver::Udp(r) => r.stat(send),
        }
    }

    /// Shut the receiver down. Returns once nothing more will be produced
    /// into the collector. Later calls do nothing.
    pub fn stop(&self) {
        match self {
            Receiver::Tcp(r) => r.stop(),
            Receiver::Udp(r) => r.stop(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        match self {
            Receiver::Tcp(r) => r.local_addr(),
            Receiver::Udp(r) => r.local_addr(),
        }
    }

    /// Number of parse workers actually running.
    pub fn parse_threads(&self) -> usize {
        match self {
            Receiver::Tcp(r) => r.parse_threads(),
            Receiver::Udp(r) => r.parse_threads(),
        }
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            Receiver::Tcp(_) => Scheme::Stream,
            Receiver::Udp(_) => Scheme::Datagram,
        }
    }
}

/// Create a listening receiver for `descriptor` with `opts` applied in order.
///
/// Shorthand for [`Builder::new`] followed by [`Builder::options`] and
/// [`Builder::listen`].
pub fn new<I>(descriptor: &str, opts: I) -> Result<Receiver, Error>
    where I: IntoIterator<Item = Opt> {
    Builder::new(descriptor).options(opts).listen()
}
