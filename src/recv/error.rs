use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Why a receiver could not be built.
///
/// Only construction fails observably. Once a receiver is listening, bad
/// payloads and read errors show up in its counters, not here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid endpoint {descriptor:?}: {reason}")]
    InvalidDescriptor {
        descriptor: String,
        reason: &'static str,
    },

    #[error("unknown proto {0:?}")]
    UnsupportedScheme(String),

    #[error("cannot resolve {addr:?}: {source}")]
    AddressResolution {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot listen on {addr}: {source}")]
    Activation {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("no write channel configured")]
    MissingWriteChan,

    #[error("{requested} parse threads requested, at most {max} allowed")]
    TooManyParseThreads { requested: usize, max: usize },
}

impl Error {
    pub(crate) fn activation(addr: SocketAddr) -> impl FnOnce(io::Error) -> Error {
        move |source| Error::Activation { addr, source }
    }
}
