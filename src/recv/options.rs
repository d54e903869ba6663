//! Receiver configuration, set before the receiver starts listening.

use std::time::Duration;

use tracing::Dispatch;

use super::collector::Collector;
use super::endpoint::{Endpoint, Scheme};
use super::error::Error;
use super::tcp::TcpReceiver;
use super::udp::UdpReceiver;
use super::Receiver;

/// Upper bound on parse workers per receiver. The pending queue is sized
/// from the worker count, so larger values are rejected.
pub const MAX_PARSE_THREADS: usize = 1024;

/// Idle TCP clients are disconnected after this long without data.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Everything a transport needs to start. Built by [`Builder`]; transports
/// never see a `Config` that has not been validated.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) write_chan: Option<Collector>,
    /// Zero means unset.
    pub(crate) parse_threads: usize,
    pub(crate) logger: Dispatch,
    pub(crate) read_timeout: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            write_chan: None,
            parse_threads: 0,
            logger: Dispatch::none(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl Config {
    /// Parse threads to actually spawn.
    pub fn parse_threads(&self) -> usize {
        self.parse_threads.max(1)
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn logger(&self) -> &Dispatch {
        &self.logger
    }

    fn validate(&self) -> Result<Collector, Error> {
        if self.parse_threads > MAX_PARSE_THREADS {
            return Err(Error::TooManyParseThreads {
                requested: self.parse_threads,
                max: MAX_PARSE_THREADS,
            });
        }
        self.write_chan.clone().ok_or(Error::MissingWriteChan)
    }
}

/// A single configuration change. Options are applied in order and later
/// ones overwrite earlier ones.
#[derive(Clone, Debug)]
pub enum Opt {
    /// Queue that parsed rows are produced into.
    WriteChan(Collector),
    /// Number of decode workers.
    ParseThreads(usize),
    /// Diagnostics sink for the receiver's threads.
    Logger(Dispatch),
    /// Idle timeout for TCP clients. Datagram receivers ignore it.
    ReadTimeout(Duration),
}

impl Opt {
    fn apply(self, config: &mut Config) {
        match self {
            Opt::WriteChan(collector) => config.write_chan = Some(collector),
            Opt::ParseThreads(threads) => config.parse_threads = threads,
            Opt::Logger(logger) => config.logger = logger,
            Opt::ReadTimeout(timeout) => config.read_timeout = timeout,
        }
    }
}

/// Builds a listening [`Receiver`] from an endpoint descriptor.
///
/// ```no_run
/// use metriqs_ingest::{Builder, Collector};
///
/// let (collector, rows) = Collector::bounded(1024);
/// let receiver = Builder::new("tcp://127.0.0.1:2003")
///     .write_chan(collector)
///     .parse_threads(4)
///     .listen()?;
/// # drop(rows);
/// # receiver.stop();
/// # Ok::<(), metriqs_ingest::Error>(())
/// ```
#[derive(Debug)]
pub struct Builder {
    descriptor: String,
    config: Config,
}

impl Builder {
    pub fn new<S: Into<String>>(descriptor: S) -> Builder {
        Builder {
            descriptor: descriptor.into(),
            config: Config::default(),
        }
    }

    pub fn option(mut self, opt: Opt) -> Builder {
        opt.apply(&mut self.config);
        self
    }

    pub fn options<I: IntoIterator<Item = Opt>>(self, opts: I) -> Builder {
        opts.into_iter().fold(self, Builder::option)
    }

    pub fn write_chan(self, collector: Collector) -> Builder {
        self.option(Opt::WriteChan(collector))
    }

    pub fn parse_threads(self, threads: usize) -> Builder {
        self.option(Opt::ParseThreads(threads))
    }

    pub fn logger(self, logger: Dispatch) -> Builder {
        self.option(Opt::Logger(logger))
    }

    pub fn read_timeout(self, timeout: Duration) -> Builder {
        self.option(Opt::ReadTimeout(timeout))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parse and resolve the descriptor, validate the configuration, then
    /// bind. Nothing is left open when this fails.
    pub fn listen(self) -> Result<Receiver, Error> {
        let endpoint = Endpoint::parse(&self.descriptor)?;
        let addr = endpoint.resolve()?;
        let collector = self.config.validate()?;

        match endpoint.scheme {
            Scheme::Stream => {
                TcpReceiver::listen(addr, collector, self.config).map(Receiver::Tcp)
            }
            Scheme::Datagram => {
                UdpReceiver::listen(addr, collector, self.config).map(Receiver::Udp)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_defaults_to_one_parse_thread_and_no_logger() {
        let config = Config::default();
        assert_eq!(config.parse_threads(), 1);
        assert!(config.logger().is::<tracing::subscriber::NoSubscriber>());
        assert!(config.write_chan.is_none());
    }

    #[test]
    fn it_treats_zero_parse_threads_as_unset() {
        let builder = Builder::new("tcp://127.0.0.1:0").parse_threads(0);
        assert_eq!(builder.config().parse_threads(), 1);
    }

    #[test]
    fn it_applies_options_last_write_wins() {
        let builder = Builder::new("tcp://127.0.0.1:0").options(vec![
            Opt::ParseThreads(2),
            Opt::ReadTimeout(Duration::from_secs(1)),
            Opt::ParseThreads(8),
        ]);
        assert_eq!(builder.config().parse_threads(), 8);
        assert_eq!(builder.config().read_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn it_requires_a_write_chan() {
        assert!(matches!(
            Builder::new("tcp://127.0.0.1:0").listen(),
            Err(Error::MissingWriteChan)
        ));
    }

    #[test]
    fn it_rejects_too_many_parse_threads() {
        let (collector, _rows) = Collector::unbounded();

        for threads in &[MAX_PARSE_THREADS + 1, usize::MAX] {
            match Builder::new("udp://127.0.0.1:0")
                .write_chan(collector.clone())
                .parse_threads(*threads)
                .listen()
            {
                Err(Error::TooManyParseThreads { requested, max }) => {
                    assert_eq!(requested, *threads);
                    assert_eq!(max, MAX_PARSE_THREADS);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn it_reports_descriptor_errors_before_config_errors() {
        assert!(matches!(
            Builder::new("tcp//127.0.0.1:0").listen(),
            Err(Error::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            Builder::new("pickle://127.0.0.1:0").listen(),
            Err(Error::UnsupportedScheme(_))
        ));
    }
}
