use std::time::Duration;

use crossbeam_channel::{self as channel, Receiver, SendTimeoutError, Sender};

use super::super::row::WriteBuffer;

/// Producer end of the output queue shared by every receiver feeding one
/// writer. Cloning is cheap; all clones feed the same queue.
#[derive(Clone, Debug)]
pub struct Collector {
    sender: Sender<WriteBuffer>,
}

/// Outcome of a push that did not make it into the queue.
#[derive(Debug)]
pub(crate) enum Rejected {
    /// Queue still full after the timeout; the buffer is handed back.
    Full(WriteBuffer),
    /// Nobody is consuming anymore.
    Closed(WriteBuffer),
}

impl Collector {
    pub fn new(sender: Sender<WriteBuffer>) -> Collector {
        Collector { sender }
    }

    /// A collector over a queue holding at most `cap` buffers.
    pub fn bounded(cap: usize) -> (Collector, Receiver<WriteBuffer>) {
        let (sender, receiver) = channel::bounded(cap);
        (Collector::new(sender), receiver)
    }

    pub fn unbounded() -> (Collector, Receiver<WriteBuffer>) {
        let (sender, receiver) = channel::unbounded();
        (Collector::new(sender), receiver)
    }

    pub(crate) fn push(&self, buf: WriteBuffer, timeout: Duration) -> Result<(), Rejected> {
        match self.sender.send_timeout(buf, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(buf)) => Err(Rejected::Full(buf)),
            Err(SendTimeoutError::Disconnected(buf)) => Err(Rejected::Closed(buf)),
        }
    }
}

impl From<Sender<WriteBuffer>> for Collector {
    fn from(sender: Sender<WriteBuffer>) -> Collector {
        Collector::new(sender)
    }
}
