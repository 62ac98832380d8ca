use std::cell::Cell;
use std::time::Duration;

use crossbeam_channel::Sender;

use super::comm::{Communicator, Tag};
use super::mailbox::{Envelope, Mailbox};
use crate::error::{Error, Result};

/// A communicator whose ranks live in the same process, typically one per
/// thread. Messages go straight into the recipient's inbound channel, so
/// `send` never blocks. A group of size one is the natural communicator for
/// a single-rank run.
///
pub struct ChannelCommunicator {
    rank: usize,
    peers: Vec<Sender<Vec<u8>>>,
    mailbox: Mailbox,
    collective: Cell<u64>,
}

impl ChannelCommunicator {
    /// Create a fully connected group of the given size. The communicator at
    /// index `n` of the returned vector has rank `n`.
    ///
    pub fn group(size: usize) -> Vec<Self> {
        let (sinks, sources): (Vec<_>, Vec<_>) =
            (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        sources
            .into_iter()
            .enumerate()
            .map(|(rank, source)| Self {
                rank,
                peers: sinks.clone(),
                mailbox: Mailbox::new(source),
                collective: Cell::new(0),
            })
            .collect()
    }

    /// A group of one.
    pub fn solo() -> Self {
        let mut group = Self::group(1);
        group.remove(0)
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, tag: Tag, message: Vec<u8>) -> Result<()> {
        let peer = self
            .peers
            .get(rank)
            .ok_or_else(|| Error::comm(format!("no rank {} in a group of {}", rank, self.size())))?;
        let env = Envelope {
            source: self.rank,
            tag,
            payload: message,
        };
        peer.send(env.encode()?)
            .map_err(|_| Error::comm(format!("rank {} has hung up", rank)))
    }

    fn recv(&self, tag: Tag) -> Result<(usize, Vec<u8>)> {
        self.mailbox.recv(tag)
    }

    fn set_recv_timeout(&mut self, timeout: Option<Duration>) {
        self.mailbox.set_timeout(timeout)
    }

    fn next_collective(&self) -> u64 {
        let n = self.collective.get();
        self.collective.set(n + 1);
        n
    }
}
