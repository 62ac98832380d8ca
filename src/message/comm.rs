use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::util;
use crate::error::{Error, Result};

/// Label attached to every message. Receives name the tag they expect;
/// anything else that arrives in the meantime is held back by the mailbox.
/// Collective operations are numbered so that a rank which races ahead into
/// the next collective cannot feed a slower peer the wrong value.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    Broadcast(u64),
    Reduce(u64),
    HaloLevels(u64),
    Halo(u64),
}

/// Interface for a group of processes that can exchange messages over a
/// network. The underlying transport can in principle be TCP, UDP, or a
/// higher level abstraction like MPI.
///
pub trait Communicator {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peers processes in this
    /// communicator.
    fn size(&self) -> usize;

    /// Must be implemented to send a message to a peer. This method must
    /// return immediately, in other words it is not allowed to block until a
    /// matching receive is posted.
    fn send(&self, rank: usize, tag: Tag, message: Vec<u8>) -> Result<()>;

    /// Must be implemented to receive a message with the given tag from any
    /// of the peers, returning the sender's rank along with the message. This
    /// method is allowed to block until a matching message is ready.
    fn recv(&self, tag: Tag) -> Result<(usize, Vec<u8>)>;

    /// Must be implemented to bound how long `recv` may block. `None` means
    /// wait forever.
    fn set_recv_timeout(&mut self, timeout: Option<Duration>);

    /// Must be implemented to return a fresh sequence number for the next
    /// collective operation. All ranks call collectives in the same order, so
    /// the numbers agree across the group.
    fn next_collective(&self) -> u64;

    /// Implements a binomial tree broadcast from the root node. The message
    /// buffer must be `Some` if this is the root node, and it must be `None`
    /// otherwise.
    ///
    fn broadcast(&self, value: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let tag = Tag::Broadcast(self.next_collective());
        let r = self.rank();
        let p = self.size();

        let value = match value {
            Some(value) => value,
            None => self.recv(tag)?.1,
        };
        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 && r + one < p {
                self.send(r + one, tag, value.clone())?
            }
        }
        Ok(value)
    }

    /// Implements a binomial tree reduce. All ranks return `None` except for
    /// the root.
    ///
    fn reduce<F>(&self, f: F, mut value: Vec<u8>) -> Result<Option<Vec<u8>>>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        let tag = Tag::Reduce(self.next_collective());
        let r = self.rank();
        let p = self.size();

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 {
                if r + one < p {
                    value = f(value, self.recv(tag)?.1)
                }
            } else {
                self.send(r - one, tag, value)?;
                return Ok(None);
            }
        }
        Ok(Some(value))
    }

    /// Implements an all-reduce (symmetric fold) operation over a commutative
    /// binary operator.
    ///
    fn all_reduce<F>(&self, f: F, value: Vec<u8>) -> Result<Vec<u8>>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        let reduced = self.reduce(f, value)?;
        self.broadcast(reduced)
    }

    /// All-reduce of a single float under a commutative operator such as
    /// `f64::min`.
    ///
    fn all_reduce_f64(&self, op: fn(f64, f64) -> f64, value: f64) -> Result<f64> {
        let combine = move |a: Vec<u8>, b: Vec<u8>| combine_f64(op, &a, &b);
        let bytes = self.all_reduce(combine, util::f64s_to_bytes(&[value]))?;
        let mut result = [0.0];
        util::bytes_to_f64s(&bytes, &mut result)
            .ok_or_else(|| Error::Codec(format!("all-reduce yielded {} bytes", bytes.len())))?;
        Ok(result[0])
    }
}




/**
 * Fold two encoded floats with `op`. A malformed operand yields an empty
 * payload, which stays empty through the rest of the tree and fails to
 * decode on every rank once the result is broadcast.
 */
fn combine_f64(op: fn(f64, f64) -> f64, a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut x = [0.0; 2];

    match (util::bytes_to_f64s(a, &mut x[..1]), util::bytes_to_f64s(b, &mut x[1..])) {
        (Some(()), Some(())) => util::f64s_to_bytes(&[op(x[0], x[1])]),
        _ => Vec::new(),
    }
}
