use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::debug;
use serde::{Deserialize, Serialize};

use super::comm::Tag;
use crate::error::{Error, Result};

/// What actually travels over a transport: the payload plus enough metadata
/// for the receiver to match it against a pending `recv`.
///
#[derive(Serialize, Deserialize, Debug)]
pub struct Envelope {
    pub source: usize,
    pub tag: Tag,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::encode::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::decode::from_slice(bytes)?)
    }
}

/// The receiving end of a transport. Encoded envelopes arrive over a channel
/// in whatever order the network delivers them; `recv` hands out the first
/// one carrying the requested tag and keeps the others, in arrival order,
/// until somebody asks for them.
///
pub struct Mailbox {
    inbound: Receiver<Vec<u8>>,
    held: RefCell<VecDeque<Envelope>>,
    timeout: Option<Duration>,
}

impl Mailbox {
    pub fn new(inbound: Receiver<Vec<u8>>) -> Self {
        Self {
            inbound,
            held: RefCell::new(VecDeque::new()),
            timeout: None,
        }
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout
    }

    /// Number of messages that arrived ahead of their receive.
    pub fn num_held(&self) -> usize {
        self.held.borrow().len()
    }

    pub fn recv(&self, tag: Tag) -> Result<(usize, Vec<u8>)> {
        {
            let mut held = self.held.borrow_mut();
            let found = held.iter().position(|env| env.tag == tag);

            if let Some(env) = found.and_then(|i| held.remove(i)) {
                return Ok((env.source, env.payload));
            }
        }
        loop {
            let bytes = match self.timeout {
                None => self
                    .inbound
                    .recv()
                    .map_err(|_| Error::comm("all senders disconnected"))?,
                Some(timeout) => match self.inbound.recv_timeout(timeout) {
                    Ok(bytes) => bytes,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(Error::Timeout(format!("{:?}", tag)))
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(Error::comm("all senders disconnected"))
                    }
                },
            };
            let env = Envelope::decode(&bytes)?;

            if env.tag == tag {
                return Ok((env.source, env.payload));
            }
            debug!("holding {:?} from rank {} while waiting on {:?}", env.tag, env.source, tag);
            self.held.borrow_mut().push_back(env);
        }
    }
}
