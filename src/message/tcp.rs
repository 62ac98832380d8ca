use std::cell::Cell;
use std::collections::HashMap;
use std::io::prelude::*;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};

use super::backoff::{ExponentialBackoff, Retry};
use super::comm::{Communicator, Tag};
use super::mailbox::{Envelope, Mailbox};
use super::util;
use crate::error::{Error, Result};

const CONNECT_ATTEMPTS: usize = 20;
const RETRY_WAIT_MS: Duration = Duration::from_millis(250);
const RETRY_MAX_WAIT_MS: Duration = Duration::from_millis(5000);

/// The background half of a TCP communicator: one thread that owns all the
/// outgoing streams and writes queued messages in order, and one thread that
/// accepts connections and spawns a reader per peer. Each message is framed
/// by its length and acknowledged by the receiver echoing that length back.
///
pub struct TcpHost {
    listen_thread: Option<thread::JoinHandle<()>>,
    send_thread: Option<thread::JoinHandle<()>>,
}

impl TcpHost {
    pub fn new(
        rank: usize,
        peers: Vec<SocketAddr>,
    ) -> Result<(Self, Sender<(usize, Vec<u8>)>, Sender<Vec<u8>>, Receiver<Vec<u8>>)> {
        let addr = *peers
            .get(rank)
            .ok_or_else(|| Error::config(format!("rank {} has no address in the peer list", rank)))?;
        let listener = TcpListener::bind(addr)?;
        info!("Listening to: {}", addr);

        let (send_sink, send_src) = crossbeam_channel::unbounded();
        let (recv_sink, recv_src) = crossbeam_channel::unbounded();
        let send_thread = Self::start_serial_sender(peers, send_src);
        let listen_thread = Self::start_listener(listener, recv_sink.clone());

        let host = TcpHost {
            send_thread: Some(send_thread),
            listen_thread: Some(listen_thread),
        };
        Ok((host, send_sink, recv_sink, recv_src))
    }

    /// Wait for the sender thread to drain its queue. The queue closes when
    /// the communicator holding its sending end is dropped.
    pub fn join(&mut self) {
        if let Some(handle) = self.send_thread.take() {
            if handle.join().is_err() {
                error!("TCP sender thread panicked");
            }
        }
        self.listen_thread.take();
    }

    fn start_serial_sender(
        peers: Vec<SocketAddr>,
        send_src: Receiver<(usize, Vec<u8>)>,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut table: HashMap<usize, TcpStream> = HashMap::new();

            for (rank, message) in send_src {
                if !table.contains_key(&rank) {
                    match Self::connect_with_retry(peers[rank]) {
                        Ok(stream) => {
                            table.insert(rank, stream);
                        }
                        Err(e) => {
                            error!("Could not connect to {}: {}", peers[rank], e);
                            return;
                        }
                    }
                }
                let client = match table.get_mut(&rank) {
                    Some(client) => client,
                    None => return,
                };

                if let Err(e) = Self::write_acknowledged(client, &message) {
                    // The exchange protocol has no way to recover a lost
                    // message, so the link is abandoned and the next send on
                    // this rank reports the failure.
                    error!("Failed to send message to {}: {}", peers[rank], e);
                    return;
                }
            }
            debug!("Sender queue closed");
        })
    }

    fn write_acknowledged(client: &mut TcpStream, message: &[u8]) -> std::io::Result<()> {
        let msg_sz = message.len();
        client.write_all(&msg_sz.to_le_bytes())?;
        client.write_all(message)?;
        let ack = util::read_usize(client)?;

        if ack != msg_sz {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("sent {} bytes but receiver acked {} bytes", msg_sz, ack),
            ));
        }
        Ok(())
    }

    fn start_listener(listener: TcpListener, recv_sink: Sender<Vec<u8>>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => Self::handle_connection(stream, recv_sink.clone()),
                    Err(e) => warn!("Failed to accept connection: {}", e),
                }
            }
        })
    }

    fn handle_connection(mut stream: TcpStream, recv_sink: Sender<Vec<u8>>) {
        let remote = stream.peer_addr().ok();
        info!("Receiving connection from {:?}", remote);

        thread::spawn(move || loop {
            let received = util::read_usize(&mut stream)
                .and_then(|size| util::read_bytes_vec(&mut stream, size))
                .and_then(|bytes| {
                    let num_bytes = bytes.len();
                    recv_sink
                        .send(bytes)
                        .map(|()| num_bytes)
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
                })
                .and_then(|size| stream.write_all(&size.to_le_bytes()));

            if let Err(e) = received {
                debug!("Connection from {:?} closed: {}", remote, e);
                break;
            }
        });
    }

    fn connect_with_retry(addr: SocketAddr) -> std::io::Result<TcpStream> {
        let backoff = ExponentialBackoff::new(RETRY_WAIT_MS, RETRY_MAX_WAIT_MS, 2).take(CONNECT_ATTEMPTS);
        let attempt = backoff.retry(
            || TcpStream::connect(addr),
            |e, delay| {
                warn!("Connect to {} failed: {}, retrying in {:?}", addr, e, delay);
                thread::sleep(delay)
            },
        );
        match attempt {
            Some(stream) => stream,
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no connection attempts were made",
            )),
        }
    }
}




/**
 * A communicator over TCP sockets, one process per rank. Messages to self are
 * looped back without touching the network.
 */
pub struct TcpCommunicator {
    rank: usize,
    num_peers: usize,
    send_sink: Sender<(usize, Vec<u8>)>,
    loopback: Sender<Vec<u8>>,
    mailbox: Mailbox,
    collective: Cell<u64>,
}

impl TcpCommunicator {
    pub fn new(
        rank: usize,
        peers: &[SocketAddr],
        send_sink: Sender<(usize, Vec<u8>)>,
        loopback: Sender<Vec<u8>>,
        recv_src: Receiver<Vec<u8>>,
    ) -> Self {
        Self {
            rank,
            num_peers: peers.len(),
            send_sink,
            loopback,
            mailbox: Mailbox::new(recv_src),
            collective: Cell::new(0),
        }
    }

    /// Start a host and wrap it in a communicator.
    pub fn connect(rank: usize, peers: Vec<SocketAddr>) -> Result<(TcpHost, Self)> {
        let (host, send_sink, loopback, recv_src) = TcpHost::new(rank, peers.clone())?;
        let comm = Self::new(rank, &peers, send_sink, loopback, recv_src);
        Ok((host, comm))
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn send(&self, rank: usize, tag: Tag, message: Vec<u8>) -> Result<()> {
        if rank >= self.num_peers {
            return Err(Error::comm(format!("no rank {} in a group of {}", rank, self.num_peers)));
        }
        let bytes = Envelope {
            source: self.rank,
            tag,
            payload: message,
        }
        .encode()?;

        if rank == self.rank {
            self.loopback
                .send(bytes)
                .map_err(|_| Error::comm("loopback channel closed"))
        } else {
            self.send_sink
                .send((rank, bytes))
                .map_err(|_| Error::comm(format!("link to rank {} is down", rank)))
        }
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
