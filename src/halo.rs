use log::debug;

use crate::error::{Error, Result};
use crate::field::{FieldLayout, FieldState};
use crate::mesh::{HaloNeighbor, MeshPartition};
use crate::message::comm::{Communicator, Tag};
use crate::message::util;

struct Scratch {
    send: Vec<f64>,
    recv: Vec<f64>,
}




/**
 * Moves the traces of rank-boundary elements to the neighboring ranks and
 * the neighbors' traces into the halo region of the field state. The staging
 * buffers are reused every tick: `start` lends them to the returned
 * [`PendingExchange`], which gives them back when it is finished or dropped.
 * Because the pending exchange borrows the adapter, a second exchange cannot
 * start before the first one has been merged.
 */
pub struct HaloExchange<C: Communicator> {
    comm: C,
    neighbors: Vec<HaloNeighbor>,
    layout: FieldLayout,
    num_owned: usize,
    num_halo: usize,
    sequence: u64,
    level_sequence: u64,
    scratch: Option<Scratch>,
}

impl<C: Communicator> HaloExchange<C> {
    pub fn new(comm: C, mesh: &MeshPartition, layout: FieldLayout) -> Self {
        let send_len = mesh.num_boundary_elements() * layout.element_len();
        let recv_len = mesh
            .halo_neighbors()
            .iter()
            .map(|nb| nb.recv_count)
            .max()
            .unwrap_or(0)
            * layout.element_len();

        Self {
            comm,
            neighbors: mesh.halo_neighbors().to_vec(),
            layout,
            num_owned: mesh.num_elements(),
            num_halo: mesh.num_halo(),
            sequence: 0,
            level_sequence: 0,
            scratch: Some(Scratch {
                send: Vec::with_capacity(send_len),
                recv: vec![0.0; recv_len],
            }),
        }
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// True when this rank shares no faces with other ranks.
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Bytes sent by this rank in one exchange.
    pub fn num_bytes(&self) -> usize {
        self.neighbors.iter().map(|nb| nb.send_elements.len()).sum::<usize>()
            * self.layout.element_len()
            * std::mem::size_of::<f64>()
    }

    /// Extract the traces of the boundary elements and post them to each
    /// neighbor. Returns immediately.
    pub fn start(&mut self, state: &FieldState) -> Result<PendingExchange<'_, C>> {
        let tag = Tag::Halo(self.sequence);
        self.sequence += 1;

        let mut scratch = self.scratch.take().unwrap_or_else(|| Scratch {
            send: Vec::new(),
            recv: Vec::new(),
        });

        for nb in &self.neighbors {
            scratch.send.clear();
            for &e in &nb.send_elements {
                scratch.send.extend_from_slice(state.trace(e));
            }
            debug!("halo {:?}: {} elements to rank {}", tag, nb.send_elements.len(), nb.rank);
            self.comm.send(nb.rank, tag, util::f64s_to_bytes(&scratch.send))?;
        }

        Ok(PendingExchange {
            exchange: self,
            scratch: Some(scratch),
            tag,
        })
    }

    /**
     * Tell the neighbors the level of each boundary element and learn the
     * levels of the halo elements. `owned_levels` covers the owned elements;
     * the result covers the halo elements.
     */
    pub fn exchange_levels(&mut self, owned_levels: &[usize]) -> Result<Vec<usize>> {
        let tag = Tag::HaloLevels(self.level_sequence);
        self.level_sequence += 1;

        for nb in &self.neighbors {
            let levels: Vec<usize> = nb.send_elements.iter().map(|&e| owned_levels[e]).collect();
            self.comm.send(nb.rank, tag, rmp_serde::to_vec(&levels)?)?;
        }

        let mut halo_levels = vec![0; self.num_halo];

        for _ in 0..self.neighbors.len() {
            let (source, bytes) = self.comm.recv(tag)?;
            let nb = self.neighbor(source)?;
            let levels: Vec<usize> = rmp_serde::from_slice(&bytes)?;

            if levels.len() != nb.recv_count {
                return Err(Error::comm(format!(
                    "rank {} sent {} halo levels, expected {}",
                    source,
                    levels.len(),
                    nb.recv_count
                )));
            }
            halo_levels[nb.recv_start..nb.recv_start + nb.recv_count].copy_from_slice(&levels);
        }
        Ok(halo_levels)
    }

    fn neighbor(&self, rank: usize) -> Result<&HaloNeighbor> {
        self.neighbors
            .iter()
            .find(|nb| nb.rank == rank)
            .ok_or_else(|| Error::comm(format!("unexpected halo message from rank {}", rank)))
    }
}




/**
 * An exchange that has been started but not yet merged.
 */
pub struct PendingExchange<'a, C: Communicator> {
    exchange: &'a mut HaloExchange<C>,
    scratch: Option<Scratch>,
    tag: Tag,
}

impl<'a, C: Communicator> PendingExchange<'a, C> {

    /// Block until every neighbor's traces have arrived and copy them into
    /// the halo region of `state`.
    pub fn finish(mut self, state: &mut FieldState) -> Result<()> {
        let tag = self.tag;
        let len = self.exchange.layout.element_len();
        let num_owned = self.exchange.num_owned;
        let mut scratch = self.scratch.take().unwrap_or_else(|| Scratch {
            send: Vec::new(),
            recv: Vec::new(),
        });

        if state.num_owned() != num_owned {
            return Err(Error::config("halo exchange used with a foreign field state"));
        }

        for _ in 0..self.exchange.neighbors.len() {
            let (source, bytes) = self.exchange.comm.recv(tag)?;
            let nb = self.exchange.neighbor(source)?;
            let n = nb.recv_count * len;

            scratch.recv.resize(n.max(scratch.recv.len()), 0.0);
            util::bytes_to_f64s(&bytes, &mut scratch.recv[..n]).ok_or_else(|| {
                Error::comm(format!(
                    "rank {} sent {} bytes of halo data, expected {}",
                    source,
                    bytes.len(),
                    n * std::mem::size_of::<f64>()
                ))
            })?;
            state.halo_region_mut()[nb.recv_start * len..nb.recv_start * len + n]
                .copy_from_slice(&scratch.recv[..n]);
        }
        debug!("halo {:?}: merged", tag);

        self.scratch = Some(scratch);
        Ok(())
    }
}

impl<'a, C: Communicator> Drop for PendingExchange<'a, C> {
    fn drop(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            self.exchange.scratch = Some(scratch);
        }
    }
}
