use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// What lies across one face of an owned element.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Neighbor {
    /// Another element of this partition: an owned element if the index is
    /// below `num_elements`, otherwise a halo element.
    Element(usize),

    /// A physical boundary of the domain.
    Boundary,
}

/// Halo traffic with one neighboring rank: the owned elements whose values
/// that rank needs, and where in the halo region its values for us land.
/// Both sides order the elements by global id, so the lists line up without
/// any index translation on the wire.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HaloNeighbor {
    pub rank: usize,
    pub send_elements: Vec<usize>,
    pub recv_start: usize,
    pub recv_count: usize,
}




/**
 * The part of the mesh owned by one rank. Owned elements are numbered
 * `0..num_elements`; halo (ghost) copies of neighboring ranks' elements
 * follow contiguously at `num_elements..num_elements + num_halo`. Immutable
 * for the duration of a run.
 */
#[derive(Clone, Debug)]
pub struct MeshPartition {
    num_elements: usize,
    num_halo: usize,
    nodes_per_element: usize,
    faces_per_element: usize,
    connectivity: Vec<Neighbor>,
    element_size: Vec<f64>,
    node_coordinates: Vec<f64>,
    global_ids: Vec<usize>,
    halo_neighbors: Vec<HaloNeighbor>,
}




// ============================================================================
impl MeshPartition {

    /**
     * Assemble a partition from its parts. Connectivity is stored face-major
     * per element (`faces_per_element` entries per owned element), node
     * coordinates one per node of each owned element, and global ids cover
     * owned elements followed by halo elements.
     */
    pub fn new(
        nodes_per_element: usize,
        faces_per_element: usize,
        connectivity: Vec<Neighbor>,
        element_size: Vec<f64>,
        node_coordinates: Vec<f64>,
        global_ids: Vec<usize>,
        halo_neighbors: Vec<HaloNeighbor>,
    ) -> Result<Self> {
        let num_elements = element_size.len();

        if connectivity.len() != num_elements * faces_per_element {
            return Err(Error::config("connectivity does not match the element count"));
        }
        if node_coordinates.len() != num_elements * nodes_per_element {
            return Err(Error::config("node coordinates do not match the element count"));
        }
        if global_ids.len() < num_elements {
            return Err(Error::config("fewer global ids than owned elements"));
        }
        let num_halo = global_ids.len() - num_elements;

        for nb in &connectivity {
            if let Neighbor::Element(e) = nb {
                if *e >= num_elements + num_halo {
                    return Err(Error::config(format!("face neighbor {} is out of range", e)));
                }
            }
        }
        for nb in &halo_neighbors {
            if nb.recv_start + nb.recv_count > num_halo {
                return Err(Error::config(format!(
                    "halo receive range from rank {} exceeds the halo region",
                    nb.rank
                )));
            }
            if nb.send_elements.iter().any(|&e| e >= num_elements) {
                return Err(Error::config(format!(
                    "halo send list for rank {} names a non-owned element",
                    nb.rank
                )));
            }
        }

        Ok(Self {
            num_elements,
            num_halo,
            nodes_per_element,
            faces_per_element,
            connectivity,
            element_size,
            node_coordinates,
            global_ids,
            halo_neighbors,
        })
    }

    /**
     * Build this rank's share of a periodic 1D line made of elements with the
     * given widths, starting at x = 0. Elements are dealt out to ranks in
     * contiguous blocks. Face 0 of each element is its left face, face 1 its
     * right face. Each element carries `nodes` equally spaced sub-cell nodes.
     */
    pub fn periodic_line(widths: &[f64], nodes: usize, num_ranks: usize, rank: usize) -> Result<Self> {
        let num_global = widths.len();

        if num_ranks == 0 || rank >= num_ranks {
            return Err(Error::config(format!("rank {} is not in a group of {}", rank, num_ranks)));
        }
        if num_global < num_ranks {
            return Err(Error::config(format!(
                "{} elements cannot be shared by {} ranks",
                num_global, num_ranks
            )));
        }
        if nodes == 0 {
            return Err(Error::config("elements need at least one node"));
        }

        let owner = |g: usize| g * num_ranks / num_global;
        let owned: Vec<usize> = (0..num_global).filter(|&g| owner(g) == rank).collect();
        let left = |g: usize| (g + num_global - 1) % num_global;
        let right = |g: usize| (g + 1) % num_global;

        // Halo elements, grouped by owning rank and ordered by global id.
        let mut ghosts: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &g in &owned {
            for nb in [left(g), right(g)].iter().copied() {
                if owner(nb) != rank {
                    let list = ghosts.entry(owner(nb)).or_default();
                    if !list.contains(&nb) {
                        list.push(nb);
                    }
                }
            }
        }
        for list in ghosts.values_mut() {
            list.sort_unstable();
        }

        let mut global_ids = owned.clone();
        let mut halo_neighbors = Vec::new();

        for (&peer, list) in &ghosts {
            let recv_start = global_ids.len() - owned.len();

            // Our elements that the peer holds as ghosts: those adjacent to
            // one of the peer's elements.
            let mut send_elements: Vec<usize> = owned
                .iter()
                .enumerate()
                .filter(|(_, &g)| owner(left(g)) == peer || owner(right(g)) == peer)
                .map(|(local, _)| local)
                .collect();
            send_elements.sort_unstable_by_key(|&local| owned[local]);

            halo_neighbors.push(HaloNeighbor {
                rank: peer,
                send_elements,
                recv_start,
                recv_count: list.len(),
            });
            global_ids.extend(list.iter().copied());
        }

        let local_index = |g: usize| global_ids.iter().position(|&id| id == g);
        let mut connectivity = Vec::with_capacity(owned.len() * 2);

        for &g in &owned {
            for nb in [left(g), right(g)].iter().copied() {
                let e = local_index(nb)
                    .ok_or_else(|| Error::config(format!("element {} lost its neighbor {}", g, nb)))?;
                connectivity.push(Neighbor::Element(e));
            }
        }

        let offsets: Vec<f64> = widths
            .iter()
            .scan(0.0, |x, w| {
                let x0 = *x;
                *x += w;
                Some(x0)
            })
            .collect();
        let element_size: Vec<f64> = owned.iter().map(|&g| widths[g]).collect();
        let node_coordinates = owned
            .iter()
            .flat_map(|&g| {
                let dx = widths[g] / nodes as f64;
                let x0 = offsets[g];
                (0..nodes).map(move |n| x0 + dx * (n as f64 + 0.5))
            })
            .collect();

        Self::new(
            nodes,
            2,
            connectivity,
            element_size,
            node_coordinates,
            global_ids,
            halo_neighbors,
        )
    }
}




// ============================================================================
impl MeshPartition {

    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    pub fn num_halo(&self) -> usize {
        self.num_halo
    }

    pub fn nodes_per_element(&self) -> usize {
        self.nodes_per_element
    }

    pub fn faces_per_element(&self) -> usize {
        self.faces_per_element
    }

    pub fn neighbor(&self, element: usize, face: usize) -> Neighbor {
        self.connectivity[element * self.faces_per_element + face]
    }

    pub fn neighbors(&self, element: usize) -> &[Neighbor] {
        let f = self.faces_per_element;
        &self.connectivity[element * f..(element + 1) * f]
    }

    pub fn element_size(&self, element: usize) -> f64 {
        self.element_size[element]
    }

    pub fn node_coordinates(&self, element: usize) -> &[f64] {
        let n = self.nodes_per_element;
        &self.node_coordinates[element * n..(element + 1) * n]
    }

    /// Global ids of owned elements followed by halo elements.
    pub fn global_ids(&self) -> &[usize] {
        &self.global_ids
    }

    pub fn halo_neighbors(&self) -> &[HaloNeighbor] {
        &self.halo_neighbors
    }

    /// Number of (owned) elements sent across rank boundaries each exchange.
    pub fn num_boundary_elements(&self) -> usize {
        self.halo_neighbors.iter().map(|nb| nb.send_elements.len()).sum()
    }

    /// Smallest and largest element size.
    pub fn size_range(&self) -> (f64, f64) {
        self.element_size
            .iter()
            .fold((f64::INFINITY, 0.0), |(lo, hi), &h| (lo.min(h), hi.max(h)))
    }

    /**
     * Local stable step estimate for each element: `cfl h / ((N+1)^2 c)` for an
     * element of size h carrying N+1 nodes, with c the fastest wave speed.
     */
    pub fn stable_steps(&self, cfl: f64, wave_speed: f64) -> Vec<f64> {
        let np = self.nodes_per_element as f64;
        self.element_size
            .iter()
            .map(|h| cfl * h / (np * np * wave_speed))
            .collect()
    }
}
