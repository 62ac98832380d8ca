use crate::error::{Error, Result};
use crate::mesh::{MeshPartition, Neighbor};

/// A sorted list of owned element indices, with a membership mask over all
/// owned elements.
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElementSet {
    ids: Vec<usize>,
    member: Vec<bool>,
}

impl ElementSet {
    pub fn new(mut ids: Vec<usize>, num_elements: usize) -> Self {
        ids.sort_unstable();
        ids.dedup();
        let mut member = vec![false; num_elements];
        for &e in &ids {
            member[e] = true;
        }
        Self { ids, member }
    }

    /**
     * Split a per-element buffer of `len` scalars per element into the
     * chunks of the members only, paired with their element index. The cost
     * is proportional to the number of members, not to the buffer length.
     */
    pub fn chunks_mut<'a>(&self, mut data: &'a mut [f64], len: usize) -> Vec<(usize, &'a mut [f64])> {
        let mut chunks = Vec::with_capacity(self.ids.len());
        let mut next = 0;

        for &e in &self.ids {
            let (_, rest) = std::mem::take(&mut data).split_at_mut((e - next) * len);
            let (chunk, rest) = rest.split_at_mut(len);
            chunks.push((e, chunk));
            data = rest;
            next = e + 1;
        }
        chunks
    }

    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    pub fn contains(&self, e: usize) -> bool {
        self.member.get(e).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}




/**
 * A group of elements advancing with the same step, `2^index` times the
 * finest step. `trace_elements` are the members that share a face with an
 * element of a finer level: their interface values have to be carried to the
 * finer level's intermediate times by the cross-level correction.
 */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Level {
    pub index: usize,
    pub elements: ElementSet,
    pub trace_elements: ElementSet,
}

impl Level {
    pub fn multiplier(&self) -> u64 {
        1 << self.index
    }
}




/**
 * The level of every element of a partition. `element_level` covers owned
 * elements followed by halo elements, the latter learned from the ranks that
 * own them.
 */
#[derive(Clone, Debug)]
pub struct LevelAssignment {
    pub levels: Vec<Level>,
    pub element_level: Vec<usize>,
}

impl LevelAssignment {

    /**
     * Group owned elements by level and find the trace elements of each
     * level. The element level list must cover owned and halo elements.
     */
    pub fn new(mesh: &MeshPartition, element_level: Vec<usize>, num_levels: usize) -> Result<Self> {
        let n = mesh.num_elements();

        if element_level.len() != n + mesh.num_halo() {
            return Err(Error::config(format!(
                "{} element levels given for {} owned and {} halo elements",
                element_level.len(),
                n,
                mesh.num_halo()
            )));
        }
        if let Some(&l) = element_level.iter().find(|&&l| l >= num_levels) {
            return Err(Error::config(format!("level {} exceeds the {} levels in use", l, num_levels)));
        }

        let mut elements = vec![Vec::new(); num_levels];
        let mut trace_elements = vec![Vec::new(); num_levels];

        for e in 0..n {
            let l = element_level[e];
            elements[l].push(e);

            let borders_finer = mesh.neighbors(e).iter().any(|nb| match nb {
                Neighbor::Element(k) => element_level[*k] < l,
                Neighbor::Boundary => false,
            });
            if borders_finer {
                trace_elements[l].push(e);
            }
        }

        let levels = elements
            .into_iter()
            .zip(trace_elements)
            .enumerate()
            .map(|(index, (ids, trace))| Level {
                index,
                elements: ElementSet::new(ids, n),
                trace_elements: ElementSet::new(trace, n),
            })
            .collect();

        Ok(Self {
            levels,
            element_level,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Number of owned elements on each level.
    pub fn populations(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.elements.len()).collect()
    }
}




/**
 * The coarsest level whose step `dt 2^level` does not exceed the element's
 * stable step estimate, capped at the coarsest level in use. An estimate
 * that is not a positive number leaves the element with no admissible level.
 */
pub fn initial_level(element: usize, estimate: f64, dt: f64, num_levels: usize) -> Result<usize> {
    if !(estimate > 0.0) || !estimate.is_finite() || estimate < dt {
        return Err(Error::UnassignableElement { element, estimate });
    }
    let ratio = (estimate / dt) as u64;
    let level = (63 - ratio.leading_zeros()) as usize;
    Ok(level.min(num_levels - 1))
}

/**
 * Number of levels the given estimates could make use of, with `dt` the
 * finest step.
 */
pub fn required_levels(estimates: &[f64], dt: f64) -> Result<usize> {
    let mut levels = 1;
    for (e, &h) in estimates.iter().enumerate() {
        levels = levels.max(initial_level(e, h, dt, usize::MAX)? + 1);
    }
    Ok(levels)
}

/**
 * One smoothing sweep: demote every owned element to at most one level above
 * its finest face neighbor. Demotion only shortens an element's step, so
 * stability is preserved. Returns whether anything changed; repeat until it
 * does not (halo levels may change between sweeps on other ranks).
 */
pub fn smooth(mesh: &MeshPartition, element_level: &mut [usize]) -> bool {
    let mut changed = false;

    for e in 0..mesh.num_elements() {
        let finest_neighbor = mesh
            .neighbors(e)
            .iter()
            .filter_map(|nb| match nb {
                Neighbor::Element(k) => Some(element_level[*k]),
                Neighbor::Boundary => None,
            })
            .min();

        if let Some(l) = finest_neighbor {
            if element_level[e] > l + 1 {
                element_level[e] = l + 1;
                changed = true;
            }
        }
    }
    changed
}
