use serde::{Deserialize, Serialize};

/// Shape of the per-element data: `nodes` nodes, each carrying `fields`
/// physical fields. Element data is stored node-major, so the value of field
/// `f` at node `n` sits at offset `n * fields + f`.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLayout {
    pub nodes: usize,
    pub fields: usize,
}

impl FieldLayout {
    pub fn new(nodes: usize, fields: usize) -> Self {
        Self { nodes, fields }
    }

    /// Number of scalars per element.
    pub fn element_len(&self) -> usize {
        self.nodes * self.fields
    }

    pub fn offset(&self, node: usize, field: usize) -> usize {
        node * self.fields + field
    }

    /// Field index of the scalar at the given offset within an element.
    pub fn field_of(&self, offset: usize) -> usize {
        offset % self.fields
    }
}




/**
 * The solution buffer of one rank. `values` covers the owned elements
 * followed by the halo elements; the owned region is written only by the step
 * updater and the halo region only by the halo exchange. `traces` covers the
 * owned elements and holds the value each element presents to its
 * neighbors: equal to `values` right after a full update, and carried ahead
 * to an intermediate time by the cross-level correction.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct FieldState {
    layout: FieldLayout,
    num_owned: usize,
    num_halo: usize,
    values: Vec<f64>,
    traces: Vec<f64>,
}

impl FieldState {
    pub fn new(layout: FieldLayout, num_owned: usize, num_halo: usize) -> Self {
        let n = layout.element_len();
        Self {
            layout,
            num_owned,
            num_halo,
            values: vec![0.0; (num_owned + num_halo) * n],
            traces: vec![0.0; num_owned * n],
        }
    }

    pub fn layout(&self) -> FieldLayout {
        self.layout
    }

    pub fn num_owned(&self) -> usize {
        self.num_owned
    }

    pub fn num_halo(&self) -> usize {
        self.num_halo
    }

    /// Values of an owned or halo element.
    pub fn element(&self, e: usize) -> &[f64] {
        let n = self.layout.element_len();
        &self.values[e * n..(e + 1) * n]
    }

    pub fn element_mut(&mut self, e: usize) -> &mut [f64] {
        let n = self.layout.element_len();
        &mut self.values[e * n..(e + 1) * n]
    }

    /// What a neighbor sees of element `e`: the trace of an owned element,
    /// or the received copy of a halo element.
    pub fn trace(&self, e: usize) -> &[f64] {
        let n = self.layout.element_len();
        if e < self.num_owned {
            &self.traces[e * n..(e + 1) * n]
        } else {
            &self.values[e * n..(e + 1) * n]
        }
    }

    pub fn owned_values(&self) -> &[f64] {
        &self.values[..self.num_owned * self.layout.element_len()]
    }

    pub fn owned_values_mut(&mut self) -> &mut [f64] {
        let end = self.num_owned * self.layout.element_len();
        &mut self.values[..end]
    }

    /// Owned values and traces, split for simultaneous update.
    pub fn owned_values_and_traces_mut(&mut self) -> (&mut [f64], &mut [f64]) {
        let end = self.num_owned * self.layout.element_len();
        (&mut self.values[..end], &mut self.traces)
    }

    pub fn traces_mut(&mut self) -> &mut [f64] {
        &mut self.traces
    }

    pub fn halo_region_mut(&mut self) -> &mut [f64] {
        let start = self.num_owned * self.layout.element_len();
        &mut self.values[start..]
    }

    /// Copy the owned values into the traces, so that neighbors see a
    /// consistent state before the first residual evaluation.
    pub fn prime_traces(&mut self) {
        let end = self.num_owned * self.layout.element_len();
        self.traces.copy_from_slice(&self.values[..end]);
    }

    /// Location (element, node, field) of the first non-finite owned value.
    pub fn first_non_finite(&self) -> Option<(usize, usize, usize)> {
        let n = self.layout.element_len();
        self.owned_values()
            .iter()
            .position(|x| !x.is_finite())
            .map(|i| (i / n, (i % n) / self.layout.fields, self.layout.field_of(i % n)))
    }
}




/**
 * Ring of previously computed right-hand sides, `depth` slots per owned
 * element. Which slot is the newest for an element is decided by the shift
 * index of the level the element belongs to, not by the ring itself.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct ResidualHistory {
    layout: FieldLayout,
    depth: usize,
    data: Vec<f64>,
}

impl ResidualHistory {
    pub fn new(layout: FieldLayout, num_elements: usize, depth: usize) -> Self {
        Self {
            layout,
            depth,
            data: vec![0.0; num_elements * depth * layout.element_len()],
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn layout(&self) -> FieldLayout {
        self.layout
    }

    /// Number of scalars covering all slots of one element.
    pub fn element_stride(&self) -> usize {
        self.depth * self.layout.element_len()
    }

    pub fn slot(&self, e: usize, slot: usize) -> &[f64] {
        let n = self.layout.element_len();
        let start = (e * self.depth + slot) * n;
        &self.data[start..start + n]
    }

    pub fn slot_mut(&mut self, e: usize, slot: usize) -> &mut [f64] {
        let n = self.layout.element_len();
        let start = (e * self.depth + slot) * n;
        &mut self.data[start..start + n]
    }

    /// All slots, one chunk of `element_stride` scalars per element.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Slot holding the residual `k` evaluations older than the one at
    /// `shift`.
    pub fn lagged(&self, shift: usize, k: usize) -> usize {
        (shift + self.depth - k % self.depth) % self.depth
    }
}
