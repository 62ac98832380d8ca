use rayon::prelude::*;

use crate::config::{Config, Integrator};
use crate::field::{FieldState, ResidualHistory};
use crate::levels::ElementSet;
use crate::mesh::{MeshPartition, Neighbor};

/**
 * Computes the right-hand side of the semi-discrete system for one level's
 * elements. The volume part overwrites history slot `slot` of each element
 * and may only read the element's own values; the surface part adds to the
 * same slot and may read the traces of face neighbors, including halo
 * elements, which are valid only once the tick's halo exchange has finished.
 */
pub trait ResidualEvaluator {
    /// Fastest signal speed anywhere in the domain, for the stable step
    /// estimate.
    fn wave_speed(&self) -> f64;

    fn volume(
        &mut self,
        elements: &ElementSet,
        slot: usize,
        mesh: &MeshPartition,
        state: &FieldState,
        history: &mut ResidualHistory,
    );

    fn surface(
        &mut self,
        elements: &ElementSet,
        slot: usize,
        mesh: &MeshPartition,
        state: &FieldState,
        time: f64,
        history: &mut ResidualHistory,
    );

    /// Post-update filter over a level's elements, run on every level the
    /// tick has just advanced. A filter that changes element values is
    /// responsible for the matching traces. The default does nothing.
    fn filter(&mut self, _elements: &ElementSet, _mesh: &MeshPartition, _state: &mut FieldState) {}
}




/**
 * First order upwind transport to the right at speed `speed` on a 1D mesh,
 * each element split into equal sub-cells (one per node), plus relaxation
 * `-rate (q - equilibrium)` on the relaxing fields. When the update applies
 * the exponential integrating factor (`exponential`), the `-rate q` part is
 * left to the factor and only the source `rate * equilibrium` is evaluated
 * here. Face 0 of each element must be its upwind (left) face, so `speed`
 * must be positive; setup refuses a kernel that reports anything else.
 */
#[derive(Clone, Debug)]
pub struct UpwindAdvection {
    pub speed: f64,
    pub relaxation_rate: f64,
    pub equilibrium: f64,
    pub relaxing: Vec<bool>,
    pub exponential: bool,
}

impl UpwindAdvection {
    /// A kernel whose relaxation split matches the configured integrator.
    pub fn from_config(config: &Config, speed: f64, equilibrium: f64, num_fields: usize) -> Self {
        let mut relaxing = vec![false; num_fields];
        for &f in &config.relaxing_fields {
            if f < num_fields {
                relaxing[f] = true;
            }
        }
        Self {
            speed,
            relaxation_rate: config.relaxation_rate,
            equilibrium,
            relaxing,
            exponential: config.integrator == Integrator::StifflyStable,
        }
    }
}

impl ResidualEvaluator for UpwindAdvection {
    fn wave_speed(&self) -> f64 {
        self.speed
    }

    fn volume(
        &mut self,
        elements: &ElementSet,
        slot: usize,
        mesh: &MeshPartition,
        state: &FieldState,
        history: &mut ResidualHistory,
    ) {
        let layout = state.layout();
        let (nodes, fields) = (layout.nodes, layout.fields);
        let len = layout.element_len();
        let stride = history.element_stride();
        let num_owned = state.num_owned();
        let kernel = &*self;

        elements
            .chunks_mut(&mut history.data_mut()[..num_owned * stride], stride)
            .into_par_iter()
            .for_each(|(e, ring)| {
                let q = state.element(e);
                let r = &mut ring[slot * len..(slot + 1) * len];
                let dx = mesh.element_size(e) / nodes as f64;

                for node in 0..nodes {
                    for f in 0..fields {
                        let i = layout.offset(node, f);
                        let mut rhs = if node > 0 {
                            -kernel.speed * (q[i] - q[layout.offset(node - 1, f)]) / dx
                        } else {
                            0.0
                        };
                        if kernel.relaxing[f] {
                            rhs += if kernel.exponential {
                                kernel.relaxation_rate * kernel.equilibrium
                            } else {
                                -kernel.relaxation_rate * (q[i] - kernel.equilibrium)
                            };
                        }
                        r[i] = rhs;
                    }
                }
            });
    }

    fn surface(
        &mut self,
        elements: &ElementSet,
        slot: usize,
        mesh: &MeshPartition,
        state: &FieldState,
        _time: f64,
        history: &mut ResidualHistory,
    ) {
        let layout = state.layout();
        let (nodes, fields) = (layout.nodes, layout.fields);
        let len = layout.element_len();
        let stride = history.element_stride();
        let num_owned = state.num_owned();
        let kernel = &*self;

        elements
            .chunks_mut(&mut history.data_mut()[..num_owned * stride], stride)
            .into_par_iter()
            .for_each(|(e, ring)| {
                let q = state.element(e);
                let r = &mut ring[slot * len..(slot + 1) * len];
                let dx = mesh.element_size(e) / nodes as f64;

                for f in 0..fields {
                    let inflow = match mesh.neighbor(e, 0) {
                        Neighbor::Element(k) => state.trace(k)[layout.offset(nodes - 1, f)],
                        Neighbor::Boundary => kernel.equilibrium,
                    };
                    let i = layout.offset(0, f);
                    r[i] -= kernel.speed * (q[i] - inflow) / dx;
                }
            });
    }
}
