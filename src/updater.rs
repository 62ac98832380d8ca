use rayon::prelude::*;

use crate::coefficients::UpdateCoefficients;
use crate::config::HISTORY_DEPTH;
use crate::field::{FieldState, ResidualHistory};
use crate::levels::ElementSet;

/// The mutable per-level state the scheduler owns: which slot of the residual
/// history ring the level writes next.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelRecord {
    pub level: usize,
    pub shift: usize,
}

impl LevelRecord {
    pub fn new(level: usize) -> Self {
        Self { level, shift: 0 }
    }
}




/**
 * Advance every element of `elements` by one step of its level:
 *
 * ```text
 * q <- d q + Σ_k w_k r[shift - k]
 * ```
 *
 * with `(w, d)` the exponential weights and integrating factor on relaxing
 * fields, and the classical weights with `d = 1` elsewhere. Values and traces
 * both receive the result. Afterwards the level's shift index moves on, so
 * the next residual evaluation of the level lands in the oldest slot.
 */
pub fn advance(
    elements: &ElementSet,
    record: &mut LevelRecord,
    coefficients: &UpdateCoefficients,
    relaxing: &[bool],
    history: &ResidualHistory,
    state: &mut FieldState,
) {
    let layout = state.layout();
    let n = layout.element_len();
    let slots = lagged_slots(history, record.shift);
    let (values, traces) = state.owned_values_and_traces_mut();

    elements
        .chunks_mut(values, n)
        .into_par_iter()
        .zip(elements.chunks_mut(traces, n))
        .for_each(|((e, q), (_, t))| {
            for i in 0..n {
                let x = stepped(i, q[i], e, &slots, layout.field_of(i), coefficients, relaxing, history);
                q[i] = x;
                t[i] = x;
            }
        });

    record.shift = (record.shift + 1) % history.depth();
}

/**
 * The cross-level correction: carry the trace of a coarse level's interface
 * elements to the midpoint of the coarse step, using the half-step weights.
 * Only the traces change; the element values and the level's shift index are
 * left alone, since the coarse level has not actually taken its step.
 */
pub fn correct_traces(
    elements: &ElementSet,
    record: &LevelRecord,
    coefficients: &UpdateCoefficients,
    relaxing: &[bool],
    history: &ResidualHistory,
    state: &mut FieldState,
) {
    let layout = state.layout();
    let n = layout.element_len();
    let slots = lagged_slots(history, record.shift);
    let (values, traces) = state.owned_values_and_traces_mut();
    let values = &*values;

    elements
        .chunks_mut(traces, n)
        .into_par_iter()
        .for_each(|(e, t)| {
            let q = &values[e * n..(e + 1) * n];
            for i in 0..n {
                t[i] = stepped(i, q[i], e, &slots, layout.field_of(i), coefficients, relaxing, history);
            }
        });
}

fn lagged_slots(history: &ResidualHistory, shift: usize) -> [usize; HISTORY_DEPTH] {
    let mut slots = [0; HISTORY_DEPTH];
    for (k, slot) in slots.iter_mut().enumerate() {
        *slot = history.lagged(shift, k);
    }
    slots
}

#[allow(clippy::too_many_arguments)]
fn stepped(
    i: usize,
    q: f64,
    e: usize,
    slots: &[usize; HISTORY_DEPTH],
    field: usize,
    c: &UpdateCoefficients,
    relaxing: &[bool],
    history: &ResidualHistory,
) -> f64 {
    let (weights, decay) = if relaxing[field] {
        (&c.exp_history, c.decay)
    } else {
        (&c.history, 1.0)
    };
    let mut x = decay * q;
    for (w, &s) in weights.iter().zip(slots) {
        if *w != 0.0 {
            x += w * history.slot(e, s)[i];
        }
    }
    x
}
