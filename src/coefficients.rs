//! Multistep weights for the multi-rate update.
//!
//! A level with step `h` keeps the right-hand sides it computed at the
//! current time and at the two previous steps (`s = 0, -h, -2h`). The update
//! over an interval of length `T` integrates the Lagrange extrapolant of that
//! history. With a linear decay term `-λ q` integrated exactly, the weights
//! become
//!
//! ```text
//! w_k = ∫_0^T exp(-λ (T - s)) L_k(s) ds
//! ```
//!
//! and the carried-forward state is multiplied by `exp(-λ T)`. The moments of
//! the exponential are expressed through the phi functions
//! `∫_0^T exp(z (T - s)/T) s^j ds = j! T^(j+1) φ_(j+1)(z)`, evaluated by Taylor
//! series near `z = 0` so that λ → 0 reproduces the classical weights.
//!
//! Two intervals are tabulated per level: the full step (`T = h`) used by the
//! regular update, and the half step of the next coarser level (history
//! spacing `2h`, `T = h`) used to carry a coarse element's trace to the
//! finer level's midpoint.

use crate::config::HISTORY_DEPTH;

/// Number of temporal orders tabulated: first, second and third.
pub const NUM_ORDERS: usize = 3;

const TAYLOR_RADIUS: f64 = 0.5;
const TAYLOR_TERMS: usize = 24;




/**
 * The three-term tuple driving one update: plain multistep weights for
 * non-relaxing fields, exponential weights and the integrating factor for
 * relaxing fields.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpdateCoefficients {
    pub history: [f64; HISTORY_DEPTH],
    pub exp_history: [f64; HISTORY_DEPTH],
    pub decay: f64,
}




/**
 * Weights indexed by (temporal order, level, stencil position), computed once
 * from the finest step and the decay rate.
 */
#[derive(Clone, Debug)]
pub struct CoefficientTable {
    num_levels: usize,
    full: Vec<UpdateCoefficients>,
    half: Vec<UpdateCoefficients>,
}

impl CoefficientTable {
    pub fn new(dt: f64, num_levels: usize, decay_rate: f64) -> Self {
        let mut full = Vec::with_capacity(NUM_ORDERS * num_levels);
        let mut half = Vec::with_capacity(NUM_ORDERS * num_levels);

        for order in 0..NUM_ORDERS {
            for level in 0..num_levels {
                let h = dt * (1u64 << level) as f64;
                full.push(UpdateCoefficients {
                    history: weights(order, h, h, 0.0),
                    exp_history: weights(order, h, h, decay_rate),
                    decay: (-decay_rate * h).exp(),
                });
                half.push(UpdateCoefficients {
                    history: weights(order, 2.0 * h, h, 0.0),
                    exp_history: weights(order, 2.0 * h, h, decay_rate),
                    decay: (-decay_rate * h).exp(),
                });
            }
        }
        Self {
            num_levels,
            full,
            half,
        }
    }

    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    /// Weights for a full step of `level` at the given temporal order.
    pub fn full_step(&self, order: usize, level: usize) -> &UpdateCoefficients {
        &self.full[order * self.num_levels + level]
    }

    /// Weights carrying an element of level `level + 1` across the first
    /// half of its step, i.e. one step of `level`.
    pub fn half_step(&self, order: usize, level: usize) -> &UpdateCoefficients {
        &self.half[order * self.num_levels + level]
    }
}




/**
 * φ_k(z) = Σ_n z^n / (n + k)!, the k-th exponential integrator function.
 * φ_0(z) = e^z and φ_(k+1)(z) = (φ_k(z) - 1/k!) / z.
 */
pub fn phi(k: usize, z: f64) -> f64 {
    if z.abs() < TAYLOR_RADIUS {
        let mut term = 1.0 / factorial(k);
        let mut sum = 0.0;
        for n in 0..TAYLOR_TERMS {
            sum += term;
            term *= z / (n + k + 1) as f64;
        }
        sum
    } else {
        let mut p = z.exp();
        for j in 0..k {
            p = (p - 1.0 / factorial(j)) / z;
        }
        p
    }
}

fn factorial(n: usize) -> f64 {
    (1..=n).map(|k| k as f64).product()
}

/**
 * Coefficients of the Lagrange basis polynomials through the history nodes
 * `s = 0, -1, -2` (in units of the history spacing), as
 * `L_k(s) = Σ_j basis[k][j] s^j`. Order 0 uses one node, order 1 two.
 */
fn lagrange_basis(order: usize) -> [[f64; 3]; 3] {
    match order {
        0 => [[1.0, 0.0, 0.0], [0.0; 3], [0.0; 3]],
        1 => [[1.0, 1.0, 0.0], [0.0, -1.0, 0.0], [0.0; 3]],
        _ => [
            [1.0, 1.5, 0.5],
            [0.0, -2.0, -1.0],
            [0.0, 0.5, 0.5],
        ],
    }
}

/**
 * Weights integrating the order-`order` extrapolant of a history with spacing
 * `spacing` over `[0, interval]`, under the decay weight
 * `exp(-decay_rate (interval - s))`.
 */
fn weights(order: usize, spacing: f64, interval: f64, decay_rate: f64) -> [f64; 3] {
    let z = -decay_rate * interval;
    let moments: Vec<f64> = (0..3)
        .map(|j| factorial(j) * interval.powi(j as i32 + 1) * phi(j + 1, z) / spacing.powi(j as i32))
        .collect();

    let basis = lagrange_basis(order);
    let mut w = [0.0; 3];

    for (wk, bk) in w.iter_mut().zip(basis.iter()) {
        *wk = bk.iter().zip(&moments).map(|(b, m)| b * m).sum();
    }
    w
}
