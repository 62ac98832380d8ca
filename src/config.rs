use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest number of levels accepted; the tick counter runs to 2^(L-1).
pub const MAX_LEVELS: usize = 16;

/// Depth of each level's residual history ring (third order multistep).
pub const HISTORY_DEPTH: usize = 3;




/**
 * Which family of update formulas the step updater applies.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Integrator {
    /// Multi-rate Adams-Bashforth: every field is extrapolated from its
    /// residual history, no integrating factor.
    Classical,

    /// Multi-rate stiffly-stable (exponential) Adams-Bashforth: the relaxing
    /// fields carry a linear decay term which is integrated exactly by a
    /// per-level exponential factor.
    StifflyStable,
}




/**
 * Parameters of a run. The struct is serializable so that it can be written
 * into checkpoints alongside the field data.
 */
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub max_levels: usize,
    pub cfl: f64,
    pub final_time: f64,
    pub error_step: usize,
    pub integrator: Integrator,
    pub relaxation_rate: f64,
    pub relaxing_fields: Vec<usize>,
    pub exchange_timeout_ms: Option<u64>,
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_levels: 3,
            cfl: 0.5,
            final_time: 1.0,
            error_step: 100,
            integrator: Integrator::Classical,
            relaxation_rate: 0.0,
            relaxing_fields: Vec::new(),
            exchange_timeout_ms: None,
            checkpoint_dir: None,
        }
    }
}

impl Config {

    /**
     * Reject parameter combinations the scheduler cannot run with. Called by
     * setup before anything is allocated.
     */
    pub fn validate(&self, num_fields: usize) -> Result<()> {
        if self.max_levels == 0 || self.max_levels > MAX_LEVELS {
            return Err(Error::config(format!(
                "max_levels must be in 1..={}, got {}",
                MAX_LEVELS, self.max_levels
            )));
        }
        if !(self.cfl > 0.0) || !self.cfl.is_finite() {
            return Err(Error::config(format!("cfl must be positive, got {}", self.cfl)));
        }
        if !(self.final_time > 0.0) || !self.final_time.is_finite() {
            return Err(Error::config(format!(
                "final_time must be positive, got {}",
                self.final_time
            )));
        }
        if self.error_step == 0 {
            return Err(Error::config("error_step must be at least 1"));
        }
        if !(self.relaxation_rate >= 0.0) || !self.relaxation_rate.is_finite() {
            return Err(Error::config(format!(
                "relaxation_rate must be non-negative, got {}",
                self.relaxation_rate
            )));
        }
        if let Some(&f) = self.relaxing_fields.iter().find(|&&f| f >= num_fields) {
            return Err(Error::config(format!(
                "relaxing field {} out of range for {} fields",
                f, num_fields
            )));
        }
        Ok(())
    }

    /// The integrating-factor decay rate seen by the coefficient tables: zero
    /// for the classical scheme regardless of the physical relaxation rate.
    pub fn decay_rate(&self) -> f64 {
        match self.integrator {
            Integrator::Classical => 0.0,
            Integrator::StifflyStable => self.relaxation_rate,
        }
    }

    pub fn exchange_timeout(&self) -> Option<Duration> {
        self.exchange_timeout_ms.map(Duration::from_millis)
    }

    /// Per-field flags marking which fields get the integrating factor.
    pub fn relaxing_mask(&self, num_fields: usize) -> Vec<bool> {
        let mut mask = vec![false; num_fields];
        if self.integrator == Integrator::StifflyStable {
            for &f in &self.relaxing_fields {
                mask[f] = true;
            }
        }
        mask
    }
}
