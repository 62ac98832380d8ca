//! Multirate is a time-stepping library for discontinuous Galerkin
//! discretizations on meshes partitioned over distributed-memory ranks, where
//! elements of different size advance with different, locally stable steps.
//! Elements are sorted into levels whose steps are powers of two times the
//! finest step. A global tick counter decides, by bit tests, which levels
//! evaluate their right-hand side and which advance their state on each tick;
//! the advance uses multi-rate Adams-Bashforth weights, optionally with an
//! exponential integrating factor for stiff relaxation terms. Boundary data
//! moves between ranks once per tick, started before and merged after the
//! volume work so that the exchange overlaps with computation.

pub mod coefficients;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod evaluator;
pub mod field;
pub mod halo;
pub mod levels;
pub mod mesh;
pub mod message;
pub mod schedule;
pub mod scheduler;
pub mod setup;
pub mod updater;

pub use config::{Config, Integrator};
pub use error::{Error, Result};
pub use scheduler::Scheduler;
