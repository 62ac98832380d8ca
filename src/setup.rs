use log::info;

use crate::coefficients::CoefficientTable;
use crate::config::{Config, HISTORY_DEPTH};
use crate::diagnostics::{CheckpointWriter, LogReporter, Reporter};
use crate::error::{Error, Result};
use crate::evaluator::ResidualEvaluator;
use crate::field::{FieldLayout, FieldState, ResidualHistory};
use crate::halo::HaloExchange;
use crate::levels::{self, LevelAssignment};
use crate::mesh::MeshPartition;
use crate::message::comm::Communicator;
use crate::schedule;
use crate::scheduler::Scheduler;
use crate::updater::LevelRecord;

/// Finest step, number of levels and number of outer steps agreed on by all
/// ranks.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepSizes {
    pub dt: f64,
    pub num_levels: usize,
    pub num_steps: usize,
}

/**
 * Agree on the global step: the smallest stable estimate over all ranks is
 * the finest step, the number of levels is the most any rank could use
 * (capped by the configuration), and the finest step is then shrunk so that
 * a whole number of outer steps of `2^(L-1)` ticks ends exactly at the final
 * time.
 */
pub fn step_sizes<C: Communicator>(comm: &C, config: &Config, estimates: &[f64]) -> Result<StepSizes> {
    for (e, &h) in estimates.iter().enumerate() {
        if !(h > 0.0) || !h.is_finite() {
            return Err(Error::UnassignableElement { element: e, estimate: h });
        }
    }
    let local_dt = estimates.iter().copied().fold(f64::INFINITY, f64::min);
    let dt = comm.all_reduce_f64(f64::min, local_dt)?;

    if !dt.is_finite() {
        return Err(Error::config("no rank owns any elements"));
    }
    let required = levels::required_levels(estimates, dt)?;
    let required = comm.all_reduce_f64(f64::max, required as f64)? as usize;
    let num_levels = required.min(config.max_levels);

    let ticks = schedule::ticks_per_step(num_levels) as f64;
    let num_steps = ((config.final_time / (dt * ticks)).ceil() as usize).max(1);
    let dt = config.final_time / (num_steps as f64 * ticks);

    Ok(StepSizes {
        dt,
        num_levels,
        num_steps,
    })
}

/**
 * Assign the owned elements to levels and smooth the assignment across the
 * whole mesh, so that face neighbors, on this rank or another, differ by at
 * most one level. Returns the levels of owned elements followed by halo
 * elements.
 */
pub fn assign_levels<C: Communicator>(
    halo: &mut HaloExchange<C>,
    mesh: &MeshPartition,
    estimates: &[f64],
    dt: f64,
    num_levels: usize,
) -> Result<Vec<usize>> {
    let n = mesh.num_elements();
    let mut element_level = estimates
        .iter()
        .enumerate()
        .map(|(e, &h)| levels::initial_level(e, h, dt, num_levels))
        .collect::<Result<Vec<_>>>()?;

    let mut sweeps = 0;

    loop {
        let halo_levels = halo.exchange_levels(&element_level[..n])?;
        element_level.truncate(n);
        element_level.extend(halo_levels);

        let changed = levels::smooth(mesh, &mut element_level);
        let any_changed = halo.comm().all_reduce_f64(f64::max, if changed { 1.0 } else { 0.0 })?;
        sweeps += 1;

        if any_changed == 0.0 {
            break;
        }
    }
    info!("level smoothing settled after {} sweeps", sweeps);
    Ok(element_level)
}

/**
 * Everything up to the first tick: validate the configuration, agree on the
 * step and levels with the other ranks, build the coefficient tables and the
 * initial state. `initial(x, field)` gives the initial value of a field at a
 * node coordinate.
 */
pub fn build<E, C, F>(
    config: Config,
    mesh: MeshPartition,
    num_fields: usize,
    mut comm: C,
    evaluator: E,
    initial: F,
) -> Result<Scheduler<E, C>>
where
    E: ResidualEvaluator,
    C: Communicator,
    F: Fn(f64, usize) -> f64,
{
    config.validate(num_fields)?;
    comm.set_recv_timeout(config.exchange_timeout());

    let wave_speed = evaluator.wave_speed();
    if !(wave_speed > 0.0) || !wave_speed.is_finite() {
        return Err(Error::config(format!("wave speed must be positive, got {}", wave_speed)));
    }

    let (hmin, hmax) = mesh.size_range();
    info!("hmin = {}, hmax = {}", hmin, hmax);

    let estimates = mesh.stable_steps(config.cfl, wave_speed);
    let layout = FieldLayout::new(mesh.nodes_per_element(), num_fields);
    let mut halo = HaloExchange::new(comm, &mesh, layout);
    let sizes = step_sizes(halo.comm(), &config, &estimates)?;

    info!("dt = {}, levels = {}, steps = {}", sizes.dt, sizes.num_levels, sizes.num_steps);
    info!("halo exchange: {} bytes per tick", halo.num_bytes());

    let element_level = assign_levels(&mut halo, &mesh, &estimates, sizes.dt, sizes.num_levels)?;
    let assignment = LevelAssignment::new(&mesh, element_level, sizes.num_levels)?;

    for level in &assignment.levels {
        info!(
            "level {}: {} elements, {} trace elements",
            level.index,
            level.elements.len(),
            level.trace_elements.len()
        );
    }

    let coefficients = CoefficientTable::new(sizes.dt, sizes.num_levels, config.decay_rate());
    let mut state = FieldState::new(layout, mesh.num_elements(), mesh.num_halo());

    for e in 0..mesh.num_elements() {
        let x = mesh.node_coordinates(e);
        let q = state.element_mut(e);
        for (node, &xn) in x.iter().enumerate() {
            for f in 0..num_fields {
                q[layout.offset(node, f)] = initial(xn, f);
            }
        }
    }
    state.prime_traces();

    let mut reporters: Vec<Box<dyn Reporter>> = vec![Box::new(LogReporter)];

    if let Some(dir) = &config.checkpoint_dir {
        let comm = halo.comm();
        reporters.push(Box::new(CheckpointWriter::new(dir, config.clone(), comm.rank(), comm.size())?));
    }

    Ok(Scheduler {
        relaxing: config.relaxing_mask(num_fields),
        history: ResidualHistory::new(layout, mesh.num_elements(), HISTORY_DEPTH),
        records: (0..sizes.num_levels).map(LevelRecord::new).collect(),
        config,
        mesh,
        levels: assignment,
        coefficients,
        state,
        halo,
        evaluator,
        reporters,
        dt: sizes.dt,
        num_steps: sizes.num_steps,
        outer_step: 0,
        events: None,
    })
}
