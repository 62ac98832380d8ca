mod common;

use std::cell::RefCell;
use std::rc::Rc;

use approx::assert_relative_eq;

use multirate::diagnostics::{read_checkpoint, Reporter};
use multirate::evaluator::UpwindAdvection;
use multirate::field::FieldState;
use multirate::mesh::MeshPartition;
use multirate::message::channel::ChannelCommunicator;
use multirate::scheduler::{Event, Scheduler};
use multirate::{setup, Config, Error, Integrator};

use common::{build_run, half_refined};

/**
 * One element relaxing toward `equilibrium` at `rate`: the advection term
 * vanishes because the element is its own periodic neighbor, leaving
 * dq/dt = -rate (q - equilibrium). The stable step estimate is 0.5.
 */
fn relaxation_run(
    integrator: Integrator,
    rate: f64,
    equilibrium: f64,
    q0: f64,
    final_time: f64,
) -> Scheduler<UpwindAdvection, ChannelCommunicator> {
    let config = Config {
        final_time,
        integrator,
        relaxation_rate: rate,
        relaxing_fields: vec![0],
        ..Config::default()
    };
    relaxation_run_with(config, equilibrium, q0)
}

fn relaxation_run_with(config: Config, equilibrium: f64, q0: f64) -> Scheduler<UpwindAdvection, ChannelCommunicator> {
    let mesh = MeshPartition::periodic_line(&[1.0], 1, 1, 0).unwrap();
    let evaluator = UpwindAdvection::from_config(&config, 1.0, equilibrium, 1);
    setup::build(config, mesh, 1, ChannelCommunicator::solo(), evaluator, move |_, _| q0).unwrap()
}

fn three_level_run() -> common::Run {
    let config = Config {
        max_levels: 3,
        final_time: 10.0,
        ..Config::default()
    };
    build_run(&half_refined(16, 4.0), 2, config, ChannelCommunicator::solo())
}




// ============================================================================
#[test]
fn classical_single_level_matches_hand_rolled_adams_bashforth() {
    let rate = 0.5;
    let mut run = relaxation_run(Integrator::Classical, rate, 0.0, 1.0, 2.0);
    assert_eq!(run.num_levels(), 1);
    assert_eq!(run.num_steps(), 4);
    let dt = run.dt();

    let f = |q: f64| -rate * q;
    let mut q = vec![1.0];
    q.push(q[0] + dt * f(q[0]));
    q.push(q[1] + dt * (1.5 * f(q[1]) - 0.5 * f(q[0])));
    for n in 2..4 {
        let next = q[n] + dt * (23.0 / 12.0 * f(q[n]) - 16.0 / 12.0 * f(q[n - 1]) + 5.0 / 12.0 * f(q[n - 2]));
        q.push(next);
    }

    for n in 1..=4 {
        run.advance(1).unwrap();
        assert_relative_eq!(run.state().element(0)[0], q[n], max_relative = 1e-12);
    }
}

#[test]
fn exponential_integrator_is_exact_for_linear_relaxation() {
    for &rate in &[0.8, 50.0] {
        let mut run = relaxation_run(Integrator::StifflyStable, rate, 2.0, 1.0, 2.0);
        run.run().unwrap();
        let exact = 2.0 - f64::exp(-rate * 2.0);
        assert_relative_eq!(run.state().element(0)[0], exact, max_relative = 1e-12);
    }
}

#[test]
fn stiff_relaxation_blows_up_the_classical_scheme() {
    let config = Config {
        final_time: 200.0,
        error_step: 1,
        relaxation_rate: 50.0,
        relaxing_fields: vec![0],
        ..Config::default()
    };
    let mut run = relaxation_run_with(config, 2.0, 1.0);

    match run.run() {
        Err(e @ Error::Divergence { .. }) => assert_eq!(e.exit_code(), 3),
        other => panic!("expected divergence, got {:?}", other.err()),
    }
}

#[test]
fn single_level_schedule_repeats_the_same_tick() {
    let mut run = relaxation_run(Integrator::Classical, 0.5, 0.0, 1.0, 2.0);
    run.record_events(true);
    run.advance(3).unwrap();

    let events = run.take_events();
    assert_eq!(events.len(), 15);

    for (n, tick) in events.chunks(5).enumerate() {
        let slot = n % 3;
        assert_eq!(
            tick,
            &[
                Event::HaloStart { outer_step: n, tick: 0 },
                Event::Volume { level: 0, slot },
                Event::HaloFinish,
                Event::Surface { level: 0, slot },
                Event::Update { level: 0, slot, order: n.min(2) },
            ]
        );
    }
}

#[test]
fn shift_index_moves_only_when_its_level_updates() {
    let mut run = three_level_run();
    assert_eq!(run.num_levels(), 3);

    let mut expected = run.shifts();
    run.record_events(true);

    for _ in 0..5 {
        run.step().unwrap();
        let mut tick = 0;

        for event in run.take_events() {
            match event {
                Event::HaloStart { tick: t, .. } => tick = t,
                Event::Volume { level, slot } | Event::Surface { level, slot } => {
                    assert_eq!(tick % (1 << level), 0);
                    assert_eq!(slot, expected[level]);
                }
                Event::Update { level, slot, .. } => {
                    assert_eq!((tick + 1) % (1 << level), 0);
                    assert_eq!(slot, expected[level]);
                    expected[level] = (expected[level] + 1) % 3;
                }
                Event::Correction { level, slot, .. } => {
                    assert_ne!((tick + 1) % (1 << level), 0);
                    assert_eq!(slot, expected[level]);
                }
                Event::HaloFinish => {}
            }
        }
        assert_eq!(run.shifts(), expected);
    }
}

#[test]
fn two_level_run_corrects_once_per_outer_step() {
    let config = Config {
        max_levels: 2,
        ..Config::default()
    };
    let mut run = build_run(&half_refined(16, 2.0), 2, config, ChannelCommunicator::solo());
    assert_eq!(run.num_levels(), 2);

    run.record_events(true);
    run.advance(3).unwrap();
    let events = run.take_events();

    let corrections: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Correction { level, order, .. } => Some((*level, *order)),
            _ => None,
        })
        .collect();
    assert_eq!(corrections, vec![(1, 0), (1, 1), (1, 2)]);

    let mut tick = 0;
    for (i, e) in events.iter().enumerate() {
        match e {
            Event::HaloStart { tick: t, .. } => tick = *t,
            Event::Correction { .. } => {
                assert_eq!(tick, 0);
                assert!(matches!(events[i - 1], Event::Update { level: 0, .. }));
            }
            _ => {}
        }
    }
}

#[test]
fn advancing_zero_steps_changes_nothing() {
    let mut run = three_level_run();
    run.advance(3).unwrap();

    let state = run.state().clone();
    let shifts = run.shifts();
    let step = run.outer_step();

    run.advance(0).unwrap();
    assert_eq!(run.state(), &state);
    assert_eq!(run.shifts(), shifts);
    assert_eq!(run.outer_step(), step);

    run.report().unwrap();
    assert_eq!(run.state(), &state);
}

#[test]
fn run_stops_at_the_final_time() {
    let mut run = relaxation_run(Integrator::Classical, 0.1, 0.0, 1.0, 3.3);
    run.run().unwrap();

    assert!(run.is_finished());
    assert_relative_eq!(run.time(), 3.3, max_relative = 1e-12);

    let state = run.state().clone();
    run.advance(10).unwrap();
    assert_eq!(run.state(), &state);
}

#[test]
fn nan_injection_is_fatal_with_divergence_status() {
    let config = Config {
        error_step: 2,
        final_time: 10.0,
        ..Config::default()
    };
    let mut run = relaxation_run_with(config, 0.0, 1.0);
    run.advance(1).unwrap();

    run.state_mut().element_mut(0)[0] = f64::NAN;
    run.advance(1).unwrap();

    match run.advance(1) {
        Err(Error::Divergence { step, element, .. }) => {
            assert_eq!(step, 3);
            assert_eq!(element, 0);
        }
        other => panic!("expected divergence, got {:?}", other),
    }
}

#[test]
fn nan_from_the_first_step_is_caught_after_it() {
    let config = Config {
        error_step: 5,
        final_time: 10.0,
        ..Config::default()
    };
    let mut run = relaxation_run_with(config, 0.0, 1.0);
    run.state_mut().element_mut(0)[0] = f64::NAN;

    match run.advance(1) {
        Err(e @ Error::Divergence { step: 1, .. }) => assert_eq!(e.exit_code(), 3),
        other => panic!("expected divergence after step 0, got {:?}", other),
    }
}

struct StepLog(Rc<RefCell<Vec<(usize, f64)>>>);

impl Reporter for StepLog {
    fn report(&mut self, outer_step: usize, time: f64, _mesh: &MeshPartition, _state: &FieldState) -> multirate::Result<()> {
        self.0.borrow_mut().push((outer_step, time));
        Ok(())
    }
}

#[test]
fn reports_follow_each_checked_step_and_the_last_one() {
    let config = Config {
        final_time: 3.5,
        error_step: 3,
        ..Config::default()
    };
    let mut run = relaxation_run_with(config, 0.0, 1.0);
    assert_eq!(run.num_steps(), 7);

    let log = Rc::new(RefCell::new(Vec::new()));
    run.add_reporter(Box::new(StepLog(log.clone())));
    run.advance(100).unwrap();

    let steps: Vec<usize> = log.borrow().iter().map(|r| r.0).collect();
    assert_eq!(steps, vec![1, 4, 7]);
    assert_relative_eq!(log.borrow()[0].1, 0.5);
    assert_relative_eq!(log.borrow()[2].1, 3.5);
}

#[test]
fn stepping_past_the_end_leaves_the_run_at_the_final_time() {
    let mut run = relaxation_run(Integrator::Classical, 0.1, 0.0, 1.0, 2.0);
    let n = run.num_steps();

    for _ in 0..n + 1 {
        run.step().unwrap();
    }
    assert_eq!(run.outer_step(), n);
    assert_relative_eq!(run.time(), 2.0, max_relative = 1e-12);

    let state = run.state().clone();
    run.run().unwrap();
    run.step().unwrap();
    assert_eq!(run.outer_step(), n);
    assert_eq!(run.state(), &state);
}

#[test]
fn checkpoints_follow_the_report_cadence() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        final_time: 2.0,
        error_step: 2,
        checkpoint_dir: Some(dir.path().to_path_buf()),
        ..Config::default()
    };
    let mut run = relaxation_run_with(config, 0.0, 1.0);
    assert_eq!(run.num_steps(), 4);
    run.run().unwrap();

    assert!(dir.path().join("checkpoint.0000.cbor").exists());
    assert!(dir.path().join("checkpoint.0001.cbor").exists());
    assert!(!dir.path().join("checkpoint.0003.cbor").exists());

    let last = read_checkpoint(dir.path().join("checkpoint.0002.cbor")).unwrap();
    assert_eq!(last.outer_step, 4);
    assert_relative_eq!(last.time, 2.0);
    assert_eq!(last.values, run.state().owned_values());
    assert_eq!(last.config.error_step, 2);
}

#[test]
fn multirate_agrees_with_single_rate() {
    let widths = half_refined(32, 2.0);
    let config = Config {
        cfl: 0.3,
        final_time: 4.0,
        ..Config::default()
    };

    let mut single = build_run(&widths, 2, Config { max_levels: 1, ..config.clone() }, ChannelCommunicator::solo());
    let mut multi = build_run(&widths, 2, Config { max_levels: 2, ..config }, ChannelCommunicator::solo());
    assert_eq!(single.num_levels(), 1);
    assert_eq!(multi.num_levels(), 2);

    single.run().unwrap();
    multi.run().unwrap();

    let a = single.state().owned_values();
    let b = multi.state().owned_values();
    let max_diff = a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max);
    let amplitude = a.iter().map(|x| x.abs()).fold(0.0, f64::max);

    assert!(amplitude > 0.1);
    assert!(max_diff < 1e-2, "multi-rate and single-rate runs differ by {}", max_diff);
}
