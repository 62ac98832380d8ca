use log::trace;

use crate::coefficients::CoefficientTable;
use crate::config::Config;
use crate::diagnostics::{self, Reporter};
use crate::error::Result;
use crate::evaluator::ResidualEvaluator;
use crate::field::{FieldState, ResidualHistory};
use crate::halo::HaloExchange;
use crate::levels::LevelAssignment;
use crate::mesh::MeshPartition;
use crate::message::comm::Communicator;
use crate::schedule::{self, TickPlan};
use crate::updater::{self, LevelRecord};

/// One action taken by the scheduler within a tick, as recorded when event
/// recording is switched on. `slot` is the level's shift index at the time.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    HaloStart { outer_step: usize, tick: u64 },
    Volume { level: usize, slot: usize },
    HaloFinish,
    Surface { level: usize, slot: usize },
    Update { level: usize, slot: usize, order: usize },
    Correction { level: usize, slot: usize, order: usize },
}




/**
 * The multi-rate time stepper of one rank. Owns the solution, the residual
 * history and one record per level; drives the residual evaluator, the halo
 * exchange and the step updater through the ticks of each outer step. Built
 * by [`crate::setup::build`].
 */
pub struct Scheduler<E: ResidualEvaluator, C: Communicator> {
    pub(crate) config: Config,
    pub(crate) mesh: MeshPartition,
    pub(crate) levels: LevelAssignment,
    pub(crate) records: Vec<LevelRecord>,
    pub(crate) coefficients: CoefficientTable,
    pub(crate) relaxing: Vec<bool>,
    pub(crate) state: FieldState,
    pub(crate) history: ResidualHistory,
    pub(crate) halo: HaloExchange<C>,
    pub(crate) evaluator: E,
    pub(crate) reporters: Vec<Box<dyn Reporter>>,
    pub(crate) dt: f64,
    pub(crate) num_steps: usize,
    pub(crate) outer_step: usize,
    pub(crate) events: Option<Vec<Event>>,
}




// ============================================================================
impl<E: ResidualEvaluator, C: Communicator> Scheduler<E, C> {

    /**
     * Take up to `n` outer steps, stopping early at the end of the run. The
     * diagnostics run after every step whose index is a multiple of the
     * configured error step, so the state coming out of step 0 is checked
     * straight away, and once more after the last step of the run. Reports
     * carry the number of steps taken so far and the time reached.
     */
    pub fn advance(&mut self, n: usize) -> Result<()> {
        for _ in 0..n {
            if self.is_finished() {
                break;
            }
            let index = self.outer_step;
            self.step()?;

            if index % self.config.error_step == 0 || self.is_finished() {
                self.report()?;
            }
        }
        Ok(())
    }

    /// Take all remaining outer steps.
    pub fn run(&mut self) -> Result<()> {
        self.advance(self.num_steps.saturating_sub(self.outer_step))
    }

    /// One outer step: `2^(L-1)` ticks of the finest level. Does nothing once
    /// the run has reached its final time.
    pub fn step(&mut self) -> Result<()> {
        if self.is_finished() {
            return Ok(());
        }
        for plan in schedule::step_plan(self.outer_step, self.dt, self.num_levels()) {
            self.tick(&plan)?;
        }
        self.outer_step += 1;
        Ok(())
    }

    /// Check the owned state for non-finite values, then hand it to every
    /// reporter.
    pub fn report(&mut self) -> Result<()> {
        diagnostics::check_finite(&self.state, self.outer_step)?;
        let time = self.time();

        for reporter in &mut self.reporters {
            reporter.report(self.outer_step, time, &self.mesh, &self.state)?;
        }
        Ok(())
    }

    fn tick(&mut self, plan: &TickPlan) -> Result<()> {
        let Self {
            mesh,
            levels,
            records,
            coefficients,
            relaxing,
            state,
            history,
            halo,
            evaluator,
            events,
            ..
        } = self;

        trace!(
            "step {} tick {}: t = {:.6}, active {}, update {}, order {}",
            plan.outer_step,
            plan.tick,
            plan.time,
            plan.active_depth,
            plan.update_depth,
            plan.order
        );

        record(events, Event::HaloStart { outer_step: plan.outer_step, tick: plan.tick });
        let pending = halo.start(state)?;

        for l in 0..plan.active_depth {
            let slot = records[l].shift;
            evaluator.volume(&levels.levels[l].elements, slot, mesh, state, history);
            record(events, Event::Volume { level: l, slot });
        }

        pending.finish(state)?;
        record(events, Event::HaloFinish);

        for l in 0..plan.active_depth {
            let slot = records[l].shift;
            evaluator.surface(&levels.levels[l].elements, slot, mesh, state, plan.time, history);
            record(events, Event::Surface { level: l, slot });
        }

        for l in 0..plan.update_depth {
            let slot = records[l].shift;
            let c = coefficients.full_step(plan.order, l);
            updater::advance(&levels.levels[l].elements, &mut records[l], c, relaxing, history, state);
            record(events, Event::Update { level: l, slot, order: plan.order });
        }

        if let Some(u) = plan.correction_level() {
            let c = coefficients.half_step(plan.order, u - 1);
            updater::correct_traces(&levels.levels[u].trace_elements, &records[u], c, relaxing, history, state);
            record(events, Event::Correction { level: u, slot: records[u].shift, order: plan.order });
        }

        for l in 0..plan.update_depth {
            evaluator.filter(&levels.levels[l].elements, mesh, state);
        }
        Ok(())
    }
}

fn record(events: &mut Option<Vec<Event>>, event: Event) {
    if let Some(events) = events {
        events.push(event)
    }
}




// ============================================================================
impl<E: ResidualEvaluator, C: Communicator> Scheduler<E, C> {

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mesh(&self) -> &MeshPartition {
        &self.mesh
    }

    pub fn levels(&self) -> &LevelAssignment {
        &self.levels
    }

    pub fn num_levels(&self) -> usize {
        self.records.len()
    }

    pub fn coefficients(&self) -> &CoefficientTable {
        &self.coefficients
    }

    pub fn state(&self) -> &FieldState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut FieldState {
        &mut self.state
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn halo(&self) -> &HaloExchange<C> {
        &self.halo
    }

    /// The finest step.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn outer_step(&self) -> usize {
        self.outer_step
    }

    pub fn time(&self) -> f64 {
        self.dt * (self.outer_step as u64 * schedule::ticks_per_step(self.num_levels())) as f64
    }

    pub fn is_finished(&self) -> bool {
        self.outer_step >= self.num_steps
    }

    /// Current shift index of every level.
    pub fn shifts(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.shift).collect()
    }

    pub fn add_reporter(&mut self, reporter: Box<dyn Reporter>) {
        self.reporters.push(reporter)
    }

    /// Start or stop recording events. Stopping discards anything recorded.
    pub fn record_events(&mut self, on: bool) {
        self.events = if on { Some(Vec::new()) } else { None };
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.as_mut().map(std::mem::take).unwrap_or_default()
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::evaluator::UpwindAdvection;
    use crate::levels::ElementSet;
    use crate::message::channel::ChannelCommunicator;
    use crate::setup;

    fn two_level_run() -> Scheduler<UpwindAdvection, ChannelCommunicator> {
        let mut widths = vec![0.1; 8];
        for w in &mut widths[4..] {
            *w = 0.2;
        }
        let mesh = MeshPartition::periodic_line(&widths, 1, 1, 0).unwrap();
        let config = Config {
            max_levels: 2,
            final_time: 1.0,
            ..Config::default()
        };
        let evaluator = UpwindAdvection::from_config(&config, 1.0, 0.0, 1);
        setup::build(config, mesh, 1, ChannelCommunicator::solo(), evaluator, |x, _| x).unwrap()
    }

    #[test]
    fn refined_line_uses_two_levels() {
        let run = two_level_run();
        assert_eq!(run.num_levels(), 2);
        assert_eq!(run.levels().populations(), vec![4, 4]);
        assert_eq!(run.levels().levels[1].trace_elements.ids(), &[4, 7]);
    }

    #[test]
    fn first_step_corrects_level_one_once_at_tick_zero() {
        let mut run = two_level_run();
        run.record_events(true);
        run.step().unwrap();

        let events = run.take_events();
        let corrections: Vec<_> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Event::Correction { .. }))
            .collect();
        assert_eq!(corrections.len(), 1);
        assert_eq!(*corrections[0].1, Event::Correction { level: 1, slot: 0, order: 0 });

        let second_tick = events
            .iter()
            .position(|e| *e == Event::HaloStart { outer_step: 0, tick: 1 })
            .unwrap();
        assert!(corrections[0].0 < second_tick);
    }

    #[test]
    fn events_follow_the_tick_pipeline() {
        let mut run = two_level_run();
        run.record_events(true);
        run.step().unwrap();

        assert_eq!(
            run.take_events(),
            vec![
                Event::HaloStart { outer_step: 0, tick: 0 },
                Event::Volume { level: 0, slot: 0 },
                Event::Volume { level: 1, slot: 0 },
                Event::HaloFinish,
                Event::Surface { level: 0, slot: 0 },
                Event::Surface { level: 1, slot: 0 },
                Event::Update { level: 0, slot: 0, order: 0 },
                Event::Correction { level: 1, slot: 0, order: 0 },
                Event::HaloStart { outer_step: 0, tick: 1 },
                Event::Volume { level: 0, slot: 1 },
                Event::HaloFinish,
                Event::Surface { level: 0, slot: 1 },
                Event::Update { level: 0, slot: 1, order: 0 },
                Event::Update { level: 1, slot: 0, order: 0 },
            ]
        );
        assert_eq!(run.shifts(), vec![2, 1]);
    }

    struct ZeroingFilter {
        inner: UpwindAdvection,
        filtered: Vec<Vec<usize>>,
    }

    impl ResidualEvaluator for ZeroingFilter {
        fn wave_speed(&self) -> f64 {
            self.inner.wave_speed()
        }

        fn volume(
            &mut self,
            elements: &ElementSet,
            slot: usize,
            mesh: &MeshPartition,
            state: &FieldState,
            history: &mut ResidualHistory,
        ) {
            self.inner.volume(elements, slot, mesh, state, history)
        }

        fn surface(
            &mut self,
            elements: &ElementSet,
            slot: usize,
            mesh: &MeshPartition,
            state: &FieldState,
            time: f64,
            history: &mut ResidualHistory,
        ) {
            self.inner.surface(elements, slot, mesh, state, time, history)
        }

        fn filter(&mut self, elements: &ElementSet, _mesh: &MeshPartition, state: &mut FieldState) {
            self.filtered.push(elements.ids().to_vec());
            for &e in elements.ids() {
                for q in state.element_mut(e) {
                    *q = 0.0;
                }
            }
        }
    }

    #[test]
    fn filter_runs_on_every_level_just_advanced() {
        let plain = two_level_run();
        let config = plain.config().clone();
        let evaluator = ZeroingFilter {
            inner: UpwindAdvection::from_config(&config, 1.0, 0.0, 1),
            filtered: Vec::new(),
        };
        let mesh = plain.mesh().clone();
        let mut run = setup::build(config, mesh, 1, ChannelCommunicator::solo(), evaluator, |x, _| x + 1.0).unwrap();
        run.step().unwrap();

        let fine = vec![0, 1, 2, 3];
        let coarse = vec![4, 5, 6, 7];
        assert_eq!(run.evaluator().filtered, vec![fine.clone(), fine, coarse]);
        assert!(run.state().owned_values().iter().all(|&q| q == 0.0));
    }

    #[test]
    fn events_are_not_kept_unless_asked_for() {
        let mut run = two_level_run();
        run.step().unwrap();
        assert!(run.take_events().is_empty());
    }
}
