//! Tick arithmetic of the multi-rate clock.
//!
//! An outer step of a run with `L` levels is divided into `2^(L-1)` ticks of
//! the finest step. Level `l` is *active* (its residual is evaluated) on ticks
//! divisible by `2^l` and is *updated* at the end of every tick `t` for which
//! `t + 1` is divisible by `2^l`. Both tests reduce to counting trailing zero
//! bits, so no loop over levels is needed.

use crate::config::HISTORY_DEPTH;

/// Number of ticks in one outer step.
pub fn ticks_per_step(num_levels: usize) -> u64 {
    1 << (num_levels - 1)
}

/**
 * Number of levels `l` (counting from the finest) for which `2^l` divides
 * `tick`, capped at `num_levels`. Zero is divisible by everything.
 */
pub fn active_depth(tick: u64, num_levels: usize) -> usize {
    if tick == 0 {
        num_levels
    } else {
        (tick.trailing_zeros() as usize + 1).min(num_levels)
    }
}

/// Number of levels whose state is advanced at the end of `tick`.
pub fn update_depth(tick: u64, num_levels: usize) -> usize {
    active_depth(tick + 1, num_levels)
}

/// Multistep order (zero based) usable at the given outer step: the history
/// ring fills up over the first `HISTORY_DEPTH - 1` steps.
pub fn temporal_order(outer_step: usize) -> usize {
    outer_step.min(HISTORY_DEPTH - 1)
}




/**
 * Everything the scheduler needs to know about one tick.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickPlan {
    pub outer_step: usize,
    pub tick: u64,
    pub time: f64,
    pub active_depth: usize,
    pub update_depth: usize,
    pub order: usize,
    pub num_levels: usize,
}

impl TickPlan {
    pub fn new(outer_step: usize, tick: u64, dt: f64, num_levels: usize) -> Self {
        let ticks = ticks_per_step(num_levels);
        Self {
            outer_step,
            tick,
            time: dt * (outer_step as u64 * ticks + tick) as f64,
            active_depth: active_depth(tick, num_levels),
            update_depth: update_depth(tick, num_levels),
            order: temporal_order(outer_step),
            num_levels,
        }
    }

    /// The coarse level whose trace elements are carried to the midpoint of
    /// its step by the cross-level correction, if any.
    pub fn correction_level(&self) -> Option<usize> {
        if self.update_depth < self.num_levels {
            Some(self.update_depth)
        } else {
            None
        }
    }
}

/// The plans of all ticks of one outer step, in order.
pub fn step_plan(outer_step: usize, dt: f64, num_levels: usize) -> impl Iterator<Item = TickPlan> {
    (0..ticks_per_step(num_levels)).map(move |tick| TickPlan::new(outer_step, tick, dt, num_levels))
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    fn reference_depth(tick: u64, num_levels: usize) -> usize {
        let mut depth = 0;
        while depth < num_levels && tick % (1 << depth) == 0 {
            depth += 1;
        }
        depth
    }

    #[test]
    fn bit_scan_agrees_with_the_divisibility_loop() {
        for num_levels in 1..8 {
            for tick in 0..2 * ticks_per_step(num_levels) {
                assert_eq!(active_depth(tick, num_levels), reference_depth(tick, num_levels));
                assert_eq!(update_depth(tick, num_levels), reference_depth(tick + 1, num_levels));
            }
        }
    }

    #[test]
    fn single_level_runs_a_uniform_scheme() {
        let plans: Vec<_> = step_plan(5, 0.1, 1).collect();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].active_depth, 1);
        assert_eq!(plans[0].update_depth, 1);
        assert_eq!(plans[0].correction_level(), None);
    }

    #[test]
    fn two_levels_correct_once_at_the_first_tick() {
        let plans: Vec<_> = step_plan(0, 1.0, 2).collect();
        assert_eq!(plans.len(), 2);

        assert_eq!(plans[0].active_depth, 2);
        assert_eq!(plans[0].update_depth, 1);
        assert_eq!(plans[0].correction_level(), Some(1));

        assert_eq!(plans[1].active_depth, 1);
        assert_eq!(plans[1].update_depth, 2);
        assert_eq!(plans[1].correction_level(), None);
    }

    #[test]
    fn every_level_is_updated_as_often_as_it_is_active() {
        let num_levels = 4;
        let mut active = vec![0; num_levels];
        let mut updated = vec![0; num_levels];

        for plan in step_plan(3, 1.0, num_levels) {
            for l in 0..plan.active_depth {
                active[l] += 1;
            }
            for l in 0..plan.update_depth {
                updated[l] += 1;
            }
        }
        assert_eq!(active, vec![8, 4, 2, 1]);
        assert_eq!(updated, active);
    }

    #[test]
    fn order_ramps_up_over_the_first_steps() {
        assert_eq!(temporal_order(0), 0);
        assert_eq!(temporal_order(1), 1);
        assert_eq!(temporal_order(2), 2);
        assert_eq!(temporal_order(1000), 2);
    }

    #[test]
    fn stage_time_counts_ticks_across_outer_steps() {
        let plan = TickPlan::new(2, 3, 0.5, 3);
        assert_eq!(plan.time, 0.5 * (2.0 * 4.0 + 3.0));
    }
}
