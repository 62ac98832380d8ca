#![allow(dead_code)]

use std::thread;

use multirate::evaluator::UpwindAdvection;
use multirate::mesh::MeshPartition;
use multirate::message::channel::ChannelCommunicator;
use multirate::message::comm::Communicator;
use multirate::scheduler::{Event, Scheduler};
use multirate::{setup, Config};

pub type Run = Scheduler<UpwindAdvection, ChannelCommunicator>;

/// Widths of a periodic line whose first half is `ratio` times finer than
/// its second half.
pub fn half_refined(num_elements: usize, ratio: f64) -> Vec<f64> {
    (0..num_elements)
        .map(|i| if i < num_elements / 2 { 1.0 / ratio } else { 1.0 })
        .collect()
}

pub fn wave(x: f64, _field: usize) -> f64 {
    (x * std::f64::consts::PI / 4.0).sin()
}

pub fn build_run(widths: &[f64], nodes: usize, config: Config, comm: ChannelCommunicator) -> Run {
    let mesh = MeshPartition::periodic_line(widths, nodes, comm.size(), comm.rank()).unwrap();
    let evaluator = UpwindAdvection::from_config(&config, 1.0, 0.0, 1);
    setup::build(config, mesh, 1, comm, evaluator, wave).unwrap()
}

/// What one rank reports back from a run: owned global ids, owned levels,
/// owned values and the recorded events.
pub struct RankResult {
    pub global_ids: Vec<usize>,
    pub levels: Vec<usize>,
    pub values: Vec<f64>,
    pub events: Vec<Event>,
}

/// Run `steps` outer steps on each rank of an in-process group.
pub fn run_on_ranks(size: usize, widths: &[f64], nodes: usize, config: &Config, steps: usize) -> Vec<RankResult> {
    let procs: Vec<_> = ChannelCommunicator::group(size)
        .into_iter()
        .map(|comm| {
            let widths = widths.to_vec();
            let config = config.clone();
            thread::spawn(move || {
                let mut run = build_run(&widths, nodes, config, comm);
                run.record_events(true);
                run.advance(steps).unwrap();
                let n = run.mesh().num_elements();
                RankResult {
                    global_ids: run.mesh().global_ids()[..n].to_vec(),
                    levels: run.levels().element_level[..n].to_vec(),
                    values: run.state().owned_values().to_vec(),
                    events: run.take_events(),
                }
            })
        })
        .collect();
    procs.into_iter().map(|p| p.join().unwrap()).collect()
}

/// Owned values of all ranks, element by element in global order.
pub fn gather(results: &[RankResult], num_global: usize) -> Vec<Vec<f64>> {
    let mut out = vec![Vec::new(); num_global];
    for r in results {
        let len = r.values.len() / r.global_ids.len();
        for (local, &g) in r.global_ids.iter().enumerate() {
            out[g] = r.values[local * len..(local + 1) * len].to_vec();
        }
    }
    out
}
