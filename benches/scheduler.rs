use criterion::{black_box, criterion_group, criterion_main, Criterion};

use multirate::evaluator::UpwindAdvection;
use multirate::mesh::MeshPartition;
use multirate::message::channel::ChannelCommunicator;
use multirate::{setup, Config, Integrator};

fn refined_line(num_elements: usize) -> Vec<f64> {
    (0..num_elements)
        .map(|i| if i < num_elements / 2 { 0.25 } else { 1.0 })
        .collect()
}

fn bench_outer_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("outer step");

    for &(name, integrator) in &[("classical", Integrator::Classical), ("stiffly stable", Integrator::StifflyStable)] {
        let config = Config {
            max_levels: 3,
            final_time: 1e6,
            error_step: usize::MAX,
            integrator,
            relaxation_rate: 10.0,
            relaxing_fields: vec![1],
            ..Config::default()
        };
        let mesh = MeshPartition::periodic_line(&refined_line(4096), 4, 1, 0).unwrap();
        let evaluator = UpwindAdvection::from_config(&config, 1.0, 0.0, 2);
        let mut run = setup::build(config, mesh, 2, ChannelCommunicator::solo(), evaluator, |x, _| x.sin()).unwrap();

        group.bench_function(name, |b| {
            b.iter(|| {
                run.step().unwrap();
                black_box(run.state().owned_values()[0]);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_outer_step);
criterion_main!(benches);
