use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

use multirate::evaluator::UpwindAdvection;
use multirate::mesh::MeshPartition;
use multirate::message::channel::ChannelCommunicator;
use multirate::message::comm::Communicator;
use multirate::message::tcp::TcpCommunicator;
use multirate::{setup, Config, Integrator, Result};

#[derive(Debug, Parser)]
#[clap(version, author = "J. Zrake <jzrake@clemson.edu>")]
#[clap(about = "Advect a pulse through a periodic line with a refined middle third")]
struct Opts {
    #[clap(short = 'n', long, default_value = "96")]
    num_elements: usize,

    #[clap(short = 'p', long, default_value = "3")]
    nodes: usize,

    #[clap(short = 'l', long, default_value = "3")]
    max_levels: usize,

    #[clap(short = 'r', long, default_value = "4")]
    refinement: f64,

    #[clap(long, default_value = "0.5")]
    cfl: f64,

    #[clap(short = 't', long, default_value = "1.0")]
    final_time: f64,

    #[clap(short = 'e', long, default_value = "100")]
    error_step: usize,

    #[clap(long, default_value = "classical", possible_values = &["classical", "stiffly-stable"])]
    integrator: String,

    #[clap(long, default_value = "0.0")]
    relaxation_rate: f64,

    #[clap(long)]
    checkpoint_dir: Option<PathBuf>,

    #[clap(long, default_value = "0")]
    rank: usize,

    #[clap(long, value_delimiter = ',')]
    peers: Vec<SocketAddr>,

    #[clap(long)]
    timeout_ms: Option<u64>,

    #[clap(short = 'v', long)]
    verbose: bool,
}

impl Opts {
    fn config(&self) -> Config {
        Config {
            max_levels: self.max_levels,
            cfl: self.cfl,
            final_time: self.final_time,
            error_step: self.error_step,
            integrator: match self.integrator.as_str() {
                "stiffly-stable" => Integrator::StifflyStable,
                _ => Integrator::Classical,
            },
            relaxation_rate: self.relaxation_rate,
            relaxing_fields: vec![1],
            exchange_timeout_ms: self.timeout_ms,
            checkpoint_dir: self.checkpoint_dir.clone(),
        }
    }

    fn widths(&self) -> Vec<f64> {
        let n = self.num_elements;
        let coarse = 1.0;
        let fine = 1.0 / self.refinement;
        let widths: Vec<f64> = (0..n)
            .map(|i| if i >= n / 3 && i < 2 * n / 3 { fine } else { coarse })
            .collect();
        let total: f64 = widths.iter().sum();
        widths.into_iter().map(|w| w / total).collect()
    }
}




// ============================================================================
fn run<C: Communicator>(opts: &Opts, comm: C) -> Result<()> {
    let config = opts.config();
    let mesh = MeshPartition::periodic_line(&opts.widths(), opts.nodes, comm.size(), comm.rank())?;
    let evaluator = UpwindAdvection::from_config(&config, 1.0, 0.0, 2);
    let pulse = |x: f64, field: usize| match field {
        0 => (-((x - 0.25) / 0.05).powi(2)).exp(),
        _ => 1.0,
    };

    let mut scheduler = setup::build(config, mesh, 2, comm, evaluator, pulse)?;
    let start = std::time::Instant::now();
    scheduler.run()?;

    info!(
        "{} steps of {} ticks in {:.3}s",
        scheduler.num_steps(),
        1u64 << (scheduler.num_levels() - 1),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn main() {
    let opts = Opts::parse();
    let level = if opts.verbose { LevelFilter::Debug } else { LevelFilter::Info };

    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("{}", e);
    }
    info!("{:?}", opts);

    let result = if opts.peers.is_empty() {
        run(&opts, ChannelCommunicator::solo())
    } else {
        TcpCommunicator::connect(opts.rank, opts.peers.clone()).and_then(|(mut host, comm)| {
            let result = run(&opts, comm);
            host.join();
            result
        })
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}
