use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::field::{FieldLayout, FieldState};
use crate::mesh::MeshPartition;

/**
 * Fail with [`Error::Divergence`] if any owned value is not finite.
 */
pub fn check_finite(state: &FieldState, outer_step: usize) -> Result<()> {
    match state.first_non_finite() {
        None => Ok(()),
        Some((element, node, field)) => Err(Error::Divergence {
            step: outer_step,
            element,
            node,
            field,
        }),
    }
}




/**
 * Something that wants to see the solution on the diagnostics cadence. The
 * state has already passed the finiteness check when a reporter is called.
 */
pub trait Reporter {
    fn report(&mut self, outer_step: usize, time: f64, mesh: &MeshPartition, state: &FieldState) -> Result<()>;
}

/// Logs a progress line per report.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, outer_step: usize, time: f64, _mesh: &MeshPartition, _state: &FieldState) -> Result<()> {
        info!("tstep = {}, t = {:.6}", outer_step, time);
        Ok(())
    }
}




#[derive(Serialize, Deserialize, Debug, Clone)]


/**
 * The owned part of one rank's solution at a report, with the run parameters
 * and the global ids needed to stitch ranks back together.
 */
pub struct Checkpoint {
    pub config: Config,
    pub rank: usize,
    pub outer_step: usize,
    pub time: f64,
    pub layout: FieldLayout,
    pub global_ids: Vec<usize>,
    pub values: Vec<f64>,
}

/// Writes a CBOR checkpoint per report into a directory, numbering the files
/// in report order. Ranks of a multi-rank run add their rank to the name.
///
pub struct CheckpointWriter {
    directory: PathBuf,
    config: Config,
    rank: usize,
    num_ranks: usize,
    count: usize,
}

impl CheckpointWriter {
    pub fn new<P: AsRef<Path>>(directory: P, config: Config, rank: usize, num_ranks: usize) -> Result<Self> {
        std::fs::create_dir_all(directory.as_ref())?;
        Ok(Self {
            directory: directory.as_ref().to_path_buf(),
            config,
            rank,
            num_ranks,
            count: 0,
        })
    }

    pub fn path(&self, index: usize) -> PathBuf {
        if self.num_ranks > 1 {
            self.directory.join(format!("checkpoint.{:04}.r{:03}.cbor", index, self.rank))
        } else {
            self.directory.join(format!("checkpoint.{:04}.cbor", index))
        }
    }
}

impl Reporter for CheckpointWriter {
    fn report(&mut self, outer_step: usize, time: f64, mesh: &MeshPartition, state: &FieldState) -> Result<()> {
        let checkpoint = Checkpoint {
            config: self.config.clone(),
            rank: self.rank,
            outer_step,
            time,
            layout: state.layout(),
            global_ids: mesh.global_ids()[..mesh.num_elements()].to_vec(),
            values: state.owned_values().to_vec(),
        };
        let path = self.path(self.count);
        let mut buffer = BufWriter::new(File::create(&path)?);

        ciborium::ser::into_writer(&checkpoint, &mut buffer)
            .map_err(|e| Error::Codec(format!("writing {}: {:?}", path.display(), e)))?;

        info!("write {}", path.display());
        self.count += 1;
        Ok(())
    }
}

pub fn read_checkpoint<P: AsRef<Path>>(path: P) -> Result<Checkpoint> {
    let file = File::open(path.as_ref())?;
    ciborium::de::from_reader(BufReader::new(file))
        .map_err(|e| Error::Codec(format!("reading {}: {:?}", path.as_ref().display(), e)))
}
