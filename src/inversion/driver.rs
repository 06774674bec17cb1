//! The outer driver: fan-out over datapoints
//!
//! Owns the sounding collection and hands each datapoint to its own
//! `Inference1D`. Serial mode iterates in file order; parallel mode
//! fans out across a worker pool. Either way each chain derives its
//! PRNG stream from `seed + jump * index`, so the two modes produce
//! bit-identical records per fiducial.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{error, info};

use crate::config::InversionOptions;
use crate::data::{self, DatasetError};
use crate::datapoint::FdemDataPoint;
use crate::storage::{ResultStore, StorageError};
use crate::system::{FdemSystem, SystemError};

use super::inference::{Inference1D, InferenceError, RunControls};
use super::record::InversionRecord;

/// Errors raised by the driver
#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    System(#[from] SystemError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cannot write record {path}: {source}")]
    RecordWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("record serialization failed: {0}")]
    RecordSerialize(#[from] serde_json::Error),

    #[error("no datapoints match the requested selection")]
    EmptySelection,
}

/// Optional narrowing of the datapoint collection from the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatapointFilter {
    pub index: Option<usize>,
    pub fiducial: Option<f64>,
    pub line: Option<f64>,
}

impl DatapointFilter {
    fn keep(&self, index: usize, dp: &FdemDataPoint) -> bool {
        if let Some(i) = self.index {
            if index != i {
                return false;
            }
        }
        if let Some(f) = self.fiducial {
            if (dp.fiducial - f).abs() > 1e-9 {
                return false;
            }
        }
        if let Some(l) = self.line {
            if (dp.line_number - l).abs() > 1e-9 {
                return false;
            }
        }
        true
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub completed: usize,
    /// Fiducials that failed (skipped rows, init failures, timeouts)
    pub failed: Vec<f64>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Driver over a collection of datapoints.
pub struct Inference3D {
    options: InversionOptions,
    system: Arc<FdemSystem>,
    datapoints: Vec<FdemDataPoint>,
    /// Fiducials dropped at load time, carried into the run summary
    skipped: Vec<f64>,
}

impl Inference3D {
    /// Load the system and sounding files named by the options.
    pub fn from_options(options: InversionOptions) -> Result<Self, DriverError> {
        let system = Arc::new(FdemSystem::read(&options.system_filename)?);
        let set = data::read_soundings(&options.data_filename, &system)?;
        info!(
            datapoints = set.datapoints.len(),
            skipped = set.skipped.len(),
            frequencies = system.n_frequencies(),
            "loaded survey"
        );
        Ok(Self {
            options,
            system,
            datapoints: set.datapoints,
            skipped: set.skipped.into_iter().map(|(f, _)| f).collect(),
        })
    }

    /// Build a driver from already-constructed datapoints (tests, the
    /// synthetic generator).
    pub fn with_datapoints(
        options: InversionOptions,
        system: Arc<FdemSystem>,
        datapoints: Vec<FdemDataPoint>,
    ) -> Self {
        Self {
            options,
            system,
            datapoints,
            skipped: Vec::new(),
        }
    }

    pub fn system(&self) -> &Arc<FdemSystem> {
        &self.system
    }

    pub fn n_datapoints(&self) -> usize {
        self.datapoints.len()
    }

    /// Narrow the collection per the CLI selection flags.
    pub fn select(&mut self, filter: DatapointFilter) -> Result<(), DriverError> {
        let kept: Vec<FdemDataPoint> = self
            .datapoints
            .drain(..)
            .enumerate()
            .filter(|(i, dp)| filter.keep(*i, dp))
            .map(|(_, dp)| dp)
            .collect();
        if kept.is_empty() {
            return Err(DriverError::EmptySelection);
        }
        self.datapoints = kept;
        Ok(())
    }

    /// Invert every datapoint. `parallel` fans out across the rayon
    /// pool; seeds are derived per datapoint either way, so the mode
    /// does not change any result.
    pub fn run(
        &self,
        seed: u64,
        jump: u64,
        parallel: bool,
        store: Option<&ResultStore>,
        output_dir: &Path,
        kill: Option<&AtomicBool>,
    ) -> Result<RunSummary, DriverError> {
        std::fs::create_dir_all(output_dir).map_err(|source| DriverError::RecordWrite {
            path: output_dir.display().to_string(),
            source,
        })?;

        let worker = |(index, dp): (usize, &FdemDataPoint)| -> (f64, Option<InversionRecord>) {
            let fiducial = dp.fiducial;
            let chain_seed = seed.wrapping_add(jump.wrapping_mul(index as u64));
            match self.invert_one(dp.clone(), chain_seed, kill) {
                Ok(record) => (fiducial, Some(record)),
                Err(e) => {
                    error!(fiducial, "datapoint failed: {e}");
                    (fiducial, None)
                }
            }
        };

        let outcomes: Vec<(f64, Option<InversionRecord>)> = if parallel {
            self.datapoints.par_iter().enumerate().map(worker).collect()
        } else {
            self.datapoints.iter().enumerate().map(worker).collect()
        };

        let mut summary = RunSummary {
            completed: 0,
            failed: self.skipped.clone(),
        };
        for (fiducial, outcome) in outcomes {
            match outcome {
                Some(record) => {
                    self.persist(&record, store, output_dir)?;
                    if record.failed {
                        summary.failed.push(fiducial);
                    } else {
                        summary.completed += 1;
                    }
                }
                None => summary.failed.push(fiducial),
            }
        }
        if let Some(store) = store {
            store.flush()?;
        }
        info!(
            completed = summary.completed,
            failed = summary.failed.len(),
            "run finished"
        );
        Ok(summary)
    }

    fn invert_one(
        &self,
        datapoint: FdemDataPoint,
        chain_seed: u64,
        kill: Option<&AtomicBool>,
    ) -> Result<InversionRecord, InferenceError> {
        let deadline = self
            .options
            .maximum_seconds_per_datapoint
            .map(|s| Instant::now() + Duration::from_secs(s));
        let mut inference = Inference1D::new(&self.options, datapoint, chain_seed)?;
        Ok(inference.run(RunControls { kill, deadline }))
    }

    /// Write the record to its JSON file and, when enabled, the store.
    fn persist(
        &self,
        record: &InversionRecord,
        store: Option<&ResultStore>,
        output_dir: &Path,
    ) -> Result<(), DriverError> {
        let path = record_path(output_dir, record.fiducial);
        let json = serde_json::to_vec_pretty(record)?;
        std::fs::write(&path, json).map_err(|source| DriverError::RecordWrite {
            path: path.display().to_string(),
            source,
        })?;
        if let Some(store) = store {
            store.put(record)?;
        }
        Ok(())
    }
}

/// Path of the JSON record for a fiducial.
pub fn record_path(output_dir: &Path, fiducial: f64) -> PathBuf {
    output_dir.join(format!("{fiducial}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::valid_options;
    use crate::inversion::inference::tests::synthetic_datapoint;
    use crate::system::tests::five_frequency_system;

    fn fast_options() -> InversionOptions {
        let mut options = valid_options();
        options.n_markov_chains = 800;
        options.update_plot_every = 200;
        options.burn_in_minimum_iterations = 100;
        options.maximum_number_of_layers = 6;
        options
    }

    fn survey(n: usize) -> (Arc<crate::system::FdemSystem>, Vec<FdemDataPoint>) {
        let sys = Arc::new(five_frequency_system());
        let datapoints = (0..n)
            .map(|i| {
                synthetic_datapoint(&sys, &[0.015], &[], 30.0, 0.03, (i + 1) as f64, 1000 + i as u64)
            })
            .collect();
        (sys, datapoints)
    }

    #[test]
    fn test_serial_run_writes_records() {
        let (sys, dps) = survey(2);
        let driver = Inference3D::with_datapoints(fast_options(), sys, dps);
        let dir = tempfile::tempdir().unwrap();

        let summary = driver
            .run(42, 1000, false, None, dir.path(), None)
            .unwrap();
        assert_eq!(summary.completed, 2);
        assert!(summary.all_succeeded());
        for fiducial in [1.0, 2.0] {
            let path = record_path(dir.path(), fiducial);
            assert!(path.exists(), "missing record {path:?}");
            let text = std::fs::read_to_string(path).unwrap();
            let record: InversionRecord = serde_json::from_str(&text).unwrap();
            assert!((record.fiducial - fiducial).abs() < 1e-12);
        }
    }

    #[test]
    fn test_serial_and_parallel_agree_per_fiducial() {
        let (sys, dps) = survey(3);
        let driver = Inference3D::with_datapoints(fast_options(), sys, dps);
        let dir_serial = tempfile::tempdir().unwrap();
        let dir_parallel = tempfile::tempdir().unwrap();

        driver
            .run(7, 100_000, false, None, dir_serial.path(), None)
            .unwrap();
        driver
            .run(7, 100_000, true, None, dir_parallel.path(), None)
            .unwrap();

        for fiducial in [1.0, 2.0, 3.0] {
            let a: InversionRecord = serde_json::from_str(
                &std::fs::read_to_string(record_path(dir_serial.path(), fiducial)).unwrap(),
            )
            .unwrap();
            let b: InversionRecord = serde_json::from_str(
                &std::fs::read_to_string(record_path(dir_parallel.path(), fiducial)).unwrap(),
            )
            .unwrap();
            assert_eq!(a.best_iteration, b.best_iteration);
            assert_eq!(a.best_log_posterior.to_bits(), b.best_log_posterior.to_bits());
            assert_eq!(
                a.best_model.log_conductivity.len(),
                b.best_model.log_conductivity.len()
            );
            assert_eq!(a.misfit_trace, b.misfit_trace);
        }
    }

    #[test]
    fn test_filter_by_fiducial() {
        let (sys, dps) = survey(3);
        let mut driver = Inference3D::with_datapoints(fast_options(), sys, dps);
        driver
            .select(DatapointFilter {
                fiducial: Some(2.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(driver.n_datapoints(), 1);

        let err = driver.select(DatapointFilter {
            fiducial: Some(99.0),
            ..Default::default()
        });
        assert!(matches!(err, Err(DriverError::EmptySelection)));
    }

    #[test]
    fn test_store_receives_records() {
        let (sys, dps) = survey(2);
        let driver = Inference3D::with_datapoints(fast_options(), sys, dps);
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().join("results")).unwrap();

        driver
            .run(3, 10, false, Some(&store), dir.path(), None)
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.fiducials(), vec![1.0, 2.0]);
        let record = store.get(1.0).unwrap();
        assert!(record.burned_in);
    }
}
