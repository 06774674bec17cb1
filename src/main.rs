//! STRATUM-EM inversion driver
//!
//! Inverts every sounding named by an options file and writes one
//! result record per fiducial.
//!
//! # Usage
//!
//! ```bash
//! # Serial run
//! stratum-em options.toml results/
//!
//! # Parallel run over the local worker pool, fixed seed
//! stratum-em options.toml results/ --parallel --seed 1234
//!
//! # Re-run a single fiducial with verbose logging
//! stratum-em options.toml results/ --fiducial 2540.5 --verbose
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stratum_em::inversion::{DatapointFilter, Inference3D};
use stratum_em::storage::ResultStore;
use stratum_em::InversionOptions;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "stratum-em")]
#[command(about = "Bayesian airborne EM inversion - trans-dimensional MCMC resistivity profiling")]
#[command(version)]
struct CliArgs {
    /// Options file (TOML key = value records)
    options_file: PathBuf,

    /// Directory receiving one record per fiducial
    output_directory: PathBuf,

    /// Skip the embedded result database; JSON records are still written
    #[arg(long)]
    skip_storage: bool,

    /// Base PRNG seed; each datapoint derives seed + jump * index
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Seed stride between consecutive datapoints
    #[arg(long, default_value = "1000000")]
    jump: u64,

    /// Invert only the datapoint at this zero-based index
    #[arg(long)]
    index: Option<usize>,

    /// Invert only the datapoint with this fiducial
    #[arg(long)]
    fiducial: Option<f64>,

    /// Invert only datapoints on this line number
    #[arg(long)]
    line: Option<f64>,

    /// Fan datapoints out across the local worker pool
    #[arg(long)]
    parallel: bool,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Log at trace level (implies --debug)
    #[arg(long)]
    verbose: bool,
}

fn init_logging(args: &CliArgs) {
    let level = if args.verbose {
        "trace"
    } else if args.debug {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stratum_em={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    let args = CliArgs::parse();
    init_logging(&args);

    match run(&args) {
        Ok(all_succeeded) => {
            if !all_succeeded {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}

fn run(args: &CliArgs) -> Result<bool> {
    let options = InversionOptions::load(&args.options_file)
        .with_context(|| format!("loading options from {}", args.options_file.display()))?;

    if options.interactive_plot || options.save_png {
        warn!("plot options are accepted but this build has no renderer");
    }

    let save_storage = options.save_hdf5 && !args.skip_storage;

    let mut driver = Inference3D::from_options(options).context("loading survey")?;

    let filter = DatapointFilter {
        index: args.index,
        fiducial: args.fiducial,
        line: args.line,
    };
    if args.index.is_some() || args.fiducial.is_some() || args.line.is_some() {
        driver.select(filter).context("selecting datapoints")?;
    }

    let store = if save_storage {
        Some(
            ResultStore::open(args.output_directory.join("results.sled"))
                .context("opening result store")?,
        )
    } else {
        None
    };

    // Ctrl-C requests a cooperative stop; workers notice at the next
    // window boundary and keep their partial posteriors
    let kill = Arc::new(AtomicBool::new(false));
    {
        let kill = kill.clone();
        if let Err(e) = ctrlc::set_handler(move || kill.store(true, Ordering::Relaxed)) {
            warn!("could not install interrupt handler: {e}");
        }
    }

    info!(
        datapoints = driver.n_datapoints(),
        parallel = args.parallel,
        seed = args.seed,
        "starting inversion"
    );

    let summary = driver
        .run(
            args.seed,
            args.jump,
            args.parallel,
            store.as_ref(),
            &args.output_directory,
            Some(&kill),
        )
        .context("running inversion")?;

    if summary.all_succeeded() {
        info!(completed = summary.completed, "all datapoints succeeded");
    } else {
        warn!(
            completed = summary.completed,
            failed = ?summary.failed,
            "some datapoints failed"
        );
    }
    Ok(summary.all_succeeded())
}
