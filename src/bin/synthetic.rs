//! Synthetic airborne EM survey generator
//!
//! Forward-models a known layered earth through the same kernel the
//! inversion uses, adds Gaussian noise, and writes a sounding CSV plus
//! a matching system file. The output feeds end-to-end testing and
//! demo inversions:
//!
//! ```bash
//! synthetic --output-dir survey/ --soundings 20 --noise 0.03
//! stratum-em survey/options.toml survey/results/
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use stratum_em::data::write_soundings;
use stratum_em::datapoint::FdemDataPoint;
use stratum_em::forward;
use stratum_em::system::{CircularLoop, FdemSystem, Orientation};

// ============================================================================
// Default acquisition geometry
// ============================================================================

/// Frequencies of a five-channel horizontal-coplanar bird (Hz)
const FREQUENCIES: [f64; 5] = [380.0, 1776.0, 3345.0, 8171.0, 41020.0];
/// Coil separations per frequency (m)
const SEPARATIONS: [f64; 5] = [7.93, 7.91, 9.03, 7.91, 7.92];
/// Nominal flight height (m)
const FLIGHT_HEIGHT: f64 = 30.0;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "synthetic")]
#[command(about = "Synthetic airborne EM survey generator for STRATUM-EM")]
#[command(version)]
struct Args {
    /// Directory receiving soundings.csv and system.stm
    #[arg(short, long, default_value = "synthetic-survey")]
    output_dir: PathBuf,

    /// Number of soundings to generate
    #[arg(short = 'n', long, default_value = "10")]
    soundings: usize,

    /// Layer conductivities in S/m, shallow to basement
    #[arg(long, value_delimiter = ',', default_value = "0.001,0.1")]
    conductivities: Vec<f64>,

    /// Interface depths in m (one fewer than conductivities)
    #[arg(long, value_delimiter = ',', default_value = "30.0")]
    depths: Vec<f64>,

    /// Relative noise fraction added to each channel
    #[arg(long, default_value = "0.03")]
    noise: f64,

    /// Noise floor in ppm
    #[arg(long, default_value = "1.0")]
    floor: f64,

    /// Line number written to every sounding
    #[arg(long, default_value = "100")]
    line: f64,

    /// Random seed for reproducible noise
    #[arg(long, default_value = "0")]
    seed: u64,
}

fn build_system() -> Result<Arc<FdemSystem>> {
    let transmitters: Vec<CircularLoop> = FREQUENCIES
        .iter()
        .map(|_| CircularLoop::new(Orientation::Z, 1.0, 0.0, 0.0, 0.0))
        .collect();
    let receivers: Vec<CircularLoop> = SEPARATIONS
        .iter()
        .map(|&s| CircularLoop::new(Orientation::Z, 1.0, s, 0.0, 0.0))
        .collect();
    Ok(Arc::new(FdemSystem::new(
        FREQUENCIES.to_vec(),
        transmitters,
        receivers,
    )?))
}

fn write_system_file(path: &std::path::Path) -> Result<()> {
    let mut text = String::from("freq tor tmom tx ty tz ror rmom rx ry rz\n");
    for (f, s) in FREQUENCIES.iter().zip(SEPARATIONS.iter()) {
        text.push_str(&format!("{f} z 1 0 0 0 z 1 {s} 0 0\n"));
    }
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.conductivities.is_empty() {
        bail!("need at least one conductivity");
    }
    if args.depths.len() + 1 != args.conductivities.len() {
        bail!(
            "expected {} interface depths for {} conductivities, got {}",
            args.conductivities.len() - 1,
            args.conductivities.len(),
            args.depths.len()
        );
    }
    if args.conductivities.iter().any(|&c| c <= 0.0) {
        bail!("conductivities must be positive");
    }

    let system = build_system()?;
    let thicknesses: Vec<f64> = {
        let mut t = Vec::with_capacity(args.depths.len());
        let mut previous = 0.0;
        for &d in &args.depths {
            if d <= previous {
                bail!("interface depths must increase strictly");
            }
            t.push(d - previous);
            previous = d;
        }
        t
    };

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let unit = Normal::new(0.0, 1.0).expect("unit normal");

    let response = forward::forward(&system, &args.conductivities, &thicknesses, FLIGHT_HEIGHT)
        .context("forward modelling the true earth")?;

    let n_freq = system.n_frequencies();
    let mut datapoints = Vec::with_capacity(args.soundings);
    for i in 0..args.soundings {
        let mut data = vec![0.0; 2 * n_freq];
        for (j, v) in response.iter().enumerate() {
            data[j] = v.re;
            data[n_freq + j] = v.im;
        }
        let std: Vec<f64> = data
            .iter()
            .map(|d| (args.noise * d.abs()).max(args.floor))
            .collect();
        for (d, s) in data.iter_mut().zip(&std) {
            *d += s * unit.sample(&mut rng);
        }

        datapoints.push(FdemDataPoint::new(
            system.clone(),
            args.line,
            (i + 1) as f64,
            50.0 * i as f64,
            0.0,
            FLIGHT_HEIGHT,
            0.0,
            data,
            std,
        )?);
    }

    let csv_path = args.output_dir.join("soundings.csv");
    write_soundings(&csv_path, &datapoints)?;
    write_system_file(&args.output_dir.join("system.stm"))?;

    println!(
        "wrote {} soundings to {} (true model: {:?} S/m at {:?} m)",
        datapoints.len(),
        csv_path.display(),
        args.conductivities,
        args.depths
    );
    Ok(())
}
