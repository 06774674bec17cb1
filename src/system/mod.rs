//! Frequency-domain EM acquisition system
//!
//! Describes the airborne instrument: measurement frequencies and, per
//! frequency, a transmitter and receiver loop pair. Precomputes the
//! Hankel filter abscissae once per system so the forward kernel never
//! touches a `powf` in its hot loop.
//!
//! System files are whitespace-column text with a header line:
//!
//! ```text
//! freq  tor tmom  tx ty tz  ror rmom  rx ry rz
//! 380   z   1     0  0  0   z   1     7.93 0 0
//! 1776  z   1     0  0  0   z   1     7.91 0 0
//! ```

pub mod hankel;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building or reading an acquisition system
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("cannot read system file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("system file {path} line {line}: {reason}")]
    Parse {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("system file header must contain 'freq'")]
    MissingHeader,

    #[error("transmitter and receiver loops are coincident at frequency {0} Hz")]
    CoincidentLoops(f64),

    #[error("unsupported loop orientation pair {0} (supported: xx, yy, zz, xz, zx)")]
    UnsupportedGeometry(TensorComponent),

    #[error("system has no frequencies")]
    Empty,
}

/// Loop dipole orientation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Orientation {
    X,
    Y,
    Z,
}

impl Orientation {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "x" => Some(Self::X),
            "y" => Some(Self::Y),
            "z" => Some(Self::Z),
            _ => None,
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => write!(f, "x"),
            Self::Y => write!(f, "y"),
            Self::Z => write!(f, "z"),
        }
    }
}

/// One transmitter or receiver loop, reduced to a dipole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircularLoop {
    pub orientation: Orientation,
    /// Dipole moment scaling
    pub moment: f64,
    /// Offsets from the observation location (m)
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Attitude angles (degrees); zero for rigid-boom systems
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

impl CircularLoop {
    pub fn new(orientation: Orientation, moment: f64, x: f64, y: f64, z: f64) -> Self {
        Self {
            orientation,
            moment,
            x,
            y,
            z,
            pitch: 0.0,
            roll: 0.0,
            yaw: 0.0,
        }
    }
}

/// Transmitter/receiver orientation pair, indexed the classic way:
/// the 9 tensor components xx..zz.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TensorComponent {
    Xx,
    Xy,
    Xz,
    Yx,
    Yy,
    Yz,
    Zx,
    Zy,
    Zz,
}

impl TensorComponent {
    pub fn of(tx: Orientation, rx: Orientation) -> Self {
        use Orientation::{X, Y, Z};
        match (tx, rx) {
            (X, X) => Self::Xx,
            (X, Y) => Self::Xy,
            (X, Z) => Self::Xz,
            (Y, X) => Self::Yx,
            (Y, Y) => Self::Yy,
            (Y, Z) => Self::Yz,
            (Z, X) => Self::Zx,
            (Z, Y) => Self::Zy,
            (Z, Z) => Self::Zz,
        }
    }

    /// Index 1..=9 matching the historical tensor numbering.
    pub fn index(&self) -> u8 {
        match self {
            Self::Xx => 1,
            Self::Xy => 2,
            Self::Xz => 3,
            Self::Yx => 4,
            Self::Yy => 5,
            Self::Yz => 6,
            Self::Zx => 7,
            Self::Zy => 8,
            Self::Zz => 9,
        }
    }

    /// Whether the forward kernel implements this component. The
    /// cross-line couplings (xy, yx, yz, zy) vanish for in-line booms
    /// and no production airborne FDEM system measures them.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Xx | Self::Yy | Self::Zz | Self::Xz | Self::Zx)
    }
}

impl fmt::Display for TensorComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Xx => "xx",
            Self::Xy => "xy",
            Self::Xz => "xz",
            Self::Yx => "yx",
            Self::Yy => "yy",
            Self::Yz => "yz",
            Self::Zx => "zx",
            Self::Zy => "zy",
            Self::Zz => "zz",
        };
        write!(f, "{s}")
    }
}

/// A frequency-domain EM acquisition system.
///
/// Immutable once built; shared between datapoints behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FdemSystem {
    frequencies: Vec<f64>,
    transmitters: Vec<CircularLoop>,
    receivers: Vec<CircularLoop>,
    separations: Vec<f64>,
    components: Vec<TensorComponent>,
    // Hankel abscissae and their squares, one row per frequency
    lambda0: Vec<Vec<f64>>,
    lambda0_sq: Vec<Vec<f64>>,
    lambda1: Vec<Vec<f64>>,
    lambda1_sq: Vec<Vec<f64>>,
}

impl FdemSystem {
    pub fn new(
        frequencies: Vec<f64>,
        transmitters: Vec<CircularLoop>,
        receivers: Vec<CircularLoop>,
    ) -> Result<Self, SystemError> {
        if frequencies.is_empty() {
            return Err(SystemError::Empty);
        }
        debug_assert_eq!(frequencies.len(), transmitters.len());
        debug_assert_eq!(frequencies.len(), receivers.len());

        let mut separations = Vec::with_capacity(frequencies.len());
        let mut components = Vec::with_capacity(frequencies.len());
        for ((t, r), &f) in transmitters.iter().zip(&receivers).zip(&frequencies) {
            let dx = r.x - t.x;
            let dy = r.y - t.y;
            let dz = r.z - t.z;
            let sep = (dx * dx + dy * dy + dz * dz).sqrt();
            if sep <= 0.0 {
                return Err(SystemError::CoincidentLoops(f));
            }
            let component = TensorComponent::of(t.orientation, r.orientation);
            if !component.is_supported() {
                return Err(SystemError::UnsupportedGeometry(component));
            }
            separations.push(sep);
            components.push(component);
        }

        let lambda0: Vec<Vec<f64>> = separations
            .iter()
            .map(|&r| hankel::lambda0(r).to_vec())
            .collect();
        let lambda1: Vec<Vec<f64>> = separations
            .iter()
            .map(|&r| hankel::lambda1(r).to_vec())
            .collect();
        let lambda0_sq = lambda0
            .iter()
            .map(|row| row.iter().map(|l| l * l).collect())
            .collect();
        let lambda1_sq = lambda1
            .iter()
            .map(|row| row.iter().map(|l| l * l).collect())
            .collect();

        Ok(Self {
            frequencies,
            transmitters,
            receivers,
            separations,
            components,
            lambda0,
            lambda0_sq,
            lambda1,
            lambda1_sq,
        })
    }

    /// Read a system file (see module docs for the format).
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, SystemError> {
        let path_str = path.as_ref().display().to_string();
        let text = std::fs::read_to_string(&path).map_err(|source| SystemError::Io {
            path: path_str.clone(),
            source,
        })?;

        let mut lines = text.lines().enumerate();
        let header = lines
            .next()
            .map(|(_, l)| l.to_ascii_lowercase())
            .unwrap_or_default();
        if !header.contains("freq") {
            return Err(SystemError::MissingHeader);
        }

        let mut frequencies = Vec::new();
        let mut transmitters = Vec::new();
        let mut receivers = Vec::new();

        for (line_no, line) in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            if fields.len() != 11 {
                return Err(SystemError::Parse {
                    path: path_str.clone(),
                    line: line_no + 1,
                    reason: format!("expected 11 columns, found {}", fields.len()),
                });
            }
            let parse_f64 = |s: &str, what: &str| -> Result<f64, SystemError> {
                s.parse::<f64>().map_err(|_| SystemError::Parse {
                    path: path_str.clone(),
                    line: line_no + 1,
                    reason: format!("invalid {what}: '{s}'"),
                })
            };
            let parse_orient = |s: &str| -> Result<Orientation, SystemError> {
                Orientation::parse(s).ok_or_else(|| SystemError::Parse {
                    path: path_str.clone(),
                    line: line_no + 1,
                    reason: format!("invalid orientation: '{s}'"),
                })
            };

            frequencies.push(parse_f64(fields[0], "frequency")?);
            transmitters.push(CircularLoop::new(
                parse_orient(fields[1])?,
                parse_f64(fields[2], "transmitter moment")?,
                parse_f64(fields[3], "transmitter x")?,
                parse_f64(fields[4], "transmitter y")?,
                parse_f64(fields[5], "transmitter z")?,
            ));
            receivers.push(CircularLoop::new(
                parse_orient(fields[6])?,
                parse_f64(fields[7], "receiver moment")?,
                parse_f64(fields[8], "receiver x")?,
                parse_f64(fields[9], "receiver y")?,
                parse_f64(fields[10], "receiver z")?,
            ));
        }

        Self::new(frequencies, transmitters, receivers)
    }

    pub fn n_frequencies(&self) -> usize {
        self.frequencies.len()
    }

    /// Total data channels: in-phase then quadrature per frequency.
    pub fn n_channels(&self) -> usize {
        2 * self.frequencies.len()
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn transmitter(&self, i: usize) -> &CircularLoop {
        &self.transmitters[i]
    }

    pub fn receiver(&self, i: usize) -> &CircularLoop {
        &self.receivers[i]
    }

    pub fn separation(&self, i: usize) -> f64 {
        self.separations[i]
    }

    pub fn component(&self, i: usize) -> TensorComponent {
        self.components[i]
    }

    pub fn lambda0(&self, i: usize) -> &[f64] {
        &self.lambda0[i]
    }

    pub fn lambda0_sq(&self, i: usize) -> &[f64] {
        &self.lambda0_sq[i]
    }

    pub fn lambda1(&self, i: usize) -> &[f64] {
        &self.lambda1[i]
    }

    pub fn lambda1_sq(&self, i: usize) -> &[f64] {
        &self.lambda1_sq[i]
    }

    /// Human-readable channel names, in-phase block then quadrature.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .frequencies
            .iter()
            .map(|f| format!("In-Phase {f} (Hz)"))
            .collect();
        names.extend(
            self.frequencies
                .iter()
                .map(|f| format!("Quadrature {f} (Hz)")),
        );
        names
    }
}
