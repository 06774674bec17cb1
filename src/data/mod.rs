//! Sounding dataset I/O
//!
//! Reads airborne sounding CSVs with one row per measurement location:
//! `line, fiducial, x, y, z, elevation, d_1..d_C, std_1..std_C`.
//! Rows that cannot form a valid datapoint (no live channels, bad
//! uncertainties) are skipped and reported, not fatal: the driver
//! records them as failed fiducials.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::datapoint::FdemDataPoint;
use crate::system::FdemSystem;

/// Errors raised while reading or writing sounding files
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("cannot open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("{path} row {row}: expected {expected} columns, found {got}")]
    ColumnCount {
        path: String,
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("{path} row {row}: invalid number in column {column}")]
    BadNumber {
        path: String,
        row: usize,
        column: usize,
    },

    #[error("{path} contains no soundings")]
    Empty { path: String },
}

/// The outcome of loading a sounding file: constructed datapoints plus
/// the fiducials of rows that had to be skipped.
pub struct SoundingSet {
    pub datapoints: Vec<FdemDataPoint>,
    pub skipped: Vec<(f64, String)>,
}

/// Read a sounding CSV against a known acquisition system.
pub fn read_soundings<P: AsRef<Path>>(
    path: P,
    system: &Arc<FdemSystem>,
) -> Result<SoundingSet, DatasetError> {
    let path_str = path.as_ref().display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(&path)
        .map_err(|e| map_csv_error(&path_str, e))?;

    let n_channels = system.n_channels();
    let expected = 6 + 2 * n_channels;

    let mut datapoints = Vec::new();
    let mut skipped = Vec::new();

    for (row_idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| map_csv_error(&path_str, e))?;
        let row = row_idx + 2; // one-based, after the header
        if record.len() != expected {
            return Err(DatasetError::ColumnCount {
                path: path_str,
                row,
                expected,
                got: record.len(),
            });
        }

        let field = |column: usize| -> Result<f64, DatasetError> {
            let raw = record.get(column).unwrap_or("");
            if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
                return Ok(f64::NAN);
            }
            raw.parse::<f64>().map_err(|_| DatasetError::BadNumber {
                path: path_str.clone(),
                row,
                column: column + 1,
            })
        };

        let line_number = field(0)?;
        let fiducial = field(1)?;
        let x = field(2)?;
        let y = field(3)?;
        let z = field(4)?;
        let elevation = field(5)?;
        let mut data = Vec::with_capacity(n_channels);
        let mut std = Vec::with_capacity(n_channels);
        for c in 0..n_channels {
            data.push(field(6 + c)?);
        }
        for c in 0..n_channels {
            std.push(field(6 + n_channels + c)?);
        }

        match FdemDataPoint::new(
            system.clone(),
            line_number,
            fiducial,
            x,
            y,
            z,
            elevation,
            data,
            std,
        ) {
            Ok(dp) => datapoints.push(dp),
            Err(e) => {
                warn!(fiducial, row, "skipping sounding: {e}");
                skipped.push((fiducial, e.to_string()));
            }
        }
    }

    if datapoints.is_empty() && skipped.is_empty() {
        return Err(DatasetError::Empty { path: path_str });
    }
    Ok(SoundingSet {
        datapoints,
        skipped,
    })
}

/// Write soundings in the same layout `read_soundings` expects. Used by
/// the synthetic-data generator and the round-trip tests.
pub fn write_soundings<P: AsRef<Path>>(
    path: P,
    datapoints: &[FdemDataPoint],
) -> Result<(), DatasetError> {
    let path_str = path.as_ref().display().to_string();
    let mut writer = csv::Writer::from_path(&path).map_err(|e| map_csv_error(&path_str, e))?;

    if let Some(first) = datapoints.first() {
        let mut header = vec![
            "line".to_string(),
            "fiducial".to_string(),
            "x".to_string(),
            "y".to_string(),
            "z".to_string(),
            "elevation".to_string(),
        ];
        for i in 0..first.n_channels() {
            header.push(format!("d_{}", i + 1));
        }
        for i in 0..first.n_channels() {
            header.push(format!("std_{}", i + 1));
        }
        writer
            .write_record(&header)
            .map_err(|e| map_csv_error(&path_str, e))?;
    }

    for dp in datapoints {
        let mut record = vec![
            dp.line_number.to_string(),
            dp.fiducial.to_string(),
            dp.x.to_string(),
            dp.y.to_string(),
            dp.height.scalar_value().to_string(),
            dp.elevation.to_string(),
        ];
        record.extend(dp.data().iter().map(|v| v.to_string()));
        record.extend(dp.std().iter().map(|v| v.to_string()));
        writer
            .write_record(&record)
            .map_err(|e| map_csv_error(&path_str, e))?;
    }
    writer.flush().map_err(|source| DatasetError::Io {
        path: path_str,
        source,
    })?;
    Ok(())
}

fn map_csv_error(path: &str, e: csv::Error) -> DatasetError {
    DatasetError::Csv {
        path: path.to_string(),
        source: e,
    }
}
