//! Result record storage
//!
//! Persists completed inversion records to an embedded sled tree keyed
//! by fiducial, so a whole survey line lands in one database with
//! natural ordering. Values are JSON-serialised records; each datapoint
//! owns a disjoint key, so concurrent workers never alias writes.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::inversion::InversionRecord;

/// Errors raised by the result store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no record stored for fiducial {0}")]
    NotFound(f64),
}

/// Store for per-datapoint inversion records.
///
/// Keys are the fiducial's IEEE-754 bit pattern in big-endian byte
/// order, which sorts identically to the (non-negative) fiducial values
/// themselves.
#[derive(Clone)]
pub struct ResultStore {
    db: Arc<sled::Db>,
}

impl ResultStore {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn key(fiducial: f64) -> [u8; 8] {
        fiducial.to_bits().to_be_bytes()
    }

    /// Insert or replace the record for its fiducial.
    pub fn put(&self, record: &InversionRecord) -> Result<(), StorageError> {
        let value = serde_json::to_vec(record)?;
        self.db.insert(Self::key(record.fiducial), value)?;
        Ok(())
    }

    /// Fetch the record for a fiducial.
    pub fn get(&self, fiducial: f64) -> Result<InversionRecord, StorageError> {
        let bytes = self
            .db
            .get(Self::key(fiducial))?
            .ok_or(StorageError::NotFound(fiducial))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// All stored fiducials in ascending order.
    pub fn fiducials(&self) -> Vec<f64> {
        self.db
            .iter()
            .keys()
            .filter_map(|k| k.ok())
            .filter(|k| k.len() == 8)
            .map(|k| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&k);
                f64::from_bits(u64::from_be_bytes(bytes))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Flush outstanding writes to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
