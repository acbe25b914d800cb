//! SensorReader - Latest Water-Quality Reading
//!
//! ## Responsibilities
//!
//! - Read the JSON document the sensor acquisition process overwrites
//! - Treat a missing or corrupt document as "no sensor data"
//!
//! The document is re-read on every call; the publisher rewrites it every
//! couple of seconds and reads are rare compared to the frame rate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// One environmental reading
///
/// `timestamp` is kept as the publisher wrote it (local ISO-8601 without
/// offset in the field deployment).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub ph: Option<f64>,
    #[serde(default)]
    pub turbidity: Option<f64>,
    #[serde(default)]
    pub tds: Option<f64>,
}

/// Reader for the externally published sensor document
pub struct SensorReader {
    path: PathBuf,
}

impl SensorReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the latest snapshot, or None if absent/unparsable
    pub async fn read_latest(&self) -> Option<SensorSnapshot> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::trace!(path = %self.path.display(), "Sensor document not present");
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not read sensor document"
                );
                return None;
            }
        };

        match serde_json::from_slice::<SensorSnapshot>(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not parse sensor document"
                );
                None
            }
        }
    }
}
