//! Snapshot Store types

use crate::error::{Error, Result};
use crate::models::{Label, SnapshotKind};
use crate::sensor_reader::SensorSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored image format
pub const IMAGE_FORMAT_JPG: &str = "jpg";

/// Record about to be inserted
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub kind: SnapshotKind,
    pub label: Label,
    pub confidence: f32,
    pub camera_index: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub image_bytes: Vec<u8>,
    pub image_format: String,
    pub sensor_at_capture: Option<SensorSnapshot>,
}

/// Persisted record, including the image
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    pub id: Uuid,
    pub kind: SnapshotKind,
    pub label: String,
    pub confidence: f64,
    pub camera_index: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub image_bytes: Vec<u8>,
    pub image_format: String,
    pub sensor_at_capture: Option<SensorSnapshot>,
}

/// Persisted record without the image (gallery listing)
#[derive(Debug, Clone)]
pub struct SnapshotSummary {
    pub id: Uuid,
    pub label: String,
    pub confidence: f64,
    pub camera_index: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub sensor_at_capture: Option<SensorSnapshot>,
}

/// Sensor fields shown next to a gallery item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GallerySensor {
    pub temperature_c: Option<f64>,
    pub ph: Option<f64>,
    pub turbidity: Option<f64>,
    pub tds: Option<f64>,
}

/// Gallery list item (wire format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryItem {
    pub id: String,
    pub label: String,
    pub confidence: f64,
    pub camera_index: Option<i32>,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub sensor: GallerySensor,
}

impl From<SnapshotSummary> for GalleryItem {
    fn from(s: SnapshotSummary) -> Self {
        let sensor = s
            .sensor_at_capture
            .map(|sensor| GallerySensor {
                temperature_c: sensor.temperature_c,
                ph: sensor.ph,
                turbidity: sensor.turbidity,
                tds: sensor.tds,
            })
            .unwrap_or_default();

        Self {
            id: s.id.to_string(),
            label: s.label,
            confidence: s.confidence,
            camera_index: s.camera_index,
            timestamp: s.created_at,
            created_at: s.created_at,
            sensor,
        }
    }
}

/// Download format for gallery images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFormat {
    Jpg,
    Jpeg,
    Png,
}

impl DownloadFormat {
    /// Parse the `fmt` query value; anything unknown falls back to jpg
    pub fn parse(fmt: Option<&str>) -> Self {
        match fmt.map(|f| f.to_ascii_lowercase()).as_deref() {
            Some("png") => DownloadFormat::Png,
            Some("jpeg") => DownloadFormat::Jpeg,
            _ => DownloadFormat::Jpg,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DownloadFormat::Jpg => "jpg",
            DownloadFormat::Jpeg => "jpeg",
            DownloadFormat::Png => "png",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            DownloadFormat::Jpg | DownloadFormat::Jpeg => "image/jpeg",
            DownloadFormat::Png => "image/png",
        }
    }
}

/// Parse a record id from a path segment
pub fn parse_snapshot_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| Error::Validation(format!("Invalid snap id: {}", id)))
}
