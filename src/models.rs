//! Shared models and types
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Classification label for one frame
///
/// Serialized with the strings the dashboard already displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    /// White spot syndrome virus detected
    #[serde(rename = "WSSV DETECTED")]
    Wssv,
    /// Healthy shrimp
    #[serde(rename = "Healthy Shrimp")]
    Healthy,
    /// Model is uncertain or no shrimp in frame
    #[serde(rename = "No Shrimp")]
    NoSubject,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Wssv => "WSSV DETECTED",
            Label::Healthy => "Healthy Shrimp",
            Label::NoSubject => "No Shrimp",
        }
    }

    /// Persistence kind for this label; NoSubject has none
    pub fn kind(&self) -> Option<SnapshotKind> {
        match self {
            Label::Wssv => Some(SnapshotKind::Wssv),
            Label::Healthy => Some(SnapshotKind::Healthy),
            Label::NoSubject => None,
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot collection kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Wssv,
    Healthy,
}

impl SnapshotKind {
    pub const ALL: [SnapshotKind; 2] = [SnapshotKind::Wssv, SnapshotKind::Healthy];

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Wssv => "wssv",
            SnapshotKind::Healthy => "healthy",
        }
    }

    /// Backing table for this kind
    pub fn table(&self) -> &'static str {
        match self {
            SnapshotKind::Wssv => "wssv_snaps",
            SnapshotKind::Healthy => "healthy_snaps",
        }
    }
}

impl FromStr for SnapshotKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wssv" => Ok(SnapshotKind::Wssv),
            "healthy" => Ok(SnapshotKind::Healthy),
            other => Err(Error::Validation(format!("Invalid kind: {}", other))),
        }
    }
}

impl std::fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest classification result published by the capture loop
///
/// The default value is the neutral record shown before the first frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: Option<Label>,
    /// None when inference failed for the frame
    pub confidence: Option<f32>,
    #[serde(rename = "timestamp")]
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(rename = "snapshot_saved")]
    pub persisted: bool,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub monitoring: bool,
    pub camera_index: Option<u32>,
    pub inference_connected: bool,
    pub storage_configured: bool,
}
