//! CrustaScope Server Library
//!
//! Edge server for shrimp health monitoring: camera capture, WSSV
//! classification, snapshot gallery and live water-quality readings.
//!
//! ## Architecture (Components)
//!
//! 1. CameraDevice - Local camera frames via ffmpeg
//! 2. Classifier - Frame to label (WSSV / Healthy / No Shrimp)
//! 3. InferenceClient - Model-serving adapter
//! 4. SensorReader - Latest water-quality document
//! 5. SnapshotStore - Cooldown-gated persistence and gallery
//! 6. CaptureLoop - Capture, classify, publish
//! 7. FrameHub - Live stream fan-out
//! 8. MonitoringController - Session lifecycle
//! 9. WebAPI - REST API endpoints
//!
//! ## Design Principles
//!
//! - One active session; the session owns the device
//! - Loop-internal failures are logged, never fatal to the process
//! - Storage is optional; without it the server runs without persistence

pub mod camera_device;
pub mod capture_loop;
pub mod classifier;
pub mod error;
pub mod frame_annotator;
pub mod frame_hub;
pub mod image_codec;
pub mod inference_client;
pub mod models;
pub mod monitoring_controller;
pub mod sensor_reader;
pub mod snapshot_store;
pub mod state;
pub mod web_api;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use state::AppState;
