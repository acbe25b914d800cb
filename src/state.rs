//! Application state
//!
//! Holds all shared components and state

use crate::camera_device::{CameraOpener, FfmpegCameraConfig};
use crate::capture_loop::ClassificationPipeline;
use crate::classifier::{Classifier, InferenceEngine};
use crate::frame_hub::DEFAULT_BUFFER_FRAMES;
use crate::image_codec::DEFAULT_JPEG_QUALITY;
use crate::monitoring_controller::{ControllerConfig, MonitoringController};
use crate::sensor_reader::SensorReader;
use crate::snapshot_store::{SnapshotRepository, SnapshotStore, DEFAULT_COOLDOWN_SECS};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Dashboard dev-server origins allowed by default
const DEFAULT_CORS_ORIGINS: [&str; 4] = [
    "http://localhost:5173",
    "http://127.0.0.1:5173",
    "http://localhost:5174",
    "http://127.0.0.1:5174",
];

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Snapshot database; None runs without persistence
    pub database_url: Option<String>,
    /// Model-serving base URL
    pub inference_url: String,
    pub model_name: String,
    pub inference_timeout: Duration,
    /// Minimum spacing between persisted snapshots
    pub snap_cooldown: Duration,
    /// Sensor document written by the water-quality publisher
    pub latest_sensor_json: PathBuf,
    pub camera: FfmpegCameraConfig,
    pub jpeg_quality: u8,
    /// Per-subscriber frame queue on the live stream
    pub stream_buffer_frames: usize,
    pub cors_allowed_origins: Vec<String>,
    /// Dashboard build to serve as fallback
    pub static_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let camera_defaults = FfmpegCameraConfig::default();

        let cooldown_secs: f64 = env_or("SNAP_COOLDOWN_SECONDS", DEFAULT_COOLDOWN_SECS);
        let snap_cooldown = if cooldown_secs.is_finite() && cooldown_secs >= 0.0 {
            Duration::from_secs_f64(cooldown_secs)
        } else {
            Duration::from_secs_f64(DEFAULT_COOLDOWN_SECS)
        };

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 8000),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            inference_url: std::env::var("INFERENCE_URL")
                .unwrap_or_else(|_| "http://localhost:8501".to_string()),
            model_name: std::env::var("MODEL_NAME").unwrap_or_else(|_| "crustascope".to_string()),
            inference_timeout: Duration::from_millis(env_or("INFERENCE_TIMEOUT_MS", 5000)),
            snap_cooldown,
            latest_sensor_json: std::env::var("LATEST_SENSOR_JSON")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("latest_sensor.json")),
            camera: FfmpegCameraConfig {
                input_format: std::env::var("CAMERA_INPUT_FORMAT")
                    .unwrap_or(camera_defaults.input_format),
                input_template: std::env::var("CAMERA_INPUT_TEMPLATE")
                    .unwrap_or(camera_defaults.input_template),
                open_timeout: Duration::from_millis(env_or("CAMERA_OPEN_TIMEOUT_MS", 10_000)),
                read_timeout: Duration::from_millis(env_or("CAMERA_READ_TIMEOUT_MS", 5_000)),
                probe_max: env_or("CAMERA_PROBE_MAX", camera_defaults.probe_max),
            },
            jpeg_quality: env_or("JPEG_QUALITY", DEFAULT_JPEG_QUALITY).clamp(1, 100),
            stream_buffer_frames: env_or("STREAM_BUFFER_FRAMES", DEFAULT_BUFFER_FRAMES).max(1),
            cors_allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect()),
            static_dir: std::env::var("STATIC_DIR").ok().map(PathBuf::from),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// MonitoringController (session lifecycle, status, live stream)
    pub controller: Arc<MonitoringController>,
    /// Classify + maybe-persist, shared with uploads
    pub pipeline: Arc<ClassificationPipeline>,
    /// SnapshotStore (gallery)
    pub snapshot_store: Arc<SnapshotStore>,
    /// SensorReader (latest water-quality reading)
    pub sensor_reader: Arc<SensorReader>,
    /// Inference engine (model-serving adapter)
    pub inference: Arc<dyn InferenceEngine>,
    /// Camera opener (ffmpeg)
    pub camera_opener: Arc<dyn CameraOpener>,
}

impl AppState {
    /// Wire components together
    ///
    /// `repository` is None when no database is configured or reachable.
    pub fn build(
        config: AppConfig,
        inference: Arc<dyn InferenceEngine>,
        camera_opener: Arc<dyn CameraOpener>,
        repository: Option<Arc<dyn SnapshotRepository>>,
    ) -> Self {
        let sensor_reader = Arc::new(SensorReader::new(config.latest_sensor_json.clone()));

        let snapshot_store = Arc::new(SnapshotStore::new(
            repository,
            sensor_reader.clone(),
            config.snap_cooldown,
            config.jpeg_quality,
        ));

        let classifier = Arc::new(Classifier::new(inference.clone()));
        let pipeline = Arc::new(ClassificationPipeline::new(classifier, snapshot_store.clone()));

        let controller = Arc::new(MonitoringController::new(
            camera_opener.clone(),
            pipeline.clone(),
            ControllerConfig {
                jpeg_quality: config.jpeg_quality,
                stream_buffer_frames: config.stream_buffer_frames,
            },
        ));

        Self {
            config,
            controller,
            pipeline,
            snapshot_store,
            sensor_reader,
            inference,
            camera_opener,
        }
    }
}
