//! MonitoringController - Session Lifecycle
//!
//! ## Responsibilities
//!
//! - Start a monitoring session on one camera (single active session)
//! - Stop the session and wait for the device to be released
//! - Expose the latest classification status and the live stream
//!
//! Start and stop are serialized by one session lock. A session whose loop
//! ended on its own (device failure) is reaped on the next start.

use crate::camera_device::CameraOpener;
use crate::capture_loop::{CaptureLoop, ClassificationPipeline, LoopExit, SharedStatus};
use crate::error::{Error, Result};
use crate::frame_hub::FrameHub;
use crate::models::ClassificationResult;
use axum::body::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Start result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub status: StartStatus,
    pub camera_index: u32,
}

/// One start-to-stop lifetime
struct Session {
    camera_index: u32,
    cancel: CancellationToken,
    handle: JoinHandle<LoopExit>,
    hub: Arc<FrameHub>,
}

impl Session {
    fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Controller settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub jpeg_quality: u8,
    pub stream_buffer_frames: usize,
}

/// MonitoringController instance
pub struct MonitoringController {
    opener: Arc<dyn CameraOpener>,
    pipeline: Arc<ClassificationPipeline>,
    status: SharedStatus,
    session: Mutex<Option<Session>>,
    config: ControllerConfig,
}

impl MonitoringController {
    /// Create new MonitoringController
    pub fn new(
        opener: Arc<dyn CameraOpener>,
        pipeline: Arc<ClassificationPipeline>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            opener,
            pipeline,
            status: SharedStatus::default(),
            session: Mutex::new(None),
            config,
        }
    }

    /// Start monitoring on a camera
    ///
    /// Idempotent while a session is active: no second device is opened and
    /// the running camera index is reported.
    pub async fn start(&self, camera_index: u32) -> Result<StartOutcome> {
        let mut session = self.session.lock().await;

        if let Some(current) = session.as_ref() {
            if current.is_active() {
                tracing::info!(
                    camera_index = current.camera_index,
                    requested = camera_index,
                    "Monitoring already running"
                );
                return Ok(StartOutcome {
                    status: StartStatus::AlreadyRunning,
                    camera_index: current.camera_index,
                });
            }
        }

        if let Some(finished) = session.take() {
            reap(finished).await;
        }

        let device = self.opener.open(camera_index).await.map_err(|e| match e {
            Error::DeviceUnavailable(msg) => Error::DeviceUnavailable(msg),
            other => Error::DeviceUnavailable(other.to_string()),
        })?;

        *self.status.write().await = ClassificationResult::default();

        let hub = Arc::new(FrameHub::new(self.config.stream_buffer_frames));
        let cancel = CancellationToken::new();
        let capture = CaptureLoop::new(
            device,
            camera_index,
            self.pipeline.clone(),
            self.status.clone(),
            hub.clone(),
            self.config.jpeg_quality,
        );
        let handle = tokio::spawn(capture.run(cancel.clone()));

        *session = Some(Session {
            camera_index,
            cancel,
            handle,
            hub,
        });

        tracing::info!(camera_index = camera_index, "Monitoring started");
        Ok(StartOutcome {
            status: StartStatus::Started,
            camera_index,
        })
    }

    /// Stop monitoring; a no-op without a session
    ///
    /// Returns once the loop has released the device.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;

        match session.take() {
            Some(current) => {
                let camera_index = current.camera_index;
                current.cancel.cancel();
                reap(current).await;
                tracing::info!(camera_index = camera_index, "Monitoring stopped");
            }
            None => tracing::debug!("Stop requested with no active session"),
        }
    }

    /// Latest classification result
    pub async fn status(&self) -> ClassificationResult {
        self.status.read().await.clone()
    }

    /// Camera index of the active session
    pub async fn active_camera(&self) -> Option<u32> {
        let session = self.session.lock().await;
        session
            .as_ref()
            .filter(|s| s.is_active())
            .map(|s| s.camera_index)
    }

    /// Join the live stream of the active session
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<Bytes>> {
        let session = self.session.lock().await;
        session
            .as_ref()
            .filter(|s| s.is_active())
            .and_then(|s| s.hub.subscribe())
            .map(|(_, rx)| rx)
            .ok_or_else(|| Error::NotStarted("Monitoring not started".to_string()))
    }
}

/// Wait for a session's loop to finish
async fn reap(session: Session) {
    match session.handle.await {
        Ok(exit) => {
            tracing::debug!(camera_index = session.camera_index, exit = ?exit, "Session ended");
        }
        Err(e) => {
            // Loop panicked; the device went with the task
            session.hub.close();
            tracing::error!(camera_index = session.camera_index, error = %e, "Capture task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use crate::models::Label;
    use crate::sensor_reader::SensorReader;
    use crate::snapshot_store::SnapshotStore;
    use crate::testing::{FakeOpener, FixedEngine};
    use std::time::Duration;

    fn controller(opener: Arc<FakeOpener>, score: f32) -> MonitoringController {
        let store = SnapshotStore::new(
            None,
            Arc::new(SensorReader::new("/nonexistent/latest_sensor.json")),
            Duration::from_secs(10),
            80,
        );
        let pipeline = ClassificationPipeline::new(
            Arc::new(Classifier::new(Arc::new(FixedEngine::new(vec![score])))),
            Arc::new(store),
        );
        MonitoringController::new(
            opener,
            Arc::new(pipeline),
            ControllerConfig {
                jpeg_quality: 80,
                stream_buffer_frames: 4,
            },
        )
    }

    #[tokio::test]
    async fn test_second_start_is_already_running() {
        let opener = Arc::new(FakeOpener::endless());
        let controller = controller(opener.clone(), 0.5);

        let first = controller.start(0).await.unwrap();
        assert_eq!(first.status, StartStatus::Started);

        let second = controller.start(1).await.unwrap();
        assert_eq!(
            second,
            StartOutcome {
                status: StartStatus::AlreadyRunning,
                camera_index: 0
            }
        );
        assert_eq!(opener.opens(), 1);
        assert_eq!(controller.active_camera().await, Some(0));

        controller.stop().await;
        assert_eq!(opener.releases(), 1);
        assert_eq!(controller.active_camera().await, None);
    }

    #[tokio::test]
    async fn test_stop_without_session() {
        let controller = controller(Arc::new(FakeOpener::endless()), 0.5);
        controller.stop().await;
        controller.stop().await;
        assert_eq!(controller.active_camera().await, None);
    }

    #[tokio::test]
    async fn test_open_failure_is_device_unavailable() {
        let opener = Arc::new(FakeOpener::endless().fail_index(3));
        let controller = controller(opener, 0.5);

        assert!(matches!(controller.start(3).await, Err(Error::DeviceUnavailable(_))));
        assert_eq!(controller.active_camera().await, None);
        assert!(matches!(controller.subscribe().await, Err(Error::NotStarted(_))));
    }

    #[tokio::test]
    async fn test_stream_ends_on_stop() {
        let controller = controller(Arc::new(FakeOpener::endless()), 0.9);
        controller.start(0).await.unwrap();

        let mut rx = controller.subscribe().await.unwrap();
        assert!(rx.recv().await.is_some());

        controller.stop().await;
        // Drain whatever was queued; the stream must end
        while rx.recv().await.is_some() {}

        assert!(matches!(controller.subscribe().await, Err(Error::NotStarted(_))));
        // Last known result survives stop
        assert_eq!(controller.status().await.label, Some(Label::Wssv));
    }

    #[tokio::test]
    async fn test_restart_after_device_failure() {
        let opener = Arc::new(FakeOpener::failing_after(2));
        let controller = controller(opener.clone(), 0.1);

        controller.start(0).await.unwrap();
        while controller.active_camera().await.is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(opener.releases(), 1);
        assert_eq!(controller.status().await.label, Some(Label::Healthy));

        let outcome = controller.start(1).await.unwrap();
        assert_eq!(outcome.status, StartStatus::Started);
        assert_eq!(outcome.camera_index, 1);
        assert_eq!(opener.opens(), 2);

        controller.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_start_stop_single_session() {
        let opener = Arc::new(FakeOpener::endless());
        let controller = Arc::new(controller(opener.clone(), 0.5));

        let tasks: Vec<_> = (0..16u32)
            .map(|i| {
                let controller = controller.clone();
                tokio::spawn(async move {
                    if i % 3 == 0 {
                        controller.stop().await;
                    } else {
                        controller.start(i).await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        controller.stop().await;

        assert!(opener.opens() >= 1);
        assert_eq!(opener.opens(), opener.releases());
        assert_eq!(opener.max_open_at_once(), 1);
        assert_eq!(controller.active_camera().await, None);
    }
}
