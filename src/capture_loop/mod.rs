//! CaptureLoop - Capture, Classify, Publish
//!
//! ## Responsibilities
//!
//! - Read frames from the open device until it fails or a stop is requested
//! - Classify each frame and offer it to the snapshot store
//! - Publish the latest ClassificationResult
//! - Annotate, encode and fan out frames to stream subscribers
//!
//! ## State machine
//!
//! Idle -> Running -> Stopping -> Idle. A stop request is observed while
//! waiting for the next frame; a frame already being processed is finished
//! first. Stopping always releases the device and closes the frame hub.

use crate::camera_device::FrameSource;
use crate::classifier::Classifier;
use crate::error::Result;
use crate::frame_annotator;
use crate::frame_hub::FrameHub;
use crate::image_codec;
use crate::models::{ClassificationResult, Label};
use crate::snapshot_store::SnapshotStore;
use axum::body::Bytes;
use chrono::Utc;
use image::RgbImage;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Latest classification result, shared with the HTTP layer
pub type SharedStatus = Arc<RwLock<ClassificationResult>>;

/// Result of one pass through classify + maybe-persist
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOutcome {
    pub label: Label,
    /// None when inference failed
    pub confidence: Option<f32>,
    pub persisted: bool,
}

/// Classify then maybe persist; shared by the live loop and uploads
pub struct ClassificationPipeline {
    classifier: Arc<Classifier>,
    snapshot_store: Arc<SnapshotStore>,
}

impl ClassificationPipeline {
    pub fn new(classifier: Arc<Classifier>, snapshot_store: Arc<SnapshotStore>) -> Self {
        Self {
            classifier,
            snapshot_store,
        }
    }

    /// Run once, surfacing inference failures to the caller
    pub async fn run_once(&self, frame: &RgbImage, camera_index: Option<u32>) -> Result<FrameOutcome> {
        let (label, confidence) = self.classifier.classify(frame).await?;
        let persisted = self
            .snapshot_store
            .maybe_persist(label, confidence, frame, camera_index)
            .await;

        Ok(FrameOutcome {
            label,
            confidence: Some(confidence),
            persisted,
        })
    }

    /// Run once; an inference failure becomes NoSubject with no confidence
    pub async fn evaluate(&self, frame: &RgbImage, camera_index: Option<u32>) -> FrameOutcome {
        match self.run_once(frame, camera_index).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "Inference failed, frame treated as no subject");
                FrameOutcome {
                    label: Label::NoSubject,
                    confidence: None,
                    persisted: false,
                }
            }
        }
    }
}

/// Loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopState::Idle => "idle",
            LoopState::Running => "running",
            LoopState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// Stop was requested
    Stopped,
    /// Frame acquisition failed
    DeviceFailed(String),
}

/// One run of the loop, bound to one open device
pub struct CaptureLoop {
    device: Box<dyn FrameSource>,
    camera_index: u32,
    pipeline: Arc<ClassificationPipeline>,
    status: SharedStatus,
    hub: Arc<FrameHub>,
    jpeg_quality: u8,
    state: LoopState,
    frames: u64,
}

impl CaptureLoop {
    pub fn new(
        device: Box<dyn FrameSource>,
        camera_index: u32,
        pipeline: Arc<ClassificationPipeline>,
        status: SharedStatus,
        hub: Arc<FrameHub>,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            device,
            camera_index,
            pipeline,
            status,
            hub,
            jpeg_quality,
            state: LoopState::Idle,
            frames: 0,
        }
    }

    fn transition(&mut self, next: LoopState) {
        tracing::info!(
            camera_index = self.camera_index,
            from = %self.state,
            to = %next,
            "Capture loop state change"
        );
        self.state = next;
    }

    /// Run until cancelled or the device fails
    pub async fn run(mut self, cancel: CancellationToken) -> LoopExit {
        self.transition(LoopState::Running);

        let exit = loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break LoopExit::Stopped,
                read = self.device.read_frame() => read,
            };

            match read {
                Ok(frame) => self.process_frame(frame).await,
                Err(e) => {
                    tracing::error!(
                        camera_index = self.camera_index,
                        error = %e,
                        "Frame acquisition failed, stopping capture"
                    );
                    break LoopExit::DeviceFailed(e.to_string());
                }
            }
        };

        self.transition(LoopState::Stopping);
        self.device.release().await;
        self.hub.close();
        self.transition(LoopState::Idle);

        tracing::info!(
            camera_index = self.camera_index,
            frames = self.frames,
            exit = ?exit,
            "Capture loop finished"
        );
        exit
    }

    async fn process_frame(&mut self, mut frame: RgbImage) {
        self.frames += 1;

        let outcome = self.pipeline.evaluate(&frame, Some(self.camera_index)).await;

        {
            let mut status = self.status.write().await;
            *status = ClassificationResult {
                label: Some(outcome.label),
                confidence: outcome.confidence,
                observed_at: Some(Utc::now()),
                persisted: outcome.persisted,
            };
        }

        frame_annotator::annotate(&mut frame, outcome.label, outcome.confidence);

        match image_codec::encode_jpeg(&frame, self.jpeg_quality) {
            Ok(jpeg) => self.hub.publish(Bytes::from(jpeg)),
            Err(e) => {
                tracing::warn!(
                    camera_index = self.camera_index,
                    error = %e,
                    "Annotated frame encode failed, not streamed"
                );
            }
        }
    }
}
