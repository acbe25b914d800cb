//! Classifier - Frame to Label Adapter
//!
//! ## Responsibilities
//!
//! - Preprocess a frame to the model input (RGB, 224x224, [0,1] floats)
//! - Query the inference engine for a single WSSV confidence
//! - Map the confidence to a label with fixed thresholds
//!
//! The engine itself is behind [`InferenceEngine`]; the server talks to a
//! model-serving endpoint (see `inference_client`).

use crate::error::{Error, Result};
use crate::models::Label;
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::Arc;

/// Model input resolution (square)
pub const MODEL_INPUT_SIZE: u32 = 224;

/// Confidence at or above this is WSSV
pub const WSSV_THRESHOLD: f32 = 0.70;

/// Confidence at or below this is Healthy
pub const HEALTHY_THRESHOLD: f32 = 0.30;

/// Map a confidence score to a label
///
/// (0.30, 0.70) is the uncertainty band: nothing is claimed there.
pub fn classify_label(confidence: f32) -> Label {
    if confidence >= WSSV_THRESHOLD {
        Label::Wssv
    } else if confidence <= HEALTHY_THRESHOLD {
        Label::Healthy
    } else {
        Label::NoSubject
    }
}

/// Normalized model input tensor, NHWC with N = 1
#[derive(Debug, Clone)]
pub struct ModelInput {
    pub width: u32,
    pub height: u32,
    /// Row-major RGB triples in [0,1]
    pub data: Vec<f32>,
}

impl ModelInput {
    /// Build the input tensor from an RGB frame of any size
    pub fn from_frame(frame: &RgbImage) -> Result<Self> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(Error::Inference("Empty frame".to_string()));
        }

        let resized = imageops::resize(frame, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, FilterType::Triangle);
        let data = resized
            .as_raw()
            .iter()
            .map(|&v| f32::from(v) / 255.0)
            .collect();

        Ok(Self {
            width: MODEL_INPUT_SIZE,
            height: MODEL_INPUT_SIZE,
            data,
        })
    }

    /// Nested `[height][width][3]` view, as the serving API expects
    pub fn to_nested(&self) -> Vec<Vec<[f32; 3]>> {
        self.data
            .chunks_exact(3 * self.width as usize)
            .map(|row| {
                row.chunks_exact(3)
                    .map(|px| [px[0], px[1], px[2]])
                    .collect()
            })
            .collect()
    }
}

/// Black-box inference engine: one input tensor in, one confidence out
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn infer(&self, input: &ModelInput) -> Result<f32>;

    /// Whether the engine is currently reachable
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Classifier adapter
pub struct Classifier {
    engine: Arc<dyn InferenceEngine>,
}

impl Classifier {
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        Self { engine }
    }

    /// Classify one frame
    ///
    /// Any engine failure comes back as `Error::Inference`.
    pub async fn classify(&self, frame: &RgbImage) -> Result<(Label, f32)> {
        let input = ModelInput::from_frame(frame)?;

        let confidence = self.engine.infer(&input).await.map_err(|e| match e {
            Error::Inference(msg) => Error::Inference(msg),
            other => Error::Inference(other.to_string()),
        })?;

        if !confidence.is_finite() {
            return Err(Error::Inference(format!("Non-finite confidence: {}", confidence)));
        }
        let confidence = confidence.clamp(0.0, 1.0);

        Ok((classify_label(confidence), confidence))
    }
}
