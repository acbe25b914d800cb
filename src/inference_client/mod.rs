//! InferenceClient - Model Serving Adapter
//!
//! ## Responsibilities
//!
//! - Send preprocessed frames to the model server (TF-Serving REST predict API)
//! - Parse the single-scalar prediction
//! - Connection health probe
//!
//! The model runs next to the server on the edge box; this client is the
//! only place that knows the transport.

use crate::classifier::{InferenceEngine, ModelInput};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Predict request body
#[derive(Debug, Serialize)]
struct PredictRequest {
    instances: Vec<Vec<Vec<[f32; 3]>>>,
}

/// Predict response body
#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Vec<serde_json::Value>,
}

impl PredictResponse {
    /// First scalar of the first prediction (`[[c]]` or `[c]`)
    fn confidence(&self) -> Option<f32> {
        let first = self.predictions.first()?;
        let value = match first {
            serde_json::Value::Array(inner) => inner.first()?.as_f64()?,
            other => other.as_f64()?,
        };
        Some(value as f32)
    }
}

/// Model server client
pub struct InferenceClient {
    client: reqwest::Client,
    base_url: String,
    model_name: String,
}

impl InferenceClient {
    /// Create new inference client
    pub fn new(base_url: String, model_name: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_name,
        })
    }

    fn model_url(&self) -> String {
        format!("{}/v1/models/{}", self.base_url, self.model_name)
    }

    fn predict_url(&self) -> String {
        format!("{}:predict", self.model_url())
    }
}

#[async_trait]
impl InferenceEngine for InferenceClient {
    async fn infer(&self, input: &ModelInput) -> Result<f32> {
        let body = PredictRequest {
            instances: vec![input.to_nested()],
        };

        let resp = self
            .client
            .post(self.predict_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Model server request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "Model server returned {} - {}",
                status, text
            )));
        }

        let parsed: PredictResponse = resp
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Malformed prediction: {}", e)))?;

        parsed
            .confidence()
            .ok_or_else(|| Error::Inference("Prediction has no scalar output".to_string()))
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.get(self.model_url()).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}
