// src/inference.rs
//
// Client for the panoramic X-ray detection service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::annotation::{Annotation, decode_annotation_values};

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub major: u32,
    pub minor: u32,
}

/// Body returned by the detection service.
#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    boxes: Vec<serde_json::Value>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    version: Option<ModelVersion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Detections {
    pub model: Option<String>,
    pub model_type: Option<String>,
    pub version: Option<ModelVersion>,
    /// Model-convention tooth numbers, `source` = AI.
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("inference service returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn detect(&self, upload: ImageUpload) -> Result<Detections, InferenceError>;
}

pub struct HttpInferenceClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpInferenceClient {
    /// `endpoint` is the full predict URL, e.g. `http://host:8000/predict`.
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn detect(&self, upload: ImageUpload) -> Result<Detections, InferenceError> {
        let size = upload.bytes.len();
        let mut part = reqwest::multipart::Part::bytes(upload.bytes).file_name(upload.filename);
        if let Some(content_type) = upload.content_type.as_deref() {
            part = part.mime_str(content_type)?;
        }
        let form = reqwest::multipart::Form::new().part("file", part);

        tracing::debug!(endpoint = %self.endpoint, size, "sending image for detection");
        let response = self.client.post(&self.endpoint).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: PredictResponse = response.json().await?;
        Ok(into_detections(payload))
    }
}

fn into_detections(payload: PredictResponse) -> Detections {
    let raw = payload.boxes.len();
    let annotations = decode_annotation_values(payload.boxes);
    if annotations.len() != raw {
        tracing::warn!(raw, kept = annotations.len(), "some detection boxes were unreadable");
    }

    Detections {
        model: payload.name,
        model_type: payload.kind,
        version: payload.version,
        annotations,
    }
}
