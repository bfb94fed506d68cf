use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::annotation::overlay::{ContainFit, DrawOp, RenderSummary};
use crate::annotation::store::EditorSnapshot;
use crate::annotation::Annotation;
use crate::inference::{InferenceClient, ModelVersion};
use crate::persistence::AnnotationGateway;
use crate::sessions::EditorSessions;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn AnnotationGateway>,
    pub inference: Arc<dyn InferenceClient>,
    pub sessions: Arc<EditorSessions>,
    pub max_upload_bytes: usize,
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct ImageAnnotations {
    pub image_id: Uuid,
    pub patient_id: Uuid,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAnnotationsRequest {
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Serialize)]
pub struct DetectResult {
    /// False when the detection service could not be reached or refused the
    /// image; the editor is then left as it was.
    pub detections_available: bool,
    pub model: Option<String>,
    pub version: Option<ModelVersion>,
    pub editor: EditorSnapshot,
}

#[derive(Debug, Serialize)]
pub struct OverlayResult {
    pub revision: u64,
    pub fit: Option<ContainFit>,
    pub summary: RenderSummary,
    pub ops: Vec<DrawOp>,
}

#[derive(Debug, Serialize)]
pub struct SaveResult {
    pub revision: u64,
    pub annotations_count: usize,
    pub stored_at: chrono::DateTime<chrono::Utc>,
}
