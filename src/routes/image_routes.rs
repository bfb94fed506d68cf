// src/routes/image_routes.rs

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    annotation::{
        overlay::{render, ContainFit, DrawList, Viewport},
        store::EditorSnapshot,
        tooth::validate_clinical,
        Annotation, AnnotationStore, Edit,
    },
    error::ApiError,
    inference::{Detections, ImageUpload},
    models::{
        ApiOk, AppState, DetectResult, ImageAnnotations, OkData, OverlayResult, SaveResult,
        UpdateAnnotationsRequest,
    },
    persistence::StoreReceipt,
};

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/images/{image_id}/annotations",
            get(get_annotations).put(put_annotations),
        )
        .route(
            "/images/{image_id}/editor",
            post(open_editor).get(get_editor).delete(close_editor),
        )
        .route("/images/{image_id}/editor/edits", post(apply_edit))
        .route("/images/{image_id}/editor/revert", post(revert_editor))
        .route(
            "/images/{image_id}/editor/detect",
            post(detect).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/images/{image_id}/editor/overlay", post(render_overlay))
        .route("/images/{image_id}/editor/save", post(save_editor))
}

fn validate_edit(edit: &Edit) -> Result<(), ApiError> {
    let teeth: Vec<&str> = match edit {
        Edit::Renumber { from, to } => vec![from.as_str(), to.as_str()],
        Edit::SetDisease { tooth, .. } | Edit::RemoveDisease { tooth, .. } => vec![tooth.as_str()],
    };
    for tooth in teeth {
        validate_clinical(tooth)
            .map_err(|e| ApiError::BadRequest("VALIDATION_ERROR", e.to_string()))?;
    }
    Ok(())
}

async fn snapshot_of(state: &AppState, image_id: Uuid) -> Result<EditorSnapshot, ApiError> {
    state
        .sessions
        .read(image_id, AnnotationStore::snapshot)
        .await
        .ok_or_else(|| ApiError::no_editor_session(image_id))
}

/* ============================================================
   Stored annotations
   ============================================================ */

pub async fn get_annotations(
    State(state): State<AppState>,
    Path(image_id): Path<Uuid>,
) -> Result<Json<ApiOk<ImageAnnotations>>, ApiError> {
    let image = state
        .gateway
        .fetch_image(image_id)
        .await?
        .ok_or_else(|| ApiError::image_not_found(image_id))?;

    Ok(Json(ApiOk {
        data: ImageAnnotations {
            image_id: image.image_id,
            patient_id: image.patient_id,
            annotations: image.annotations,
        },
    }))
}

pub async fn put_annotations(
    State(state): State<AppState>,
    Path(image_id): Path<Uuid>,
    Json(req): Json<UpdateAnnotationsRequest>,
) -> Result<Json<ApiOk<StoreReceipt>>, ApiError> {
    if let Some(index) = req.annotations.iter().position(|a| a.disease_types.is_empty()) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            format!("annotation {index} has no disease_type"),
        ));
    }
    if let Some(index) = req.annotations.iter().position(Annotation::has_conflicting_tags) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            format!("annotation {index} combines Normal with another disease_type"),
        ));
    }

    let receipt = state
        .gateway
        .store_annotations(image_id, &req.annotations)
        .await?;

    Ok(Json(ApiOk { data: receipt }))
}

/* ============================================================
   Editor session
   ============================================================ */

pub async fn open_editor(
    State(state): State<AppState>,
    Path(image_id): Path<Uuid>,
) -> Result<Json<ApiOk<EditorSnapshot>>, ApiError> {
    let image = state
        .gateway
        .fetch_image(image_id)
        .await?
        .ok_or_else(|| ApiError::image_not_found(image_id))?;

    let store = AnnotationStore::open(image_id, image.annotations);
    let snapshot = store.snapshot();
    state.sessions.open(store).await;
    tracing::info!(%image_id, count = snapshot.annotations.len(), "editor opened");

    Ok(Json(ApiOk { data: snapshot }))
}

pub async fn get_editor(
    State(state): State<AppState>,
    Path(image_id): Path<Uuid>,
) -> Result<Json<ApiOk<EditorSnapshot>>, ApiError> {
    Ok(Json(ApiOk {
        data: snapshot_of(&state, image_id).await?,
    }))
}

pub async fn close_editor(
    State(state): State<AppState>,
    Path(image_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    if !state.sessions.close(image_id).await {
        return Err(ApiError::no_editor_session(image_id));
    }
    Ok(Json(ApiOk {
        data: OkData { ok: true },
    }))
}

pub async fn apply_edit(
    State(state): State<AppState>,
    Path(image_id): Path<Uuid>,
    Json(edit): Json<Edit>,
) -> Result<Json<ApiOk<EditorSnapshot>>, ApiError> {
    validate_edit(&edit)?;

    let snapshot = state
        .sessions
        .update(image_id, |store| {
            store.apply(&edit);
            store.snapshot()
        })
        .await
        .ok_or_else(|| ApiError::no_editor_session(image_id))?;

    tracing::debug!(%image_id, revision = snapshot.revision, ?edit, "edit applied");
    Ok(Json(ApiOk { data: snapshot }))
}

pub async fn revert_editor(
    State(state): State<AppState>,
    Path(image_id): Path<Uuid>,
) -> Result<Json<ApiOk<EditorSnapshot>>, ApiError> {
    let snapshot = state
        .sessions
        .update(image_id, |store| {
            store.revert();
            store.snapshot()
        })
        .await
        .ok_or_else(|| ApiError::no_editor_session(image_id))?;

    Ok(Json(ApiOk { data: snapshot }))
}

/// Runs the uploaded image through the detection service and replaces the
/// editor's list with the result. An unavailable service leaves the editor
/// untouched.
pub async fn detect(
    State(state): State<AppState>,
    Path(image_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<ApiOk<DetectResult>>, ApiError> {
    // fail before the upload goes anywhere
    snapshot_of(&state, image_id).await?;

    let mut upload: Option<ImageUpload> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest("VALIDATION_ERROR", e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name != "file" && name != "image" {
            continue;
        }
        let filename = field.file_name().unwrap_or("panorama.jpg").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest("VALIDATION_ERROR", e.to_string()))?;
        upload = Some(ImageUpload {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    let upload = upload
        .filter(|u| !u.bytes.is_empty())
        .ok_or_else(|| {
            ApiError::BadRequest("VALIDATION_ERROR", "multipart field `file` with image data is required".into())
        })?;

    let result = match state.inference.detect(upload).await {
        Ok(Detections {
            model,
            version,
            annotations,
            ..
        }) => {
            let count = annotations.len();
            let editor = state
                .sessions
                .update(image_id, |store| {
                    store.replace_with_detections(annotations);
                    store.snapshot()
                })
                .await
                .ok_or_else(|| ApiError::no_editor_session(image_id))?;
            tracing::info!(%image_id, count, "detections loaded into editor");

            DetectResult {
                detections_available: true,
                model,
                version,
                editor,
            }
        }
        Err(e) => {
            tracing::warn!(%image_id, "no detections available: {e}");
            DetectResult {
                detections_available: false,
                model: None,
                version: None,
                editor: snapshot_of(&state, image_id).await?,
            }
        }
    };

    Ok(Json(ApiOk { data: result }))
}

pub async fn render_overlay(
    State(state): State<AppState>,
    Path(image_id): Path<Uuid>,
    Json(viewport): Json<Viewport>,
) -> Result<Json<ApiOk<OverlayResult>>, ApiError> {
    let result = state
        .sessions
        .read(image_id, |store| {
            let mut canvas = DrawList::default();
            let summary = render(store.annotations(), &viewport, &mut canvas);
            OverlayResult {
                revision: store.revision(),
                fit: ContainFit::compute(&viewport),
                summary,
                ops: canvas.into_ops(),
            }
        })
        .await
        .ok_or_else(|| ApiError::no_editor_session(image_id))?;

    Ok(Json(ApiOk { data: result }))
}

pub async fn save_editor(
    State(state): State<AppState>,
    Path(image_id): Path<Uuid>,
) -> Result<Json<ApiOk<SaveResult>>, ApiError> {
    let (revision, annotations) = state
        .sessions
        .read(image_id, |store| (store.revision(), store.annotations().to_vec()))
        .await
        .ok_or_else(|| ApiError::no_editor_session(image_id))?;

    // a failed store leaves the session exactly as it was
    let receipt = state.gateway.store_annotations(image_id, &annotations).await?;

    state
        .sessions
        .update(image_id, |store| store.mark_saved(annotations))
        .await;

    Ok(Json(ApiOk {
        data: SaveResult {
            revision,
            annotations_count: receipt.annotations_count,
            stored_at: receipt.stored_at,
        },
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::annotation::{Annotation, DiseaseTag, Point, Source};
    use crate::inference::{InferenceClient, InferenceError};
    use crate::persistence::{AnnotationGateway, GatewayError, ImageRecord};
    use crate::sessions::EditorSessions;

    use super::*;

    #[derive(Default)]
    struct MemoryGateway {
        images: Mutex<HashMap<Uuid, ImageRecord>>,
    }

    impl MemoryGateway {
        fn stored(&self, image_id: Uuid) -> Vec<Annotation> {
            self.images.lock().unwrap()[&image_id].annotations.clone()
        }
    }

    #[async_trait]
    impl AnnotationGateway for MemoryGateway {
        async fn fetch_image(&self, image_id: Uuid) -> Result<Option<ImageRecord>, GatewayError> {
            Ok(self.images.lock().unwrap().get(&image_id).cloned())
        }

        async fn store_annotations(
            &self,
            image_id: Uuid,
            annotations: &[Annotation],
        ) -> Result<StoreReceipt, GatewayError> {
            let mut images = self.images.lock().unwrap();
            let image = images
                .get_mut(&image_id)
                .ok_or(GatewayError::ImageNotFound(image_id))?;
            image.annotations = annotations.to_vec();
            Ok(StoreReceipt {
                image_id,
                annotations_count: annotations.len(),
                stored_at: Utc::now(),
            })
        }
    }

    /// `None` behaves like a detection service that is down.
    struct FixedInference(Option<Vec<Annotation>>);

    #[async_trait]
    impl InferenceClient for FixedInference {
        async fn detect(&self, _upload: ImageUpload) -> Result<Detections, InferenceError> {
            match &self.0 {
                Some(annotations) => Ok(Detections {
                    model: Some("panorama".into()),
                    model_type: Some("detection".into()),
                    version: None,
                    annotations: annotations.clone(),
                }),
                None => Err(InferenceError::Status {
                    status: 503,
                    body: "busy".into(),
                }),
            }
        }
    }

    fn caries_box() -> Annotation {
        Annotation {
            corners: vec![
                Point(100.0, 200.0),
                Point(100.0, 600.0),
                Point(500.0, 600.0),
                Point(500.0, 200.0),
            ],
            disease_types: vec![DiseaseTag::Caries],
            tooth_number: "0-3".into(),
            probability: 0.8,
            source: Source::AI,
            display_label: "0-3 - Caries".into(),
        }
    }

    struct Fixture {
        app: Router,
        gateway: Arc<MemoryGateway>,
        image_id: Uuid,
    }

    fn fixture(detections: Option<Vec<Annotation>>) -> Fixture {
        let image_id = Uuid::new_v4();
        let gateway = Arc::new(MemoryGateway::default());
        gateway.images.lock().unwrap().insert(
            image_id,
            ImageRecord {
                image_id,
                patient_id: Uuid::new_v4(),
                img_url: "users/91/2024/01/pano.jpg".into(),
                created_at: Utc::now(),
                annotations: vec![caries_box()],
            },
        );

        let state = AppState {
            gateway: gateway.clone(),
            inference: Arc::new(FixedInference(detections)),
            sessions: Arc::new(EditorSessions::default()),
            max_upload_bytes: 1024 * 1024,
        };

        Fixture {
            app: crate::routes::router(state),
            gateway,
            image_id,
        }
    }

    async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        read_json(response).await
    }

    async fn upload(app: &Router, uri: &str) -> (StatusCode, Value) {
        let boundary = "dcms-test-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"pano.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\n\
             not-really-a-jpeg\r\n\
             --{boundary}--\r\n"
        );
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();
        read_json(app.clone().oneshot(request).await.unwrap()).await
    }

    #[tokio::test]
    async fn stored_annotations_are_returned() {
        let f = fixture(None);
        let (status, body) = send(&f.app, Method::GET, &format!("/api/v1/images/{}/annotations", f.image_id), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["annotations"][0]["tooth_number"], "0-3");
        assert_eq!(body["data"]["annotations"][0]["disease_type"], json!(["Caries"]));
    }

    #[tokio::test]
    async fn unknown_image_is_not_found() {
        let f = fixture(None);
        let (status, body) = send(&f.app, Method::POST, &format!("/api/v1/images/{}/editor", Uuid::new_v4()), None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn put_replaces_stored_annotations() {
        let f = fixture(None);
        let (status, body) = send(
            &f.app,
            Method::PUT,
            &format!("/api/v1/images/{}/annotations", f.image_id),
            Some(json!({ "annotations": [] })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["annotations_count"], 0);
        assert!(f.gateway.stored(f.image_id).is_empty());
    }

    #[tokio::test]
    async fn put_rejects_normal_mixed_with_a_disease() {
        let f = fixture(None);
        let (status, body) = send(
            &f.app,
            Method::PUT,
            &format!("/api/v1/images/{}/annotations", f.image_id),
            Some(json!({ "annotations": [
                { "disease_type": ["Caries", "Normal"], "tooth_number": "1-2", "source": "Manual" }
            ] })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(f.gateway.stored(f.image_id).len(), 1);
    }

    #[tokio::test]
    async fn edit_then_save_persists_the_reconciled_list() {
        let f = fixture(None);
        let base = format!("/api/v1/images/{}/editor", f.image_id);

        let (status, opened) = send(&f.app, Method::POST, &base, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(opened["data"]["findings"][0]["tooth_number"], "1-3");
        assert_eq!(opened["data"]["has_changes"], false);

        let (status, edited) = send(
            &f.app,
            Method::POST,
            &format!("{base}/edits"),
            Some(json!({ "kind": "set_disease", "tooth": "1-3", "disease": "Periapical", "adding": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let entry = &edited["data"]["annotations"][0];
        assert_eq!(entry["tooth_number"], "1-3");
        assert_eq!(entry["disease_type"], json!(["Caries", "Periapical"]));
        assert_eq!(entry["source"], "Manual");
        assert_eq!(entry["name"], "1-3 - 齲蝕・根尖病変");
        assert_eq!(edited["data"]["revision"], 1);
        assert_eq!(edited["data"]["has_changes"], true);

        let (status, saved) = send(&f.app, Method::POST, &format!("{base}/save"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(saved["data"]["annotations_count"], 1);

        let stored = f.gateway.stored(f.image_id);
        assert_eq!(stored[0].source, Source::Manual);
        assert_eq!(stored[0].disease_types, vec![DiseaseTag::Caries, DiseaseTag::Periapical]);

        let (_, state) = send(&f.app, Method::GET, &base, None).await;
        assert_eq!(state["data"]["has_changes"], false);
    }

    #[tokio::test]
    async fn edits_on_non_clinical_teeth_are_rejected() {
        let f = fixture(None);
        let base = format!("/api/v1/images/{}/editor", f.image_id);
        send(&f.app, Method::POST, &base, None).await;

        let (status, body) = send(
            &f.app,
            Method::POST,
            &format!("{base}/edits"),
            Some(json!({ "kind": "renumber", "from": "1-3", "to": "5-3" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn edits_need_an_open_session() {
        let f = fixture(None);
        let (status, body) = send(
            &f.app,
            Method::POST,
            &format!("/api/v1/images/{}/editor/edits", f.image_id),
            Some(json!({ "kind": "set_disease", "tooth": "1-1", "disease": "Caries" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NO_EDITOR_SESSION");
    }

    #[tokio::test]
    async fn revert_and_close() {
        let f = fixture(None);
        let base = format!("/api/v1/images/{}/editor", f.image_id);
        send(&f.app, Method::POST, &base, None).await;
        send(
            &f.app,
            Method::POST,
            &format!("{base}/edits"),
            Some(json!({ "kind": "set_disease", "tooth": "1-3", "disease": "Normal" })),
        )
        .await;

        let (_, reverted) = send(&f.app, Method::POST, &format!("{base}/revert"), None).await;
        assert_eq!(reverted["data"]["has_changes"], false);
        assert_eq!(reverted["data"]["annotations"][0]["tooth_number"], "0-3");

        let (status, _) = send(&f.app, Method::DELETE, &base, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&f.app, Method::GET, &base, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn overlay_returns_draw_ops_for_the_viewport() {
        let f = fixture(None);
        let base = format!("/api/v1/images/{}/editor", f.image_id);
        send(&f.app, Method::POST, &base, None).await;

        let (status, body) = send(
            &f.app,
            Method::POST,
            &format!("{base}/overlay"),
            Some(json!({
                "natural_width": 2000.0,
                "natural_height": 1000.0,
                "container_width": 1000.0,
                "container_height": 1000.0
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["summary"]["drawn"], 1);
        let ops = body["data"]["ops"].as_array().unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[1]["op"], "stroke_rect");
        assert_eq!(ops[1]["y"], 350.0);
        assert_eq!(ops[2]["text"], "1-3 - 齲蝕 (80.0%)");
        assert_eq!(body["data"]["fit"]["offset_y"], 250.0);
    }

    #[tokio::test]
    async fn unavailable_detection_leaves_the_editor_alone() {
        let f = fixture(None);
        let base = format!("/api/v1/images/{}/editor", f.image_id);
        send(&f.app, Method::POST, &base, None).await;

        let (status, body) = upload(&f.app, &format!("{base}/detect")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["detections_available"], false);
        assert_eq!(body["data"]["editor"]["revision"], 0);
        assert_eq!(body["data"]["editor"]["annotations"][0]["tooth_number"], "0-3");
    }

    #[tokio::test]
    async fn detections_replace_the_editor_list() {
        let mut fresh = caries_box();
        fresh.tooth_number = "2-7".into();
        fresh.disease_types = vec![DiseaseTag::Impacted];
        let f = fixture(Some(vec![fresh]));
        let base = format!("/api/v1/images/{}/editor", f.image_id);
        send(&f.app, Method::POST, &base, None).await;

        let (status, body) = upload(&f.app, &format!("{base}/detect")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["detections_available"], true);
        assert_eq!(body["data"]["model"], "panorama");
        assert_eq!(body["data"]["editor"]["findings"][0]["tooth_number"], "3-7");
        assert_eq!(body["data"]["editor"]["has_changes"], true);

        // nothing stored until save
        assert_eq!(f.gateway.stored(f.image_id)[0].tooth_number, "0-3");
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let f = fixture(None);
        let (status, body) = send(&f.app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
