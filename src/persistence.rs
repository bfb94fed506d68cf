// src/persistence.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::annotation::{Annotation, decode_annotations, encode_annotations};

#[derive(Debug, Clone, Serialize)]
pub struct ImageRecord {
    pub image_id: Uuid,
    pub patient_id: Uuid,
    pub img_url: String,
    pub created_at: DateTime<Utc>,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreReceipt {
    pub image_id: Uuid,
    pub annotations_count: usize,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("image {0} not found")]
    ImageNotFound(Uuid),
    #[error("db error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("annotation encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable home of image annotation lists. Writes are last-write-wins.
#[async_trait]
pub trait AnnotationGateway: Send + Sync {
    async fn fetch_image(&self, image_id: Uuid) -> Result<Option<ImageRecord>, GatewayError>;

    async fn store_annotations(
        &self,
        image_id: Uuid,
        annotations: &[Annotation],
    ) -> Result<StoreReceipt, GatewayError>;
}

pub struct PgAnnotationGateway {
    db: sqlx::PgPool,
}

impl PgAnnotationGateway {
    pub fn new(db: sqlx::PgPool) -> Self {
        Self { db }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ImageRow {
    image_id: Uuid,
    patient_id: Uuid,
    img_url: String,
    created_at: DateTime<Utc>,
    annotations: Option<String>,
}

#[async_trait]
impl AnnotationGateway for PgAnnotationGateway {
    async fn fetch_image(&self, image_id: Uuid) -> Result<Option<ImageRecord>, GatewayError> {
        let row: Option<ImageRow> = sqlx::query_as::<_, ImageRow>(
            r#"
            SELECT image_id, patient_id, img_url, created_at, annotations
            FROM image
            WHERE image_id = $1
            "#,
        )
        .bind(image_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|row| ImageRecord {
            image_id: row.image_id,
            patient_id: row.patient_id,
            img_url: row.img_url,
            created_at: row.created_at,
            annotations: row
                .annotations
                .as_deref()
                .map(decode_annotations)
                .unwrap_or_default(),
        }))
    }

    async fn store_annotations(
        &self,
        image_id: Uuid,
        annotations: &[Annotation],
    ) -> Result<StoreReceipt, GatewayError> {
        let json = encode_annotations(annotations)?;

        let updated: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE image
            SET annotations = $1
            WHERE image_id = $2
            RETURNING image_id
            "#,
        )
        .bind(json)
        .bind(image_id)
        .fetch_optional(&self.db)
        .await?;

        let image_id = updated.ok_or(GatewayError::ImageNotFound(image_id))?;
        tracing::info!(%image_id, count = annotations.len(), "annotations stored");

        Ok(StoreReceipt {
            image_id,
            annotations_count: annotations.len(),
            stored_at: Utc::now(),
        })
    }
}
