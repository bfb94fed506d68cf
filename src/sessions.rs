// src/sessions.rs
//
// Open editor sessions, one annotation store per image. Every mutation
// takes the write lock, so edits on one image apply one at a time.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::annotation::AnnotationStore;

#[derive(Debug, Default)]
pub struct EditorSessions {
    stores: RwLock<HashMap<Uuid, AnnotationStore>>,
}

impl EditorSessions {
    /// Install `store`, replacing any session already open on that image.
    pub async fn open(&self, store: AnnotationStore) -> bool {
        let image_id = store.image_id();
        let replaced = self.stores.write().await.insert(image_id, store).is_some();
        if replaced {
            tracing::info!(%image_id, "editor session reopened, unsaved edits dropped");
        }
        replaced
    }

    pub async fn read<R>(&self, image_id: Uuid, f: impl FnOnce(&AnnotationStore) -> R) -> Option<R> {
        self.stores.read().await.get(&image_id).map(f)
    }

    pub async fn update<R>(&self, image_id: Uuid, f: impl FnOnce(&mut AnnotationStore) -> R) -> Option<R> {
        self.stores.write().await.get_mut(&image_id).map(f)
    }

    pub async fn close(&self, image_id: Uuid) -> bool {
        self.stores.write().await.remove(&image_id).is_some()
    }
}
