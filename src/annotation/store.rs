// src/annotation/store.rs

use serde::Serialize;
use uuid::Uuid;

use super::tooth::clinical_number;
use super::{Annotation, DiseaseTag, Edit, Source, merge_by_tooth, reconcile};

/// Annotation list of the image currently open in the editor.
///
/// The list is only ever replaced wholesale; `revision` counts replacements
/// that actually changed it. `baseline` is what the editor was opened with
/// (or last saved) and backs `has_changes` / `revert`.
#[derive(Debug, Clone)]
pub struct AnnotationStore {
    image_id: Uuid,
    annotations: Vec<Annotation>,
    baseline: Vec<Annotation>,
    revision: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub tooth_number: String,
    pub diseases: Vec<DiseaseTag>,
    pub label: String,
    pub source: Source,
    pub probability: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditorSnapshot {
    pub image_id: Uuid,
    pub revision: u64,
    pub has_changes: bool,
    pub annotations: Vec<Annotation>,
    pub findings: Vec<Finding>,
}

impl AnnotationStore {
    /// Entries that share a clinical tooth are merged before they become
    /// the baseline.
    pub fn open(image_id: Uuid, annotations: Vec<Annotation>) -> Self {
        let annotations = merge_by_tooth(annotations);
        Self {
            image_id,
            baseline: annotations.clone(),
            annotations,
            revision: 0,
        }
    }

    pub fn image_id(&self) -> Uuid {
        self.image_id
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn apply(&mut self, edit: &Edit) -> u64 {
        let next = reconcile(&self.annotations, edit);
        self.replace(next);
        self.revision
    }

    /// Swap in a fresh inference result. Stays unsaved until `mark_saved`.
    pub fn replace_with_detections(&mut self, detections: Vec<Annotation>) -> u64 {
        self.replace(merge_by_tooth(detections));
        self.revision
    }

    pub fn has_changes(&self) -> bool {
        self.annotations != self.baseline
    }

    pub fn revert(&mut self) -> u64 {
        let baseline = self.baseline.clone();
        self.replace(baseline);
        self.revision
    }

    /// Record `saved` as the new baseline.
    pub fn mark_saved(&mut self, saved: Vec<Annotation>) {
        self.baseline = saved;
    }

    /// Entries shown as findings, keyed by clinical tooth number.
    pub fn findings(&self) -> Vec<Finding> {
        self.annotations
            .iter()
            .filter(|a| a.is_finding())
            .filter_map(|a| match clinical_number(a) {
                Ok(tooth_number) => Some(Finding {
                    tooth_number,
                    diseases: a.disease_types.clone(),
                    label: a.display_label.clone(),
                    source: a.source,
                    probability: a.probability,
                }),
                Err(e) => {
                    tracing::warn!(image_id = %self.image_id, "finding hidden: {e}");
                    None
                }
            })
            .collect()
    }

    pub fn snapshot(&self) -> EditorSnapshot {
        EditorSnapshot {
            image_id: self.image_id,
            revision: self.revision,
            has_changes: self.has_changes(),
            annotations: self.annotations.clone(),
            findings: self.findings(),
        }
    }

    fn replace(&mut self, next: Vec<Annotation>) {
        if next != self.annotations {
            self.annotations = next;
            self.revision += 1;
        }
    }
}
