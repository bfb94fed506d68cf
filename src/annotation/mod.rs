// src/annotation/mod.rs

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod overlay;
pub mod reconcile;
pub mod store;
pub mod tooth;

pub use reconcile::{Edit, merge_by_tooth, reconcile};
pub use store::AnnotationStore;

/// Point in source-image pixel space, `[x, y]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point(pub f64, pub f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiseaseTag {
    Caries,
    Impacted,
    Periapical,
    #[serde(rename = "Deep Caries")]
    DeepCaries,
    /// "No finding". Never combined with another tag.
    Normal,
}

impl DiseaseTag {
    /// Name shown to clinic staff.
    pub fn display_name(self) -> &'static str {
        match self {
            DiseaseTag::Caries => "齲蝕",
            DiseaseTag::Impacted => "埋伏歯",
            DiseaseTag::Periapical => "根尖病変",
            DiseaseTag::DeepCaries => "深部齲蝕",
            DiseaseTag::Normal => "健全歯",
        }
    }

    /// Overlay stroke/label color.
    pub fn color(self) -> &'static str {
        match self {
            DiseaseTag::Caries => "#00ff00",
            DiseaseTag::Impacted => "#ff0000",
            DiseaseTag::Periapical => "#0000ff",
            DiseaseTag::DeepCaries => "#ff9900",
            DiseaseTag::Normal => "rgba(200, 200, 200, 0.3)",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    /// Raw inference boxes carry no source field, so a missing one means AI.
    #[default]
    AI,
    Manual,
}

/// One detected or manually asserted finding on a panoramic image.
///
/// Field names on the wire match the annotation JSON already stored against
/// image rows (`disease_type`, `name`), so older payloads keep decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub corners: Vec<Point>,
    #[serde(rename = "disease_type", deserialize_with = "one_or_many")]
    pub disease_types: Vec<DiseaseTag>,
    pub tooth_number: String,
    #[serde(default = "full_confidence")]
    pub probability: f64,
    #[serde(default)]
    pub source: Source,
    #[serde(rename = "name", default)]
    pub display_label: String,
}

fn full_confidence() -> f64 {
    1.0
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<DiseaseTag>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(DiseaseTag),
        Many(Vec<DiseaseTag>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(tag) => vec![tag],
        OneOrMany::Many(tags) => tags,
    })
}

impl Annotation {
    /// A finding entered by hand: no image region, full confidence.
    pub fn manual(tooth_number: &str, disease: DiseaseTag) -> Self {
        let mut annotation = Annotation {
            corners: Vec::new(),
            disease_types: vec![disease],
            tooth_number: tooth_number.to_string(),
            probability: 1.0,
            source: Source::Manual,
            display_label: String::new(),
        };
        annotation.relabel();
        annotation
    }

    pub fn primary_disease(&self) -> Option<DiseaseTag> {
        self.disease_types.first().copied()
    }

    /// Whether this entry is shown as a finding (primary tag is not `Normal`).
    pub fn is_finding(&self) -> bool {
        matches!(self.primary_disease(), Some(tag) if tag != DiseaseTag::Normal)
    }

    /// Recompute `display_label` from the current tooth number and tags.
    pub fn relabel(&mut self) {
        self.display_label = display_label(&self.tooth_number, &self.disease_types);
    }

    /// `Normal` listed next to a real disease.
    pub fn has_conflicting_tags(&self) -> bool {
        self.disease_types.len() > 1 && self.disease_types.contains(&DiseaseTag::Normal)
    }

    /// Drop repeated tags, and `Normal` when a real disease is present.
    /// Relabels and returns `true` if anything was dropped.
    pub fn normalize_tags(&mut self) -> bool {
        let before = self.disease_types.len();

        let mut tags: Vec<DiseaseTag> = Vec::with_capacity(before);
        for tag in self.disease_types.drain(..) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        if tags.len() > 1 {
            tags.retain(|t| *t != DiseaseTag::Normal);
        }
        self.disease_types = tags;

        let changed = self.disease_types.len() != before;
        if changed {
            self.relabel();
        }
        changed
    }
}

/// Disease names joined the way the chart shows them.
pub fn disease_names(tags: &[DiseaseTag]) -> String {
    tags.iter()
        .map(|tag| tag.display_name())
        .collect::<Vec<_>>()
        .join("・")
}

pub fn display_label(tooth_number: &str, tags: &[DiseaseTag]) -> String {
    if tags == [DiseaseTag::Normal] {
        return tooth_number.to_string();
    }
    format!("{tooth_number} - {}", disease_names(tags))
}

/* -------------------------
   Stored JSON
--------------------------*/

/// Decode the annotation column of an image row.
///
/// Accepts a JSON array, a JSON string holding an array (double-encoded rows),
/// or anything else, which decodes to an empty list. Records that fail to
/// decode, or carry no disease tag, are dropped individually.
pub fn decode_annotations(raw: &str) -> Vec<Annotation> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("annotation json unreadable, treating as empty: {e}");
            return Vec::new();
        }
    };

    if let Value::String(inner) = &value {
        value = match serde_json::from_str(inner) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("double-encoded annotation json unreadable, treating as empty: {e}");
                return Vec::new();
            }
        };
    }

    match value {
        Value::Array(items) => decode_annotation_values(items),
        Value::Null => Vec::new(),
        other => {
            tracing::warn!("annotation json is not an array (got {}), treating as empty", kind_of(&other));
            Vec::new()
        }
    }
}

/// Decode already-parsed records, skipping the ones that don't fit.
///
/// Records with a tag outside `DiseaseTag` are skipped too, so a list that is
/// decoded, edited and stored again no longer carries them.
pub fn decode_annotation_values(items: Vec<Value>) -> Vec<Annotation> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<Annotation>(item) {
            Ok(a) if a.disease_types.is_empty() => {
                tracing::warn!(index, "annotation without disease tags skipped");
                None
            }
            Ok(mut a) => {
                if a.normalize_tags() {
                    tracing::warn!(index, tooth = %a.tooth_number, "conflicting disease tags dropped");
                }
                Some(a)
            }
            Err(e) => {
                tracing::warn!(index, "annotation record skipped: {e}");
                None
            }
        })
        .collect()
}

pub fn encode_annotations(annotations: &[Annotation]) -> Result<String, serde_json::Error> {
    serde_json::to_string(annotations)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
