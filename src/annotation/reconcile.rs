// src/annotation/reconcile.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::tooth::clinical_number;
use super::{Annotation, DiseaseTag, Source};

/// One manual correction from the chart editor. Tooth numbers are clinical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Edit {
    /// Move the finding on `from` to `to`.
    Renumber { from: String, to: String },
    /// Add `disease` to the tooth (`adding`) or make it the only tag.
    /// `Normal` clears the tooth.
    SetDisease {
        tooth: String,
        disease: DiseaseTag,
        #[serde(default)]
        adding: bool,
    },
    /// Drop a single tag, keeping the others.
    RemoveDisease { tooth: String, disease: DiseaseTag },
}

/// Apply `edit` to `current` and return the resulting list.
///
/// The list keeps at most one entry per clinical tooth number. Every entry
/// an edit touches becomes `Manual` and is relabelled.
pub fn reconcile(current: &[Annotation], edit: &Edit) -> Vec<Annotation> {
    match edit {
        Edit::Renumber { from, to } => renumber(current, from, to),
        Edit::SetDisease {
            tooth,
            disease,
            adding,
        } => set_disease(current, tooth, *disease, *adding),
        Edit::RemoveDisease { tooth, disease } => remove_disease(current, tooth, *disease),
    }
}

/// Fold entries that share a clinical tooth number into the first of them.
///
/// The detection model emits one box per disease, so a tooth can arrive more
/// than once. Tags are appended in list order, the first entry keeps its
/// region and the highest probability wins. Entries with unreadable tooth
/// codes are kept as they are.
pub fn merge_by_tooth(list: Vec<Annotation>) -> Vec<Annotation> {
    let mut merged: Vec<Annotation> = Vec::with_capacity(list.len());
    let mut slots: HashMap<String, usize> = HashMap::new();

    for entry in list {
        let Ok(tooth) = clinical_number(&entry) else {
            merged.push(entry);
            continue;
        };

        match slots.get(&tooth) {
            Some(&slot) => {
                let target = &mut merged[slot];
                for tag in entry.disease_types {
                    if !target.disease_types.contains(&tag) {
                        target.disease_types.push(tag);
                    }
                }
                target.normalize_tags();
                target.probability = target.probability.max(entry.probability);
                target.relabel();
                tracing::debug!(tooth, "duplicate tooth entry merged");
            }
            None => {
                slots.insert(tooth, merged.len());
                merged.push(entry);
            }
        }
    }

    merged
}

/// First entry whose clinical number is `clinical`. Entries with unreadable
/// tooth codes never match.
fn locate(list: &[Annotation], clinical: &str) -> Option<usize> {
    list.iter()
        .position(|a| clinical_number(a).is_ok_and(|n| n == clinical))
}

fn touch(entry: &mut Annotation, tooth: &str) {
    entry.tooth_number = tooth.to_string();
    entry.source = Source::Manual;
    entry.relabel();
}

fn renumber(current: &[Annotation], from: &str, to: &str) -> Vec<Annotation> {
    let Some(index) = locate(current, from) else {
        tracing::debug!(from, to, "renumber target not found, ignored");
        return current.to_vec();
    };

    let mut next = current.to_vec();
    touch(&mut next[index], to);

    // the moved entry takes over whatever was already on `to`
    next.into_iter()
        .enumerate()
        .filter(|(i, a)| *i == index || !clinical_number(a).is_ok_and(|n| n == to))
        .map(|(_, a)| a)
        .collect()
}

fn set_disease(current: &[Annotation], tooth: &str, disease: DiseaseTag, adding: bool) -> Vec<Annotation> {
    let mut next = current.to_vec();

    match locate(current, tooth) {
        Some(index) if disease == DiseaseTag::Normal => {
            next.remove(index);
        }
        Some(index) => {
            let entry = &mut next[index];
            if adding {
                entry.disease_types.retain(|d| *d != DiseaseTag::Normal);
                if !entry.disease_types.contains(&disease) {
                    entry.disease_types.push(disease);
                }
            } else {
                entry.disease_types = vec![disease];
            }
            touch(entry, tooth);
        }
        None if disease == DiseaseTag::Normal => {
            tracing::debug!(tooth, "tooth already without findings");
        }
        None => next.push(Annotation::manual(tooth, disease)),
    }

    next
}

fn remove_disease(current: &[Annotation], tooth: &str, disease: DiseaseTag) -> Vec<Annotation> {
    let Some(index) = locate(current, tooth) else {
        return current.to_vec();
    };
    if !current[index].disease_types.contains(&disease) {
        return current.to_vec();
    }

    let mut next = current.to_vec();
    let entry = &mut next[index];
    entry.disease_types.retain(|d| *d != disease);

    if entry.disease_types.is_empty() {
        next.remove(index);
    } else {
        touch(entry, tooth);
    }
    next
}
