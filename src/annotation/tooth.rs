// src/annotation/tooth.rs
//
// Tooth codes are "<quadrant>-<position>". The detection model numbers
// quadrants 0..=3; the chart numbers them 1..=4.

use super::{Annotation, Source};

const CLINICAL_QUADRANTS: std::ops::RangeInclusive<i32> = 1..=4;
const CLINICAL_POSITIONS: std::ops::RangeInclusive<i32> = 1..=8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToothCodeError {
    #[error("malformed tooth code `{0}`")]
    Malformed(String),
    #[error("tooth code `{code}` translates to quadrant {quadrant}, outside 1..=4")]
    InvalidQuadrant { code: String, quadrant: i32 },
    #[error("`{0}` is not a clinical tooth number")]
    NotClinical(String),
}

fn split(code: &str) -> Result<(i32, &str), ToothCodeError> {
    let (quadrant, position) = code
        .split_once('-')
        .ok_or_else(|| ToothCodeError::Malformed(code.to_string()))?;
    let quadrant = quadrant
        .parse::<i32>()
        .map_err(|_| ToothCodeError::Malformed(code.to_string()))?;
    Ok((quadrant, position))
}

fn recombine(code: &str, quadrant: i32, position: &str) -> Result<String, ToothCodeError> {
    if !CLINICAL_QUADRANTS.contains(&quadrant) {
        return Err(ToothCodeError::InvalidQuadrant {
            code: code.to_string(),
            quadrant,
        });
    }
    Ok(format!("{quadrant}-{position}"))
}

/// Translate a tooth code to the chart's numbering.
///
/// With `from_model` the quadrant is shifted up by one. Otherwise a code that
/// is already clinical comes back unchanged and anything else is shifted down
/// by one. A result outside quadrants 1..=4 is an error. The position part is
/// carried through as-is.
pub fn to_clinical(code: &str, from_model: bool) -> Result<String, ToothCodeError> {
    let (quadrant, position) = split(code)?;

    if from_model {
        return recombine(code, quadrant + 1, position);
    }
    if CLINICAL_QUADRANTS.contains(&quadrant) {
        return Ok(code.to_string());
    }
    recombine(code, quadrant - 1, position)
}

/// Inverse of `to_clinical(code, true)`.
#[cfg(test)]
pub fn to_model(clinical: &str) -> Result<String, ToothCodeError> {
    let (quadrant, position) = split(clinical)?;
    if !CLINICAL_QUADRANTS.contains(&quadrant) {
        return Err(ToothCodeError::NotClinical(clinical.to_string()));
    }
    Ok(format!("{}-{position}", quadrant - 1))
}

/// Clinical number of an entry, honouring the convention its source implies.
pub fn clinical_number(annotation: &Annotation) -> Result<String, ToothCodeError> {
    to_clinical(&annotation.tooth_number, annotation.source == Source::AI)
}

/// Strict check for tooth numbers coming from a client edit.
pub fn validate_clinical(code: &str) -> Result<(), ToothCodeError> {
    let (quadrant, position) = split(code)?;
    let position_ok = position
        .parse::<i32>()
        .is_ok_and(|p| CLINICAL_POSITIONS.contains(&p));

    if CLINICAL_QUADRANTS.contains(&quadrant) && position_ok {
        Ok(())
    } else {
        Err(ToothCodeError::NotClinical(code.to_string()))
    }
}
