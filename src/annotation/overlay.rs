// src/annotation/overlay.rs
//
// Paints annotation boxes over an image shown with "contain" fitting.
// Every call is a full redraw.

use serde::{Deserialize, Serialize};

use super::tooth::clinical_number;
use super::{Annotation, DiseaseTag, Point, Source, disease_names};

const LINE_WIDTH: f64 = 2.0;
const LABEL_GAP: f64 = 5.0;
const MIN_FONT_PX: f64 = 12.0;
const BASE_FONT_PX: f64 = 16.0;

/// Natural size of the image and the on-screen size of its container.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Viewport {
    pub natural_width: f64,
    pub natural_height: f64,
    pub container_width: f64,
    pub container_height: f64,
}

/// Source-pixel to container-pixel transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContainFit {
    pub scale_x: f64,
    pub scale_y: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ContainFit {
    /// `None` when either size is empty or not finite.
    pub fn compute(viewport: &Viewport) -> Option<Self> {
        let dims = [
            viewport.natural_width,
            viewport.natural_height,
            viewport.container_width,
            viewport.container_height,
        ];
        if dims.iter().any(|d| !d.is_finite() || *d <= 0.0) {
            return None;
        }

        let image_aspect = viewport.natural_width / viewport.natural_height;
        let container_aspect = viewport.container_width / viewport.container_height;

        let (width, height, offset_x, offset_y) = if image_aspect > container_aspect {
            // bars above and below
            let height = viewport.container_width / image_aspect;
            (
                viewport.container_width,
                height,
                0.0,
                (viewport.container_height - height) / 2.0,
            )
        } else {
            let width = viewport.container_height * image_aspect;
            (
                width,
                viewport.container_height,
                (viewport.container_width - width) / 2.0,
                0.0,
            )
        };

        Some(Self {
            scale_x: width / viewport.natural_width,
            scale_y: height / viewport.natural_height,
            offset_x,
            offset_y,
        })
    }

    pub fn project(&self, p: Point) -> (f64, f64) {
        (p.0 * self.scale_x + self.offset_x, p.1 * self.scale_y + self.offset_y)
    }

    /// Rectangle spanned by two opposite corners.
    pub fn project_rect(&self, a: Point, b: Point) -> Rect {
        let (x1, y1) = self.project(a);
        let (x2, y2) = self.project(b);
        Rect {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }
}

/// Drawing surface the overlay is painted on.
pub trait Canvas {
    fn clear(&mut self, width: f64, height: f64);
    fn stroke_rect(&mut self, rect: Rect, color: &'static str, line_width: f64);
    fn fill_text(&mut self, text: &str, x: f64, y: f64, color: &'static str, font_px: f64);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    Clear {
        width: f64,
        height: f64,
    },
    StrokeRect {
        #[serde(flatten)]
        rect: Rect,
        color: &'static str,
        line_width: f64,
    },
    FillText {
        text: String,
        x: f64,
        y: f64,
        color: &'static str,
        font_px: f64,
    },
}

/// Canvas that records operations for a browser to replay.
#[derive(Debug, Default)]
pub struct DrawList {
    ops: Vec<DrawOp>,
}

impl DrawList {
    #[cfg(test)]
    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<DrawOp> {
        self.ops
    }
}

impl Canvas for DrawList {
    fn clear(&mut self, width: f64, height: f64) {
        // a clear wipes everything drawn before it
        self.ops.clear();
        self.ops.push(DrawOp::Clear { width, height });
    }

    fn stroke_rect(&mut self, rect: Rect, color: &'static str, line_width: f64) {
        self.ops.push(DrawOp::StrokeRect {
            rect,
            color,
            line_width,
        });
    }

    fn fill_text(&mut self, text: &str, x: f64, y: f64, color: &'static str, font_px: f64) {
        self.ops.push(DrawOp::FillText {
            text: text.to_string(),
            x,
            y,
            color,
            font_px,
        });
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenderSummary {
    pub drawn: usize,
    pub skipped: usize,
}

/// Label drawn above a box.
pub fn overlay_label(annotation: &Annotation, clinical: &str) -> String {
    let names = disease_names(&annotation.disease_types);
    match annotation.source {
        Source::Manual => format!("{clinical} - {names} (手動調整)"),
        Source::AI => format!("{clinical} - {names} ({:.1}%)", annotation.probability * 100.0),
    }
}

pub fn render<C: Canvas + ?Sized>(annotations: &[Annotation], viewport: &Viewport, canvas: &mut C) -> RenderSummary {
    canvas.clear(viewport.container_width, viewport.container_height);

    let Some(fit) = ContainFit::compute(viewport) else {
        tracing::debug!(?viewport, "degenerate viewport, nothing drawn");
        return RenderSummary {
            drawn: 0,
            skipped: annotations.len(),
        };
    };
    let font_px = (BASE_FONT_PX * fit.scale_x.min(fit.scale_y)).max(MIN_FONT_PX);

    let mut summary = RenderSummary::default();
    for annotation in annotations {
        let primary = match annotation.primary_disease() {
            Some(DiseaseTag::Normal) | None => {
                summary.skipped += 1;
                continue;
            }
            Some(tag) => tag,
        };
        let [first, _, third, ..] = annotation.corners.as_slice() else {
            summary.skipped += 1;
            continue;
        };
        let clinical = match clinical_number(annotation) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("box not drawn: {e}");
                summary.skipped += 1;
                continue;
            }
        };

        let rect = fit.project_rect(*first, *third);
        let color = primary.color();
        canvas.stroke_rect(rect, color, LINE_WIDTH);
        canvas.fill_text(
            &overlay_label(annotation, &clinical),
            rect.x,
            rect.y - LABEL_GAP,
            color,
            font_px,
        );
        summary.drawn += 1;
    }

    summary
}
