//! One recognition pass over a camera frame.
//!
//! Downsample → detect + embed → nearest reference face → annotate a copy
//! of the full-size frame → mark attendance for every labeled match.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::attendance::{AttendanceLog, MarkOutcome};
use crate::types::{BoundingBox, EuclideanMatcher, Matcher, ReferenceFace};
use ab_glyph::{FontArc, PxScale};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

const MATCH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_BAR_HEIGHT: u32 = 35;
const LABEL_TEXT_SCALE: f32 = 24.0;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Maximum embedding distance accepted as the same identity.
    pub match_threshold: f32,
    /// Frames are shrunk by this factor before detection.
    pub downsample: u32,
    /// Draw a box around faces that matched nobody.
    pub annotate_unknown: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            match_threshold: 1.10,
            downsample: 4,
            annotate_unknown: false,
        }
    }
}

/// One face found in a frame, in full-frame coordinates.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub region: BoundingBox,
    /// Matched reference label; `None` if no reference was close enough.
    pub label: Option<String>,
    /// Distance to the nearest reference face.
    pub distance: f32,
}

/// An annotated frame and what was recognized in it.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub image: RgbImage,
    pub recognitions: Vec<Recognition>,
}

impl ProcessedFrame {
    /// Labels of matched faces, in detection order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.recognitions.iter().filter_map(|r| r.label.as_deref())
    }
}

/// A processed frame plus the attendance outcome of each match.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub frame: ProcessedFrame,
    pub marks: Vec<(String, MarkOutcome)>,
}

pub struct RecognitionPipeline {
    options: PipelineOptions,
    matcher: EuclideanMatcher,
    font: Option<FontArc>,
}

impl RecognitionPipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            matcher: EuclideanMatcher,
            font: None,
        }
    }

    /// Render label text with `font`. Without a font only boxes and the
    /// label bar are drawn.
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Recognize faces in `frame` against `gallery` and annotate a copy.
    pub fn process(
        &self,
        frame: &RgbImage,
        analyzer: &mut dyn FaceAnalyzer,
        gallery: &[ReferenceFace],
    ) -> Result<ProcessedFrame, AnalyzerError> {
        let factor = self.options.downsample.max(1);
        let (found, sx, sy) = if factor > 1 {
            let small = imageops::resize(
                frame,
                (frame.width() / factor).max(1),
                (frame.height() / factor).max(1),
                FilterType::Triangle,
            );
            // Map back by the real size ratio; integer division truncates.
            let sx = frame.width() as f32 / small.width() as f32;
            let sy = frame.height() as f32 / small.height() as f32;
            (analyzer.analyze(&small)?, sx, sy)
        } else {
            (analyzer.analyze(frame)?, 1.0, 1.0)
        };

        let mut image = frame.clone();
        let mut recognitions = Vec::with_capacity(found.len());

        for (bbox, embedding) in found {
            let result = self
                .matcher
                .compare(&embedding, gallery, self.options.match_threshold);
            let region = bbox.scaled(sx, sy);

            match &result.label {
                Some(label) => self.annotate_match(&mut image, &region, label),
                None if self.options.annotate_unknown => {
                    if let Some(rect) = to_rect(&region) {
                        draw_box(&mut image, rect, UNKNOWN_COLOR);
                    }
                }
                None => {}
            }

            tracing::debug!(label = ?result.label, distance = result.distance, "face recognized");
            recognitions.push(Recognition {
                region,
                label: result.label,
                distance: result.distance,
            });
        }

        Ok(ProcessedFrame { image, recognitions })
    }

    /// Process `frame` and mark attendance for every labeled match.
    ///
    /// Log failures are reported and skipped so a bad disk never stops
    /// recognition.
    pub fn run_pass(
        &self,
        frame: &RgbImage,
        analyzer: &mut dyn FaceAnalyzer,
        gallery: &[ReferenceFace],
        log: &AttendanceLog,
    ) -> Result<PassReport, AnalyzerError> {
        let frame = self.process(frame, analyzer, gallery)?;

        let mut marks = Vec::new();
        for label in frame.labels() {
            match log.mark(label) {
                Ok(outcome) => marks.push((label.to_string(), outcome)),
                Err(e) => tracing::error!(label, error = %e, "failed to write attendance"),
            }
        }

        Ok(PassReport { frame, marks })
    }

    /// Box plus a filled label bar along the bottom edge of the face.
    fn annotate_match(&self, image: &mut RgbImage, region: &BoundingBox, label: &str) {
        let Some(rect) = to_rect(region) else {
            return;
        };
        draw_box(image, rect, MATCH_COLOR);

        let bar_top = rect.bottom() + 1 - LABEL_BAR_HEIGHT.min(rect.height()) as i32;
        let bar = Rect::at(rect.left(), bar_top).of_size(rect.width(), LABEL_BAR_HEIGHT.min(rect.height()));
        draw_filled_rect_mut(image, bar, MATCH_COLOR);

        if let Some(font) = &self.font {
            draw_text_mut(
                image,
                TEXT_COLOR,
                rect.left() + 6,
                bar_top + 4,
                PxScale::from(LABEL_TEXT_SCALE),
                font,
                label,
            );
        }
    }
}

fn to_rect(region: &BoundingBox) -> Option<Rect> {
    let width = region.width.round();
    let height = region.height.round();
    // Also rejects NaN.
    if !(width >= 1.0 && height >= 1.0) {
        return None;
    }
    Some(Rect::at(region.x.round() as i32, region.y.round() as i32).of_size(width as u32, height as u32))
}

/// Two-pixel hollow rectangle.
fn draw_box(image: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    draw_hollow_rect_mut(image, rect, color);
    if rect.width() > 2 && rect.height() > 2 {
        let inner = Rect::at(rect.left() + 1, rect.top() + 1).of_size(rect.width() - 2, rect.height() - 2);
        draw_hollow_rect_mut(image, inner, color);
    }
}
