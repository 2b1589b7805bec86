//! Deterministic stand-in for the ONNX analyzer.
//!
//! Faces are keyed by image width, which survives JPEG re-encoding, so a
//! reference image saved to disk and reloaded yields the same embedding.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::types::{BoundingBox, Embedding};
use image::{Rgb, RgbImage};
use std::collections::HashMap;

#[derive(Default, Clone)]
pub struct FakeAnalyzer {
    by_width: HashMap<u32, Vec<(BoundingBox, Embedding)>>,
}

impl FakeAnalyzer {
    /// Images of `width` pixels contain `faces`.
    pub fn with_faces(mut self, width: u32, faces: Vec<(BoundingBox, Vec<f32>)>) -> Self {
        let faces = faces
            .into_iter()
            .map(|(bbox, values)| (bbox, Embedding::new(values)))
            .collect();
        self.by_width.insert(width, faces);
        self
    }
}

impl FaceAnalyzer for FakeAnalyzer {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
        Ok(self
            .by_width
            .get(&image.width())
            .map(|faces| faces.iter().map(|(b, _)| b.clone()).collect())
            .unwrap_or_default())
    }

    fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, AnalyzerError> {
        self.by_width
            .get(&image.width())
            .and_then(|faces| faces.iter().find(|(b, _)| b == face))
            .map(|(_, e)| e.clone())
            .ok_or_else(|| AnalyzerError::InferenceFailed("unknown face".into()))
    }
}

pub fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
    BoundingBox {
        x, y, width: w, height: h, confidence: 0.9, landmarks: None,
    }
}

pub fn blank(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([40, 40, 40]))
}

/// Write a blank image into `dir/name`, encoded per the file extension.
pub fn write_image(dir: &std::path::Path, name: &str, width: u32, height: u32) {
    blank(width, height).save(dir.join(name)).unwrap();
}
