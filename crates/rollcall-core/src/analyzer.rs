//! Face analysis capability: region detection and per-region embeddings.
//!
//! The pipeline and the embedding store only see the [`FaceAnalyzer`] trait;
//! [`OnnxAnalyzer`] backs it with SCRFD detection and ArcFace recognition.

use crate::detector::FaceDetector;
use crate::recognizer::FaceRecognizer;
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("model file not found: {0} (download it from insightface into the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; alignment needs detector landmarks")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Given an image, find face regions and compute an embedding per region.
pub trait FaceAnalyzer: Send {
    /// Detect face regions, most confident first.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError>;

    /// Compute the embedding of one detected region.
    fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, AnalyzerError>;

    /// Detect every face and embed each one, in detection order.
    fn analyze(
        &mut self,
        image: &RgbImage,
    ) -> Result<Vec<(BoundingBox, Embedding)>, AnalyzerError> {
        let faces = self.detect(image)?;
        let mut out = Vec::with_capacity(faces.len());
        for face in faces {
            let embedding = self.embed(image, &face)?;
            out.push((face, embedding));
        }
        Ok(out)
    }
}

/// One analyzer instance shared by the processing worker and registration.
pub type SharedAnalyzer = Arc<Mutex<dyn FaceAnalyzer>>;

/// Wrap an analyzer for sharing across threads.
pub fn shared<A: FaceAnalyzer + 'static>(analyzer: A) -> SharedAnalyzer {
    Arc::new(Mutex::new(analyzer))
}

/// SCRFD + ArcFace analyzer running on ONNX Runtime.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(scrfd_path: &str, arcface_path: &str) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(scrfd_path)?;
        tracing::info!(path = scrfd_path, "SCRFD detector loaded");

        let recognizer = FaceRecognizer::load(arcface_path)?;
        tracing::info!(path = arcface_path, "ArcFace recognizer loaded");

        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
        self.detector.detect(image)
    }

    fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, AnalyzerError> {
        self.recognizer.extract(image, face)
    }
}
