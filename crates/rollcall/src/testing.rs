//! Analyzer and camera stand-ins for session and shell tests.

use crate::session::FrameSource;
use image::RgbImage;
use rollcall_core::{AnalyzerError, BoundingBox, Embedding, FaceAnalyzer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sees one face in every image exactly `width` pixels wide.
pub struct OneFace {
    pub width: u32,
    pub embedding: Vec<f32>,
    /// Incremented on every `detect`.
    pub detect_calls: Arc<AtomicUsize>,
}

impl OneFace {
    pub fn new(width: u32) -> Self {
        Self {
            width,
            embedding: vec![0.1, 0.2],
            detect_calls: Arc::default(),
        }
    }
}

fn face_box() -> BoundingBox {
    BoundingBox {
        x: 2.0, y: 2.0, width: 5.0, height: 5.0, confidence: 0.9, landmarks: None,
    }
}

impl FaceAnalyzer for OneFace {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(if image.width() == self.width { vec![face_box()] } else { vec![] })
    }

    fn embed(&mut self, _: &RgbImage, _: &BoundingBox) -> Result<Embedding, AnalyzerError> {
        Ok(Embedding::new(self.embedding.clone()))
    }
}

/// Produces blank frames; counts them and records when it is dropped.
pub struct FakeCamera {
    pub size: (u32, u32),
    pub fail: bool,
    pub interval: Duration,
    pub produced: Arc<AtomicUsize>,
    pub released: Arc<AtomicBool>,
}

impl FakeCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            fail: false,
            interval: Duration::from_millis(2),
            produced: Arc::default(),
            released: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        let mut camera = Self::new(128, 96);
        camera.fail = true;
        camera
    }
}

impl FrameSource for FakeCamera {
    type Error = String;

    fn next_frame(&mut self) -> Result<RgbImage, String> {
        std::thread::sleep(self.interval);
        if self.fail {
            return Err("no signal".into());
        }
        self.produced.fetch_add(1, Ordering::SeqCst);
        Ok(RgbImage::new(self.size.0, self.size.1))
    }
}

impl Drop for FakeCamera {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
