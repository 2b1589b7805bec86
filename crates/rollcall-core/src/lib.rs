//! rollcall-core — Face recognition and attendance logging.
//!
//! Reference faces are loaded from a directory of labeled images, camera
//! frames are matched against them by embedding distance, and each
//! recognized identity is written to a daily CSV log at most once.

pub mod alignment;
pub mod analyzer;
pub mod attendance;
pub mod detector;
pub mod pipeline;
pub mod recognizer;
pub mod slot;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use analyzer::{shared, AnalyzerError, FaceAnalyzer, OnnxAnalyzer, SharedAnalyzer};
pub use attendance::{AttendanceError, AttendanceLog, AttendanceRecord, MarkOutcome};
pub use pipeline::{PassReport, PipelineOptions, ProcessedFrame, Recognition, RecognitionPipeline};
pub use slot::LatestSlot;
pub use store::{EmbeddingStore, RegistrationError, StoreError};
pub use types::{BoundingBox, Embedding, EuclideanMatcher, MatchResult, Matcher, ReferenceFace};

