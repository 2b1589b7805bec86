use crate::config::Config;
use crate::session::{SessionContext, SessionEvent};
use ab_glyph::FontArc;
use anyhow::{Context, Result};
use rollcall_core::{
    AttendanceLog, EmbeddingStore, FaceAnalyzer, OnnxAnalyzer, RecognitionPipeline,
    RegistrationError, SharedAnalyzer,
};
use std::path::Path;
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

/// Everything a session or a one-shot command works against.
pub struct App {
    pub config: Config,
    pub analyzer: SharedAnalyzer,
    pub store: Arc<EmbeddingStore>,
    pub log: Arc<AttendanceLog>,
    pub pipeline: Arc<RecognitionPipeline>,
}

impl App {
    /// Load the ONNX models, then the known faces.
    pub fn open(config: Config) -> Result<Self> {
        let scrfd = config.scrfd_model_path();
        let arcface = config.arcface_model_path();
        let analyzer = OnnxAnalyzer::load(&scrfd, &arcface)
            .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;
        Self::with_analyzer(config, rollcall_core::shared(analyzer))
    }

    pub fn with_analyzer(config: Config, analyzer: SharedAnalyzer) -> Result<Self> {
        let store = {
            let mut guard = lock(&analyzer);
            EmbeddingStore::open(&config.known_faces_dir, &mut *guard).with_context(|| {
                format!("opening known faces in {}", config.known_faces_dir.display())
            })?
        };

        let mut pipeline = RecognitionPipeline::new(config.pipeline_options());
        if let Some(font) = config.font_path.as_deref().and_then(load_font) {
            pipeline = pipeline.with_font(font);
        }

        tracing::info!(
            faces = store.len(),
            log = %config.attendance_log.display(),
            "rollcall ready"
        );

        Ok(Self {
            log: Arc::new(AttendanceLog::new(&config.attendance_log)),
            store: Arc::new(store),
            pipeline: Arc::new(pipeline),
            analyzer,
            config,
        })
    }

    pub fn session_context(&self, events: Option<UnboundedSender<SessionEvent>>) -> SessionContext {
        SessionContext {
            analyzer: Arc::clone(&self.analyzer),
            store: Arc::clone(&self.store),
            log: Arc::clone(&self.log),
            pipeline: Arc::clone(&self.pipeline),
            display: (self.config.display_width, self.config.display_height),
            events,
        }
    }

    /// Register `image` under `label` and return the new face count.
    pub fn register(&self, label: &str, image: &Path) -> Result<usize, RegistrationError> {
        register(&self.analyzer, &self.store, label, image)
    }
}

/// Registration against shared handles, for use off the console task.
pub fn register(
    analyzer: &SharedAnalyzer,
    store: &EmbeddingStore,
    label: &str,
    image: &Path,
) -> Result<usize, RegistrationError> {
    let mut guard = lock(analyzer);
    store.register_file(&mut *guard, label, image)?;
    Ok(store.len())
}

fn lock(analyzer: &SharedAnalyzer) -> MutexGuard<'_, dyn FaceAnalyzer> {
    analyzer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A missing or unparseable font only costs the label text.
fn load_font(path: &Path) -> Option<FontArc> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read font; labels will not be drawn");
            return None;
        }
    };
    match FontArc::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid font; labels will not be drawn");
            None
        }
    }
}
