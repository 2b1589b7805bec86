//! Known-faces directory: one image per identity, file stem = label.
//!
//! The in-memory reference set is rebuilt wholesale on every load; readers
//! hold an `Arc` snapshot that a concurrent reload never mutates.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::types::ReferenceFace;
use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("known-faces directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("invalid label {0:?}: must be non-empty and contain no path separators or commas")]
    InvalidLabel(String),
    #[error("a face is already registered under {0:?}")]
    DuplicateLabel(String),
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("{0} faces detected; the image must contain exactly one")]
    MultipleFacesDetected(usize),
    #[error("cannot read image {}: {source}", path.display())]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("cannot save reference image: {0}")]
    Save(#[source] image::ImageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Compute one reference face per image in `dir`.
///
/// Files are visited in file-name order, which fixes the store order used
/// for tie-breaking. Undecodable images and images without a face are
/// skipped with a warning; for images with several faces the first
/// detection is kept.
pub fn load(dir: &Path, analyzer: &mut dyn FaceAnalyzer) -> Result<Vec<ReferenceFace>, StoreError> {
    let mut faces = Vec::new();

    for path in image_files(dir)? {
        let Some(label) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };

        let image = match image::open(&path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable image");
                continue;
            }
        };

        let mut found = match analyzer.analyze(&image) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping image: analysis failed");
                continue;
            }
        };

        if found.is_empty() {
            tracing::warn!(path = %path.display(), "no face found; skipping");
            continue;
        }
        if found.len() > 1 {
            tracing::debug!(label = %label, faces = found.len(), "several faces in reference image; keeping the first");
        }

        let (_, embedding) = found.swap_remove(0);
        faces.push(ReferenceFace { label, embedding });
    }

    tracing::info!(dir = %dir.display(), count = faces.len(), "loaded reference faces");
    Ok(faces)
}

/// Regular files in `dir`, sorted by file name.
pub fn image_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let io_err = |source: std::io::Error| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if entry.file_type().map_err(io_err)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Labels must be usable both as a file stem and as a CSV field.
fn validate_label(label: &str) -> Result<(), RegistrationError> {
    let valid = !label.is_empty()
        && label.trim() == label
        && !label.starts_with('.')
        && !label.chars().any(|c| matches!(c, '/' | '\\' | ',') || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(RegistrationError::InvalidLabel(label.to_string()))
    }
}

/// The known-faces directory together with its current reference set.
pub struct EmbeddingStore {
    dir: PathBuf,
    faces: RwLock<Arc<Vec<ReferenceFace>>>,
}

impl EmbeddingStore {
    /// Open the store, creating the directory if it does not exist yet,
    /// and load every reference face in it.
    pub fn open(dir: impl Into<PathBuf>, analyzer: &mut dyn FaceAnalyzer) -> Result<Self, StoreError> {
        let dir = dir.into();
        if !dir.exists() {
            tracing::info!(dir = %dir.display(), "creating known-faces directory");
            std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        let faces = load(&dir, analyzer)?;
        Ok(Self {
            dir,
            faces: RwLock::new(Arc::new(faces)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot of the current reference set, in store order.
    pub fn faces(&self) -> Arc<Vec<ReferenceFace>> {
        Arc::clone(&self.faces.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.faces().len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces().is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.faces().iter().map(|f| f.label.clone()).collect()
    }

    /// Rebuild the reference set from disk. Returns the new face count.
    pub fn reload(&self, analyzer: &mut dyn FaceAnalyzer) -> Result<usize, StoreError> {
        let faces = load(&self.dir, analyzer)?;
        let count = faces.len();
        *self.faces.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(faces);
        Ok(count)
    }

    /// Whether an image is already stored under exactly `label`.
    fn has_label(&self, label: &str) -> Result<bool, StoreError> {
        Ok(image_files(&self.dir)?
            .iter()
            .any(|p| p.file_stem().is_some_and(|s| s == label)))
    }

    /// Register a new identity from an in-memory image.
    ///
    /// Nothing is written unless the label is new and the image holds
    /// exactly one face. On success the image is saved as `<label>.jpg`
    /// and the store is reloaded.
    pub fn register(
        &self,
        analyzer: &mut dyn FaceAnalyzer,
        label: &str,
        image: &DynamicImage,
    ) -> Result<(), RegistrationError> {
        validate_label(label)?;
        if self.has_label(label)? {
            return Err(RegistrationError::DuplicateLabel(label.to_string()));
        }

        let rgb = image.to_rgb8();
        match analyzer.analyze(&rgb)?.len() {
            0 => return Err(RegistrationError::NoFaceDetected),
            1 => {}
            n => return Err(RegistrationError::MultipleFacesDetected(n)),
        }

        let path = self.dir.join(format!("{label}.jpg"));
        rgb.save_with_format(&path, ImageFormat::Jpeg)
            .map_err(RegistrationError::Save)?;
        tracing::info!(label, path = %path.display(), "registered new face");

        self.reload(analyzer)?;
        Ok(())
    }

    /// Register a new identity from an image file.
    pub fn register_file(
        &self,
        analyzer: &mut dyn FaceAnalyzer,
        label: &str,
        path: &Path,
    ) -> Result<(), RegistrationError> {
        let image = image::open(path).map_err(|source| RegistrationError::UnreadableImage {
            path: path.to_path_buf(),
            source,
        })?;
        self.register(analyzer, label, &image)
    }
}
