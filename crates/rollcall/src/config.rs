use anyhow::{Context, Result};
use rollcall_core::PipelineOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Application configuration: defaults, then an optional TOML file, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Frames are resized to this size before processing and preview.
    pub display_width: u32,
    pub display_height: u32,
    /// One image per identity; the file stem is the label.
    pub known_faces_dir: PathBuf,
    /// CSV attendance log.
    pub attendance_log: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum Euclidean distance between L2-normalised embeddings for a match.
    pub match_threshold: f32,
    /// Detection runs on frames shrunk by this factor.
    pub downsample: u32,
    /// Draw a box around faces that matched no one.
    pub annotate_unknown: bool,
    /// Preview refresh period in milliseconds.
    pub refresh_interval_ms: u64,
    /// Where the annotated preview JPEG is written; unset disables it.
    pub preview_path: Option<PathBuf>,
    /// TrueType font for label text; without one only boxes are drawn.
    pub font_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let pipeline = PipelineOptions::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            display_width: 640,
            display_height: 480,
            known_faces_dir: PathBuf::from("known_faces"),
            attendance_log: dirs::document_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("attendance.csv"),
            model_dir: PathBuf::from("/usr/share/rollcall/models"),
            match_threshold: pipeline.match_threshold,
            downsample: pipeline.downsample,
            annotate_unknown: pipeline.annotate_unknown,
            refresh_interval_ms: 30,
            preview_path: dirs::cache_dir().map(|d| d.join("rollcall").join("preview.jpg")),
            font_path: None,
        }
    }
}

impl Config {
    /// Load from the default config file location and the process environment.
    pub fn load() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let file = env("ROLLCALL_CONFIG").map(PathBuf::from).or_else(|| {
            dirs::config_dir()
                .map(|d| d.join("rollcall").join("config.toml"))
                .filter(|p| p.exists())
        });
        Self::load_from(file.as_deref(), env)
    }

    /// Load from an explicit file (if any) with `env` as the variable lookup.
    pub fn load_from(file: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env(env);
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = env("ROLLCALL_KNOWN_FACES_DIR") {
            self.known_faces_dir = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_ATTENDANCE_LOG") {
            self.attendance_log = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_PREVIEW_PATH") {
            self.preview_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = env("ROLLCALL_FONT_PATH") {
            self.font_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = env_parse(&env, "ROLLCALL_MATCH_THRESHOLD") {
            self.match_threshold = v;
        }
        if let Some(v) = env_parse(&env, "ROLLCALL_DOWNSAMPLE") {
            self.downsample = v;
        }
        if let Some(v) = env_parse(&env, "ROLLCALL_REFRESH_MS") {
            self.refresh_interval_ms = v;
        }
        if let Some(v) = env("ROLLCALL_ANNOTATE_UNKNOWN") {
            self.annotate_unknown = v != "0";
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            match_threshold: self.match_threshold,
            downsample: self.downsample.max(1),
            annotate_unknown: self.annotate_unknown,
        }
    }
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let config = Config::load_from(None, env_of(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.downsample, 4);
        assert_eq!(config.display_width, 640);
        assert!(config.attendance_log.ends_with("attendance.csv"));
    }

    #[test]
    fn test_file_values_and_missing_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "camera_device = \"/dev/video4\"\nmatch_threshold = 0.6\nknown_faces_dir = \"/srv/faces\"\n",
        )
        .unwrap();

        let config = Config::load_from(Some(path.as_path()), env_of(&[])).unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.known_faces_dir, PathBuf::from("/srv/faces"));
        assert_eq!(config.refresh_interval_ms, 30);
    }

    #[test]
    fn test_env_overrides_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "downsample = 2\n").unwrap();

        let env = env_of(&[
            ("ROLLCALL_DOWNSAMPLE", "8"),
            ("ROLLCALL_MATCH_THRESHOLD", "0.45"),
            ("ROLLCALL_ATTENDANCE_LOG", "/tmp/log.csv"),
            ("ROLLCALL_PREVIEW_PATH", ""),
            ("ROLLCALL_ANNOTATE_UNKNOWN", "1"),
        ]);
        let config = Config::load_from(Some(path.as_path()), env).unwrap();
        assert_eq!(config.downsample, 8);
        assert_eq!(config.match_threshold, 0.45);
        assert_eq!(config.attendance_log, PathBuf::from("/tmp/log.csv"));
        assert_eq!(config.preview_path, None);
        assert!(config.annotate_unknown);
    }

    #[test]
    fn test_unparseable_env_keeps_value() {
        let env = env_of(&[("ROLLCALL_MATCH_THRESHOLD", "close")]);
        let config = Config::load_from(None, env).unwrap();
        assert_eq!(config.match_threshold, Config::default().match_threshold);
    }

    #[test]
    fn test_bad_toml_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "downsample = \"lots\"").unwrap();
        assert!(Config::load_from(Some(path.as_path()), env_of(&[])).is_err());
    }

    #[test]
    fn test_model_paths_and_pipeline_options() {
        let config = Config {
            model_dir: PathBuf::from("/models"),
            downsample: 0,
            ..Config::default()
        };
        assert_eq!(config.scrfd_model_path(), "/models/det_10g.onnx");
        assert_eq!(config.arcface_model_path(), "/models/w600k_r50.onnx");
        assert_eq!(config.pipeline_options().downsample, 1);
    }
}
