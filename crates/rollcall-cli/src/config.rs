use rollcall_core::detector::DEFAULT_CONFIDENCE_THRESHOLD;
use rollcall_core::enrollment::DEFAULT_ENROLLMENT_PHOTOS;
use rollcall_core::quality::{DEFAULT_CENTER_MARGIN, DEFAULT_MIN_FACE_SIZE};
use rollcall_core::recognizer::{RecognizerError, RecognizerProfile};
use rollcall_core::{QualityPolicy, DEFAULT_ACCEPTANCE_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{key} must be {expected}, got {value}")]
    OutOfRange {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Settings file contents; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub model_dir: Option<PathBuf>,
    pub detector_model: Option<String>,
    pub recognizer_profile: Option<String>,
    pub recognizer_model: Option<String>,
    pub db_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub similarity_threshold: Option<f32>,
    pub detector_confidence: Option<f32>,
    pub min_face_size: Option<u32>,
    pub center_margin: Option<f32>,
    pub enforce_quality: Option<bool>,
    pub enrollment_photos: Option<usize>,
}

/// Effective configuration: defaults, then the TOML file, then `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub detector_model: String,
    /// "sface" (default) or "arcface".
    pub recognizer_profile: String,
    /// Overrides the profile's default model file name.
    pub recognizer_model: Option<String>,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Root for evidence frames and enrollment photos.
    pub data_dir: PathBuf,
    /// Cosine similarity needed to accept a match.
    pub similarity_threshold: f32,
    pub detector_confidence: f32,
    pub min_face_size: u32,
    pub center_margin: f32,
    pub enforce_quality: bool,
    /// Photos required per enrollment.
    pub enrollment_photos: usize,
}

impl Config {
    /// Load from `ROLLCALL_CONFIG` (or `<config dir>/rollcall/config.toml` if
    /// present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match config_file_path() {
            Some(path) => Some(read_file(&path)?),
            None => None,
        };
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    pub fn from_sources(file: Option<FileConfig>, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir_default = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir(&env).join(".local/share"))
            .join("rollcall");

        let file = file.unwrap_or_default();
        let data_dir = env_path(&env, "ROLLCALL_DATA_DIR")
            .or(file.data_dir)
            .unwrap_or(data_dir_default);

        let config = Self {
            model_dir: env_path(&env, "ROLLCALL_MODEL_DIR")
                .or(file.model_dir)
                .unwrap_or_else(|| data_dir.join("models")),
            detector_model: env("ROLLCALL_DETECTOR_MODEL")
                .or(file.detector_model)
                .unwrap_or_else(|| DETECTOR_MODEL_FILE.to_string()),
            recognizer_profile: env("ROLLCALL_RECOGNIZER_PROFILE")
                .or(file.recognizer_profile)
                .unwrap_or_else(|| RecognizerProfile::SFACE.name.to_string()),
            recognizer_model: env("ROLLCALL_RECOGNIZER_MODEL").or(file.recognizer_model),
            db_path: env_path(&env, "ROLLCALL_DB_PATH")
                .or(file.db_path)
                .unwrap_or_else(|| data_dir.join("rollcall.db")),
            similarity_threshold: env_parse(&env, "ROLLCALL_SIMILARITY_THRESHOLD")
                .or(file.similarity_threshold)
                .unwrap_or(DEFAULT_ACCEPTANCE_THRESHOLD),
            detector_confidence: env_parse(&env, "ROLLCALL_DETECTOR_CONFIDENCE")
                .or(file.detector_confidence)
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            min_face_size: env_parse(&env, "ROLLCALL_MIN_FACE_SIZE")
                .or(file.min_face_size)
                .unwrap_or(DEFAULT_MIN_FACE_SIZE),
            center_margin: env_parse(&env, "ROLLCALL_CENTER_MARGIN")
                .or(file.center_margin)
                .unwrap_or(DEFAULT_CENTER_MARGIN),
            enforce_quality: env("ROLLCALL_ENFORCE_QUALITY")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .or(file.enforce_quality)
                .unwrap_or(true),
            enrollment_photos: env_parse(&env, "ROLLCALL_ENROLLMENT_PHOTOS")
                .or(file.enrollment_photos)
                .unwrap_or(DEFAULT_ENROLLMENT_PHOTOS),
            data_dir,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let out_of_range = |key, expected, value: String| ConfigError::OutOfRange { key, expected, value };
        check_similarity_threshold(self.similarity_threshold)?;
        if !(0.0..=1.0).contains(&self.detector_confidence) {
            return Err(out_of_range("detector_confidence", "in [0, 1]", self.detector_confidence.to_string()));
        }
        if !(0.0..0.5).contains(&self.center_margin) {
            return Err(out_of_range("center_margin", "in [0, 0.5)", self.center_margin.to_string()));
        }
        if self.enrollment_photos == 0 {
            return Err(out_of_range("enrollment_photos", "at least 1", "0".to_string()));
        }
        Ok(())
    }

    /// Threshold for one run: `value` if given, else the configured one.
    /// Overrides get the same range check as the configured value.
    pub fn effective_threshold(&self, value: Option<f32>) -> Result<f32, ConfigError> {
        match value {
            Some(v) => check_similarity_threshold(v).map(|()| v),
            None => Ok(self.similarity_threshold),
        }
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn recognizer_profile(&self) -> Result<RecognizerProfile, RecognizerError> {
        RecognizerProfile::from_name(&self.recognizer_profile)
    }

    pub fn recognizer_model_path(&self) -> Result<PathBuf, RecognizerError> {
        let file = match &self.recognizer_model {
            Some(file) => file.clone(),
            None => self.recognizer_profile()?.default_model_file.to_string(),
        };
        Ok(self.model_dir.join(file))
    }

    pub fn quality_policy(&self) -> QualityPolicy {
        QualityPolicy {
            min_face_size: self.min_face_size,
            center_margin: self.center_margin,
            enforce: self.enforce_quality,
        }
    }
}

/// NaN fails the range check too.
fn check_similarity_threshold(value: f32) -> Result<(), ConfigError> {
    if (-1.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            key: "similarity_threshold",
            expected: "in [-1, 1]",
            value: value.to_string(),
        })
    }
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("ROLLCALL_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir(&|k: &str| std::env::var(k).ok()).join(".config"));
    let path = base.join("rollcall/config.toml");
    path.exists().then_some(path)
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn home_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    PathBuf::from(env("HOME").unwrap_or_else(|| "/tmp".to_string()))
}

fn env_path(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<PathBuf> {
    env(key).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Unparseable values fall through to the next layer.
fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}
