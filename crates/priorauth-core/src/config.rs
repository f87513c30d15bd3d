//! Pipeline and evaluation settings, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is valid.
//!
//! ```toml
//! payer = "UHC"
//!
//! [segmenter]
//! caps_header_min_len = 20
//!
//! [extract]
//! diagnosis_lookahead_chars = 500
//! max_section_bytes = 262144
//! hint_fallback_factor = 0.6
//!
//! [evaluation]
//! no_match_confidence = 0.3
//! default_rule_confidence = 0.7
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Payer name stamped on every extracted rule.
    pub payer: String,
    pub segmenter: SegmenterConfig,
    pub extract: ExtractConfig,
    pub evaluation: EvaluationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            payer: "UHC".to_string(),
            segmenter: SegmenterConfig::default(),
            extract: ExtractConfig::default(),
            evaluation: EvaluationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// An all-caps line must be longer than this to count as a header.
    pub caps_header_min_len: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            caps_header_min_len: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// How far past a diagnosis-exception trigger to look for codes.
    pub diagnosis_lookahead_chars: usize,
    /// Sections above this size skip structured extraction.
    pub max_section_bytes: usize,
    /// Confidence multiplier for rules built from classifier hints only.
    pub hint_fallback_factor: f32,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            diagnosis_lookahead_chars: 500,
            max_section_bytes: 256 * 1024,
            hint_fallback_factor: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Confidence reported when no rule matches; kept within [0.3, 0.5].
    pub no_match_confidence: f32,
    /// Confidence used for base-rule decisions on rules that carry none.
    pub default_rule_confidence: f32,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            no_match_confidence: 0.3,
            default_rule_confidence: 0.7,
        }
    }
}

impl Config {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config");
        Self::from_toml_str(&content)
    }

    /// Load from `path` when given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payer.trim().is_empty() {
            return Err(ConfigError::Invalid("payer must not be empty".into()));
        }
        let f = self.extract.hint_fallback_factor;
        if !(0.0..=1.0).contains(&f) {
            return Err(ConfigError::Invalid(format!(
                "extract.hint_fallback_factor {f} outside [0, 1]"
            )));
        }
        if self.extract.max_section_bytes == 0 {
            return Err(ConfigError::Invalid(
                "extract.max_section_bytes must be positive".into(),
            ));
        }
        let n = self.evaluation.no_match_confidence;
        if !(0.3..=0.5).contains(&n) {
            return Err(ConfigError::Invalid(format!(
                "evaluation.no_match_confidence {n} outside [0.3, 0.5]"
            )));
        }
        let d = self.evaluation.default_rule_confidence;
        if !(0.0..=1.0).contains(&d) {
            return Err(ConfigError::Invalid(format!(
                "evaluation.default_rule_confidence {d} outside [0, 1]"
            )));
        }
        Ok(())
    }
}
