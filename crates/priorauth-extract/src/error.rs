use std::path::PathBuf;

use priorauth_core::ValidationError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("section of {size} bytes exceeds limit of {limit}")]
    SectionTooLarge { size: usize, limit: usize },

    #[error("number out of range: {0}")]
    NumberOutOfRange(String),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("document is not valid UTF-8 at byte {0}")]
    InvalidUtf8(usize),

    #[error("document is empty")]
    Empty,
}

/// A non-fatal problem met while turning one section into rules.
///
/// Every section that could have produced a rule but did not leaves one
/// of these behind.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum Warning {
    #[error("{section} (line {line}): no procedure or diagnosis codes found")]
    EmptySection { section: String, line: usize },

    #[error("{section} (line {line}): extraction failed: {error}{}", fallback_note(.fallback))]
    ExtractorFailure {
        section: String,
        line: usize,
        error: String,
        fallback: bool,
    },

    #[error("{section} (line {line}): dropped invalid field: {error}")]
    InvalidField {
        section: String,
        line: usize,
        error: ValidationError,
    },

    #[error("{section} (line {line}): rule dropped: {reason}")]
    RuleDropped {
        section: String,
        line: usize,
        reason: String,
    },
}

fn fallback_note(fallback: &bool) -> &'static str {
    if *fallback {
        "; built from hints"
    } else {
        "; skipped"
    }
}
