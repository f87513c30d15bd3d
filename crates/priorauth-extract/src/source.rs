//! Document-to-text adapters.
//!
//! Conversion from the original document format happens outside this crate.
//! An [`AdapterChain`] tries each [`TextSource`] in order, returns the first
//! success, and keeps every earlier failure for diagnostics.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::SourceError;

/// A document handed to the pipeline.
#[derive(Debug, Clone)]
pub enum DocumentInput {
    Path(PathBuf),
    Bytes { name: String, data: Vec<u8> },
}

impl DocumentInput {
    /// Name recorded as the rule's source file.
    pub fn name(&self) -> String {
        match self {
            Self::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string()),
            Self::Bytes { name, .. } => name.clone(),
        }
    }

    fn bytes(&self) -> Result<Cow<'_, [u8]>, SourceError> {
        match self {
            Self::Path(p) => read_path(p).map(Cow::Owned),
            Self::Bytes { data, .. } => Ok(Cow::Borrowed(data)),
        }
    }
}

fn read_path(path: &Path) -> Result<Vec<u8>, SourceError> {
    fs::read(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Converts one document into plain text.
pub trait TextSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, input: &DocumentInput) -> Result<String, SourceError>;
}

/// Accepts already-converted text only if it is valid UTF-8.
pub struct Utf8Source;

impl TextSource for Utf8Source {
    fn name(&self) -> &'static str {
        "utf8"
    }

    fn extract(&self, input: &DocumentInput) -> Result<String, SourceError> {
        let bytes = input.bytes()?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| SourceError::InvalidUtf8(e.valid_up_to()))?;
        non_empty(text.to_string())
    }
}

/// Accepts any bytes, replacing invalid sequences with U+FFFD.
pub struct LossyUtf8Source;

impl TextSource for LossyUtf8Source {
    fn name(&self) -> &'static str {
        "utf8-lossy"
    }

    fn extract(&self, input: &DocumentInput) -> Result<String, SourceError> {
        let bytes = input.bytes()?;
        non_empty(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn non_empty(text: String) -> Result<String, SourceError> {
    if text.trim().is_empty() {
        Err(SourceError::Empty)
    } else {
        Ok(text)
    }
}

/// Text plus the name of the adapter that produced it.
#[derive(Debug)]
pub struct ExtractedText {
    pub text: String,
    pub adapter: &'static str,
    /// Adapters that were tried first and failed.
    pub prior_failures: Vec<(&'static str, String)>,
}

/// Every adapter in the chain failed.
#[derive(Debug, Error)]
#[error("no text source could read {document}: {}", summarize(.failures))]
pub struct SourceFailure {
    pub document: String,
    pub failures: Vec<(&'static str, SourceError)>,
}

fn summarize(failures: &[(&'static str, SourceError)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("{name}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct AdapterChain {
    sources: Vec<Box<dyn TextSource>>,
}

impl Default for AdapterChain {
    /// Strict UTF-8 first, then lossy decoding.
    fn default() -> Self {
        Self::new(vec![Box::new(Utf8Source), Box::new(LossyUtf8Source)])
    }
}

impl AdapterChain {
    pub fn new(sources: Vec<Box<dyn TextSource>>) -> Self {
        Self { sources }
    }

    pub fn extract(&self, input: &DocumentInput) -> Result<ExtractedText, SourceFailure> {
        let mut failures = Vec::new();
        for source in &self.sources {
            match source.extract(input) {
                Ok(text) => {
                    debug!(adapter = source.name(), document = %input.name(), "extracted text");
                    let prior_failures = failures
                        .into_iter()
                        .map(|(name, err): (&'static str, SourceError)| (name, err.to_string()))
                        .collect();
                    return Ok(ExtractedText {
                        text,
                        adapter: source.name(),
                        prior_failures,
                    });
                }
                Err(err) => {
                    warn!(adapter = source.name(), document = %input.name(), error = %err, "text source failed");
                    failures.push((source.name(), err));
                }
            }
        }
        Err(SourceFailure {
            document: input.name(),
            failures,
        })
    }
}
