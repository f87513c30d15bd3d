//! JSON persistence for extracted rules.
//!
//! A rule file wraps the rules in a small envelope carrying a format version
//! and the documents they came from. Writes go to a temporary file in the
//! target directory and are renamed into place, so a reader never sees a
//! half-written file.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use priorauth_core::{Hyperedge, Rule};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::StoreError;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFile {
    pub version: u32,
    /// ISO 8601 timestamp string.
    pub generated_at: String,
    #[serde(default)]
    pub source_files: Vec<String>,
    pub rules: Vec<Rule>,
}

impl RuleFile {
    pub fn new(rules: Vec<Rule>) -> Self {
        let mut source_files: Vec<String> = rules.iter().map(|r| r.source.file.clone()).collect();
        source_files.sort();
        source_files.dedup();
        source_files.retain(|f| !f.is_empty());
        Self {
            version: FORMAT_VERSION,
            generated_at: Utc::now().to_rfc3339(),
            source_files,
            rules,
        }
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let file: RuleFile = read_json(path)?;
        if file.version != FORMAT_VERSION {
            return Err(StoreError::Version {
                found: file.version,
                expected: FORMAT_VERSION,
            });
        }
        if let Some(bad) = file.rules.iter().find(|r| r.validate().is_err()) {
            warn!(rule = %bad.rule_id, path = %path.display(), "rule file contains an invalid rule");
        }
        info!(count = file.rules.len(), path = %path.display(), "loaded rule file");
        Ok(file)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_json(path, self)?;
        info!(count = self.rules.len(), path = %path.display(), "saved rule file");
        Ok(())
    }

    pub fn find(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.rule_id == rule_id)
    }
}

// ── Hyperedges ──

/// Write every rule as an `authorization_rule` hyperedge (a JSON array).
pub fn export_hyperedges(rules: &[Rule], path: &Path) -> Result<usize, StoreError> {
    let edges: Vec<Hyperedge> = rules.iter().map(Rule::to_hyperedge).collect();
    write_json(path, &edges)?;
    info!(count = edges.len(), path = %path.display(), "exported hyperedges");
    Ok(edges.len())
}

/// Read a hyperedge array back into rules.
pub fn import_hyperedges(path: &Path) -> Result<Vec<Rule>, StoreError> {
    let edges: Vec<Hyperedge> = read_json(path)?;
    let rules = edges
        .into_iter()
        .map(Rule::from_hyperedge)
        .collect::<Result<Vec<_>, _>>()?;
    info!(count = rules.len(), path = %path.display(), "imported hyperedges");
    Ok(rules)
}

// ── JSON I/O ──

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let json = serde_json::to_vec_pretty(value)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&json).map_err(io_err)?;
    tmp.write_all(b"\n").map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
