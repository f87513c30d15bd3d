//! Ingest pipeline: reads documents, extracts rules, writes a rule file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use priorauth_extract::{AdapterChain, DocumentInput, DocumentOutcome, Pipeline};
use priorauth_store::RuleFile;
use tracing::warn;

const TEXT_EXTENSIONS: &[&str] = &["md", "txt", "markdown"];

pub struct IngestStats {
    pub documents: usize,
    pub unreadable: usize,
    pub rules: usize,
    pub warnings: usize,
    pub elapsed_secs: f64,
}

/// Collect text documents under `input`: the file itself, or every file in
/// the directory with a known text extension, sorted by path.
pub fn collect_inputs(input: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let entries =
        fs::read_dir(input).with_context(|| format!("reading directory {}", input.display()))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let known = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| TEXT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if path.is_file() && known {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Run the full ingest: read and extract every document in parallel, and
/// return the combined rule file. A document no text source can read is
/// skipped.
pub fn run_ingest(pipeline: &Pipeline, inputs: &[PathBuf]) -> (RuleFile, IngestStats) {
    let start = Instant::now();
    let sources = AdapterChain::default();
    let documents: Vec<DocumentInput> = inputs.iter().cloned().map(DocumentInput::Path).collect();

    let mut rules = Vec::new();
    let mut read = 0usize;
    let mut warnings = 0usize;
    for outcome in pipeline.process_inputs(&sources, &documents) {
        match outcome {
            Ok(outcome) => {
                report(&outcome);
                read += 1;
                warnings += outcome.warnings.len();
                rules.extend(outcome.rules);
            }
            Err(failure) => warn!(error = %failure, "skipping document"),
        }
    }

    let stats = IngestStats {
        documents: read,
        unreadable: inputs.len() - read,
        rules: rules.len(),
        warnings,
        elapsed_secs: start.elapsed().as_secs_f64(),
    };
    (RuleFile::new(rules), stats)
}

fn report(outcome: &DocumentOutcome) {
    eprintln!(
        "  {:<30} {:>4} sections  {:>4} rules  {:>3} warnings  ({:.2}s)",
        outcome.source_file,
        outcome.stats.total_sections,
        outcome.rules.len(),
        outcome.warnings.len(),
        outcome.elapsed_secs
    );
    for warning in &outcome.warnings {
        eprintln!("    warning: {warning}");
    }
}
