//! Per-document pipeline: segment → classify → extract → build.
//!
//! Each section is processed in isolation. A failure in one section becomes
//! a [`Warning`] and never aborts the document.

use std::collections::HashSet;
use std::time::Instant;

use priorauth_core::Config;
use priorauth_core::rule::Rule;
use priorauth_core::section::{Classification, ContentType, Section};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::builder::{self, GeographicScope, RuleBuilder};
use crate::classifier::{ClassificationStats, Classifier};
use crate::error::{ExtractError, Warning};
use crate::extractor::Extractor;
use crate::segmenter::Segmenter;
use crate::source::{AdapterChain, DocumentInput, SourceFailure};

/// Rules and diagnostics for one document.
#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub source_file: String,
    pub rules: Vec<Rule>,
    pub warnings: Vec<Warning>,
    pub stats: ClassificationStats,
    pub features: FeatureCounts,
    pub elapsed_secs: f64,
}

/// How many rules carry each kind of qualifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeatureCounts {
    pub place_of_service: usize,
    pub diagnosis_exceptions: usize,
    pub age_restrictions: usize,
    pub geographic: usize,
    pub conditional_logic: usize,
    pub narrative: usize,
}

impl FeatureCounts {
    pub fn from_rules(rules: &[Rule]) -> Self {
        let count = |f: fn(&Rule) -> bool| rules.iter().filter(|r| f(r)).count();
        Self {
            place_of_service: count(|r| !r.place_of_service_rules.is_empty()),
            diagnosis_exceptions: count(|r| !r.diagnosis_exceptions.is_empty()),
            age_restrictions: count(|r| !r.age_restrictions.is_empty()),
            geographic: count(|r| !r.excluded_states.is_empty() || !r.included_states.is_empty()),
            conditional_logic: count(|r| !r.conditional_logic.is_empty()),
            narrative: count(|r| r.needs_narrative_review),
        }
    }
}

pub struct Pipeline {
    config: Config,
    segmenter: Segmenter,
    classifier: Classifier,
    extractor: Extractor,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self, ExtractError> {
        Ok(Self {
            segmenter: Segmenter::new(&config.segmenter)?,
            classifier: Classifier::new()?,
            extractor: Extractor::new(&config.extract)?,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read a document through `sources`, then process its text.
    pub fn process_input(
        &self,
        sources: &AdapterChain,
        input: &DocumentInput,
    ) -> Result<DocumentOutcome, SourceFailure> {
        let extracted = sources.extract(input)?;
        for (adapter, error) in &extracted.prior_failures {
            debug!(adapter, error = %error, "earlier text source failed");
        }
        Ok(self.process_text(&input.name(), &extracted.text))
    }

    /// Read and process many documents in parallel. Rule ids are unique
    /// across the readable documents.
    pub fn process_inputs(
        &self,
        sources: &AdapterChain,
        inputs: &[DocumentInput],
    ) -> Vec<Result<DocumentOutcome, SourceFailure>> {
        let mut outcomes: Vec<_> = inputs
            .par_iter()
            .map(|input| self.process_input(sources, input))
            .collect();
        disambiguate_ids(outcomes.iter_mut().filter_map(|o| o.as_mut().ok()));
        outcomes
    }

    /// Process many already-converted documents in parallel. Rule ids are
    /// unique across the batch.
    pub fn process_batch(&self, documents: &[(String, String)]) -> Vec<DocumentOutcome> {
        let mut outcomes: Vec<_> = documents
            .par_iter()
            .map(|(name, text)| self.process_text(name, text))
            .collect();
        disambiguate_ids(outcomes.iter_mut());
        outcomes
    }

    pub fn process_text(&self, source_file: &str, text: &str) -> DocumentOutcome {
        let start = Instant::now();
        let sections = self.segmenter.segment(text);
        let classifications: Vec<Classification> = sections
            .iter()
            .map(|s| self.classifier.classify(s))
            .collect();

        let mut builder = RuleBuilder::new(self.config.payer.clone(), source_file);
        let mut scopes = Vec::new();

        for (section, classification) in sections.iter().zip(&classifications) {
            match classification.content_type {
                ContentType::AuthorizationRule | ContentType::ProcedureList => {
                    self.build_section(&mut builder, section, classification);
                }
                ContentType::GeographicException => {
                    scopes.push(self.geographic_section(section, classification));
                }
                ContentType::ContextInfo => {
                    debug!(section = %section.path_label(), "context section skipped");
                }
            }
        }

        for scope in scopes.iter().filter(|s| !s.is_empty()) {
            builder.apply_scope(scope);
        }

        let (rules, warnings) = builder.finish();
        let stats = ClassificationStats::from_classifications(&classifications);
        let features = FeatureCounts::from_rules(&rules);
        let elapsed_secs = start.elapsed().as_secs_f64();

        info!(
            source = source_file,
            sections = sections.len(),
            rules = rules.len(),
            warnings = warnings.len(),
            pos = features.place_of_service,
            dx_exceptions = features.diagnosis_exceptions,
            age = features.age_restrictions,
            geographic = features.geographic,
            conditional = features.conditional_logic,
            narrative = features.narrative,
            "processed document"
        );

        DocumentOutcome {
            source_file: source_file.to_string(),
            rules,
            warnings,
            stats,
            features,
            elapsed_secs,
        }
    }

    fn build_section(
        &self,
        builder: &mut RuleBuilder,
        section: &Section,
        classification: &Classification,
    ) {
        let label = section.path_label();
        match self.extractor.extract(&section.text) {
            Ok(extraction) if extraction.has_codes() => {
                builder.add_extracted(section, classification, extraction);
            }
            Ok(_) => {
                debug!(section = %label, "no codes in section");
                builder.record(Warning::EmptySection {
                    section: label,
                    line: section.start_line,
                });
            }
            Err(err) => {
                let fallback = classification.hints.has_codes();
                warn!(section = %label, error = %err, fallback, "extraction failed");
                builder.record(Warning::ExtractorFailure {
                    section: label,
                    line: section.start_line,
                    error: err.to_string(),
                    fallback,
                });
                if fallback {
                    builder.add_from_hints(
                        section,
                        classification,
                        self.config.extract.hint_fallback_factor,
                    );
                }
            }
        }
    }

    /// Scope stated by a geographic-exception section. A section with no
    /// scope phrase excludes the states it mentions.
    fn geographic_section(
        &self,
        section: &Section,
        classification: &Classification,
    ) -> GeographicScope {
        let hints = &classification.hints;
        match self.extractor.extract(&section.text) {
            Ok(extraction) => {
                let mut scope = GeographicScope {
                    codes: extraction.procedure_codes,
                    excluded_states: extraction.excluded_states,
                    included_states: extraction.included_states,
                    conditional_logic: extraction.conditional_logic,
                };
                if scope.is_empty() {
                    debug!(section = %section.path_label(), "no scope phrase, excluding mentioned states");
                    scope.excluded_states = hints.state_codes.clone();
                }
                scope
            }
            Err(err) => {
                warn!(section = %section.path_label(), error = %err, "using hint states for exception section");
                GeographicScope {
                    codes: hints.procedure_codes.clone(),
                    excluded_states: hints.state_codes.clone(),
                    ..GeographicScope::default()
                }
            }
        }
    }
}

/// Renumber documents whose id stem is already taken in this batch as
/// `<stem>-<n>-<nnnn>`, keeping the first document's ids unchanged.
fn disambiguate_ids<'a>(outcomes: impl IntoIterator<Item = &'a mut DocumentOutcome>) {
    let mut taken = HashSet::new();
    for outcome in outcomes {
        let base = builder::id_stem(&outcome.source_file);
        let mut stem = base.clone();
        let mut n = 1;
        while taken.contains(&stem) {
            n += 1;
            stem = format!("{base}-{n}");
        }
        if stem != base {
            debug!(source = %outcome.source_file, stem = %stem, "renumbering colliding rule ids");
            builder::assign_ids(&mut outcome.rules, &stem);
        }
        taken.insert(stem);
    }
}
