//! Assemble extracted fields into rules and merge rules that share a key.
//!
//! The grouping key is `(payer, category, service, auth requirement)`.
//! Merging unions code and state sets and keeps the lowest confidence.
//! Groups keep first-seen order; ids are assigned in [`RuleBuilder::finish`].

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use priorauth_core::rule::{AuthRequirement, ConditionalLogic, Rule, SourceRef, ValidationError};
use priorauth_core::section::{Classification, Section};
use tracing::{debug, warn};

use crate::error::Warning;
use crate::extractor::Extraction;

type GroupKey = (String, Option<String>, Option<String>, AuthRequirement);

/// Geography stated apart from the rules it qualifies, as in a state
/// exceptions section. Applies to rules sharing a procedure code with
/// `codes`, or to every rule when `codes` is empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeographicScope {
    pub codes: BTreeSet<String>,
    pub excluded_states: BTreeSet<String>,
    pub included_states: BTreeSet<String>,
    pub conditional_logic: Vec<ConditionalLogic>,
}

impl GeographicScope {
    /// True when the scope names no states at all.
    pub fn is_empty(&self) -> bool {
        self.excluded_states.is_empty()
            && self.included_states.is_empty()
            && self.conditional_logic.is_empty()
    }
}

pub struct RuleBuilder {
    payer: String,
    source_file: String,
    rules: Vec<Rule>,
    index: HashMap<GroupKey, usize>,
    warnings: Vec<Warning>,
}

impl RuleBuilder {
    pub fn new(payer: impl Into<String>, source_file: impl Into<String>) -> Self {
        Self {
            payer: payer.into(),
            source_file: source_file.into(),
            rules: Vec::new(),
            index: HashMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Build a rule from a full extraction of `section`.
    pub fn add_extracted(
        &mut self,
        section: &Section,
        classification: &Classification,
        extraction: Extraction,
    ) {
        let mut rule = self.base_rule(section, extraction.auth_requirement);
        rule.category = category_for(section, extraction.category);
        rule.confidence = classification.confidence;
        rule.procedure_codes = extraction.procedure_codes;
        rule.diagnosis_codes = extraction.diagnosis_codes;
        rule.excluded_states = extraction.excluded_states;
        rule.included_states = extraction.included_states;
        rule.conditional_logic = extraction.conditional_logic;
        rule.place_of_service_rules = extraction.place_of_service_rules;
        rule.diagnosis_exceptions = extraction.diagnosis_exceptions;
        rule.age_restrictions = extraction.age_restrictions;
        rule.needs_narrative_review = extraction.needs_narrative_review;
        if rule.needs_narrative_review {
            rule.narrative_text = Some(section.text.clone());
        }
        self.add(section, rule);
    }

    /// Build a minimal rule from classifier hints after extraction failed.
    ///
    /// Confidence is the classifier's, scaled by `factor`.
    pub fn add_from_hints(
        &mut self,
        section: &Section,
        classification: &Classification,
        factor: f32,
    ) {
        let hints = &classification.hints;
        let mut rule = self.base_rule(section, hints.auth_signal.to_requirement());
        rule.category = category_for(section, None);
        rule.confidence = classification.confidence * factor;
        rule.procedure_codes = hints.procedure_codes.clone();
        rule.diagnosis_codes = hints.diagnosis_codes.clone();
        self.add(section, rule);
    }

    /// Validate `rule`, then merge it into its group or start a new one.
    ///
    /// Invalid fields are dropped with a warning each; a rule with no codes
    /// left is dropped with a warning.
    pub fn add(&mut self, section: &Section, mut rule: Rule) {
        let label = section.path_label();
        let field_errors = rule
            .sanitize()
            .into_iter()
            .filter(|e| *e != ValidationError::NoCodes);
        for error in field_errors {
            self.warnings.push(Warning::InvalidField {
                section: label.clone(),
                line: section.start_line,
                error,
            });
        }
        if let Err(err) = rule.validate() {
            warn!(section = %label, error = %err, "dropping rule");
            self.warnings.push(Warning::RuleDropped {
                section: label,
                line: section.start_line,
                reason: err.to_string(),
            });
            return;
        }
        rule.refresh_rule_type();

        let key = (
            rule.payer.clone(),
            rule.category.clone(),
            rule.service.clone(),
            rule.auth_requirement,
        );
        match self.index.get(&key) {
            Some(&i) => {
                debug!(section = %label, "merging into existing rule");
                self.rules[i].merge(rule);
            }
            None => {
                self.index.insert(key, self.rules.len());
                self.rules.push(rule);
            }
        }
    }

    /// Apply `scope` to every rule it covers.
    pub fn apply_scope(&mut self, scope: &GeographicScope) {
        let covered = self
            .rules
            .iter_mut()
            .filter(|r| scope.codes.is_empty() || !r.procedure_codes.is_disjoint(&scope.codes));
        for rule in covered {
            rule.excluded_states.extend(scope.excluded_states.iter().cloned());
            rule.included_states.extend(scope.included_states.iter().cloned());
            for logic in &scope.conditional_logic {
                if !rule.conditional_logic.contains(logic) {
                    rule.conditional_logic.push(logic.clone());
                }
            }
        }
    }

    pub fn record(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Assign ids `<source stem>-<nnnn>` in group order.
    pub fn finish(mut self) -> (Vec<Rule>, Vec<Warning>) {
        assign_ids(&mut self.rules, &id_stem(&self.source_file));
        (self.rules, self.warnings)
    }

    fn base_rule(&self, section: &Section, auth: AuthRequirement) -> Rule {
        let mut rule = Rule::new(self.payer.clone(), auth);
        rule.service = service_for(section);
        rule.source = SourceRef {
            file: self.source_file.clone(),
            page: section.page,
            line: section.start_line as u32 + 1,
        };
        rule
    }
}

/// Outermost header, or keyword category for headerless text.
fn category_for(section: &Section, detected: Option<String>) -> Option<String> {
    if section.is_default() {
        detected
    } else {
        section.hierarchy_path.first().cloned()
    }
}

/// Innermost header when the path is at least two deep.
fn service_for(section: &Section) -> Option<String> {
    (section.hierarchy_path.len() >= 2)
        .then(|| section.hierarchy_path.last().cloned())
        .flatten()
}

pub(crate) fn assign_ids(rules: &mut [Rule], stem: &str) {
    for (i, rule) in rules.iter_mut().enumerate() {
        rule.rule_id = format!("{stem}-{:04}", i + 1);
    }
}

/// Lowercased file stem with non-alphanumerics folded to `-`.
pub(crate) fn id_stem(source_file: &str) -> String {
    let stem = Path::new(source_file)
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        "rule".to_string()
    } else {
        cleaned.to_string()
    }
}
