//! Authorization rules and their qualifiers.
//!
//! A [`Rule`] says whether a set of procedure (or diagnosis) codes needs
//! prior authorization for one payer, plus the qualifiers that can override
//! that base answer: geography, diagnosis exemptions, place of service,
//! age, and conditional state logic.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codes;
use crate::narrative::NarrativeResponse;
use crate::states;

/// Place-of-service code that matches every setting.
pub const POS_ANY: &str = "*";

/// Confidence assumed for rules that never had one assigned.
pub const DEFAULT_CONFIDENCE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthRequirement {
    Required,
    NotRequired,
    Conditional,
    NotificationOnly,
}

impl AuthRequirement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "REQUIRED",
            Self::NotRequired => "NOT_REQUIRED",
            Self::Conditional => "CONDITIONAL",
            Self::NotificationOnly => "NOTIFICATION_ONLY",
        }
    }

    /// Ordering used when several rules disagree:
    /// `Required > Conditional > NotificationOnly > NotRequired`.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Required => 3,
            Self::Conditional => 2,
            Self::NotificationOnly => 1,
            Self::NotRequired => 0,
        }
    }

    /// Whether a caller should obtain authorization before proceeding.
    /// `Conditional` counts, since the conditions cannot be ruled out.
    pub fn needs_authorization(&self) -> bool {
        matches!(self, Self::Required | Self::Conditional)
    }
}

impl std::fmt::Display for AuthRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    CodeBased,
    DiagnosisBased,
    Combination,
    Narrative,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeBased => "code_based",
            Self::DiagnosisBased => "diagnosis_based",
            Self::Combination => "combination",
            Self::Narrative => "narrative",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionType {
    /// The listed diagnoses lift the authorization requirement.
    Exempt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisException {
    pub codes: BTreeSet<String>,
    pub exception_type: ExceptionType,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PosQualifier {
    Exempt,
    PriorAuth,
    SiteOfServiceReview,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOfServiceRule {
    /// CMS place-of-service code, or `*` for any setting.
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub requires_auth: bool,
    pub qualifier: PosQualifier,
}

impl PlaceOfServiceRule {
    pub fn matches(&self, place_of_service: &str) -> bool {
        self.code == POS_ANY || self.code == place_of_service
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeRestriction {
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub auth_requirement: AuthRequirement,
}

impl AgeRestriction {
    /// Inclusive bounds check; a missing bound is open.
    pub fn contains(&self, age: u32) -> bool {
        self.min_age.is_none_or(|min| age >= min) && self.max_age.is_none_or(|max| age <= max)
    }
}

/// "Required in all states except X": `result_auth_requirement` holds
/// everywhere except the listed states, where no authorization is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalLogic {
    pub excluded_states: BTreeSet<String>,
    pub result_auth_requirement: AuthRequirement,
}

/// Where in the source document a rule came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub file: String,
    pub page: u32,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("rule has no procedure or diagnosis codes")]
    NoCodes,
    #[error("invalid procedure code: {0}")]
    InvalidProcedureCode(String),
    #[error("invalid diagnosis code: {0}")]
    InvalidDiagnosisCode(String),
    #[error("unknown state code: {0}")]
    UnknownState(String),
    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub rule_type: RuleType,
    pub auth_requirement: AuthRequirement,
    pub payer: String,
    pub category: Option<String>,
    pub service: Option<String>,
    #[serde(default)]
    pub procedure_codes: BTreeSet<String>,
    #[serde(default)]
    pub diagnosis_codes: BTreeSet<String>,
    #[serde(default)]
    pub excluded_states: BTreeSet<String>,
    #[serde(default)]
    pub included_states: BTreeSet<String>,
    #[serde(default)]
    pub applicable_plans: BTreeSet<String>,
    #[serde(default)]
    pub diagnosis_exceptions: Vec<DiagnosisException>,
    #[serde(default)]
    pub place_of_service_rules: Vec<PlaceOfServiceRule>,
    #[serde(default)]
    pub age_restrictions: Vec<AgeRestriction>,
    #[serde(default)]
    pub conditional_logic: Vec<ConditionalLogic>,
    #[serde(default)]
    pub clinical_criteria: Vec<String>,
    #[serde(default)]
    pub quantity_limits: Vec<String>,
    #[serde(default)]
    pub source: SourceRef,
    pub confidence: f32,
    pub narrative_text: Option<String>,
    #[serde(default)]
    pub needs_narrative_review: bool,
    /// ISO 8601 timestamp string.
    pub extracted_at: String,
}

impl Rule {
    /// An empty code-based rule stamped with the current time.
    pub fn new(payer: impl Into<String>, auth_requirement: AuthRequirement) -> Self {
        Self {
            rule_id: String::new(),
            rule_type: RuleType::CodeBased,
            auth_requirement,
            payer: payer.into(),
            category: None,
            service: None,
            procedure_codes: BTreeSet::new(),
            diagnosis_codes: BTreeSet::new(),
            excluded_states: BTreeSet::new(),
            included_states: BTreeSet::new(),
            applicable_plans: BTreeSet::new(),
            diagnosis_exceptions: Vec::new(),
            place_of_service_rules: Vec::new(),
            age_restrictions: Vec::new(),
            conditional_logic: Vec::new(),
            clinical_criteria: Vec::new(),
            quantity_limits: Vec::new(),
            source: SourceRef::default(),
            confidence: DEFAULT_CONFIDENCE,
            narrative_text: None,
            needs_narrative_review: false,
            extracted_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn has_codes(&self) -> bool {
        !self.procedure_codes.is_empty() || !self.diagnosis_codes.is_empty()
    }

    /// Derive the rule type from which code sets are populated.
    pub fn refresh_rule_type(&mut self) {
        let has_proc = !self.procedure_codes.is_empty();
        let has_dx = !self.diagnosis_codes.is_empty();
        self.rule_type = match (has_proc, has_dx) {
            (false, _) if self.needs_narrative_review => RuleType::Narrative,
            (true, true) => RuleType::Combination,
            (false, true) => RuleType::DiagnosisBased,
            _ => RuleType::CodeBased,
        };
    }

    /// Check every invariant, returning the first violation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.has_codes() {
            return Err(ValidationError::NoCodes);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(self.confidence));
        }
        if let Some(code) = self
            .procedure_codes
            .iter()
            .find(|c| !codes::is_valid_procedure_code(c))
        {
            return Err(ValidationError::InvalidProcedureCode(code.clone()));
        }
        if let Some(code) = self
            .diagnosis_codes
            .iter()
            .chain(self.diagnosis_exceptions.iter().flat_map(|e| &e.codes))
            .find(|c| !codes::is_valid_diagnosis_code(c))
        {
            return Err(ValidationError::InvalidDiagnosisCode(code.clone()));
        }
        if let Some(state) = self
            .all_states()
            .find(|s| !states::is_canonical(s))
        {
            return Err(ValidationError::UnknownState(state.to_string()));
        }
        Ok(())
    }

    /// Drop every invalid code and state in place and clamp confidence,
    /// returning one error per field removed.
    ///
    /// A rule left with no codes also reports [`ValidationError::NoCodes`].
    pub fn sanitize(&mut self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        self.procedure_codes.retain(|c| {
            let ok = codes::is_valid_procedure_code(c);
            if !ok {
                errors.push(ValidationError::InvalidProcedureCode(c.clone()));
            }
            ok
        });
        let mut keep_dx = |c: &String| {
            let ok = codes::is_valid_diagnosis_code(c);
            if !ok {
                errors.push(ValidationError::InvalidDiagnosisCode(c.clone()));
            }
            ok
        };
        self.diagnosis_codes.retain(&mut keep_dx);
        for exception in &mut self.diagnosis_exceptions {
            exception.codes.retain(&mut keep_dx);
        }
        self.diagnosis_exceptions.retain(|e| !e.codes.is_empty());

        let mut keep_state = |s: &String| {
            let ok = states::is_canonical(s);
            if !ok {
                errors.push(ValidationError::UnknownState(s.clone()));
            }
            ok
        };
        self.excluded_states.retain(&mut keep_state);
        self.included_states.retain(&mut keep_state);
        for logic in &mut self.conditional_logic {
            logic.excluded_states.retain(&mut keep_state);
        }
        self.conditional_logic.retain(|l| !l.excluded_states.is_empty());

        if !self.confidence.is_finite() {
            errors.push(ValidationError::ConfidenceOutOfRange(self.confidence));
            self.confidence = DEFAULT_CONFIDENCE;
        } else if !(0.0..=1.0).contains(&self.confidence) {
            errors.push(ValidationError::ConfidenceOutOfRange(self.confidence));
            self.confidence = self.confidence.clamp(0.0, 1.0);
        }
        if !self.has_codes() {
            errors.push(ValidationError::NoCodes);
        }
        errors
    }

    /// Fold another rule with the same grouping key into this one.
    ///
    /// Code and state sets are unioned, qualifiers are appended without
    /// duplicates, and confidence drops to the lower of the two.
    pub fn merge(&mut self, other: Rule) {
        self.procedure_codes.extend(other.procedure_codes);
        self.diagnosis_codes.extend(other.diagnosis_codes);
        self.excluded_states.extend(other.excluded_states);
        self.included_states.extend(other.included_states);
        self.applicable_plans.extend(other.applicable_plans);
        push_unique(&mut self.diagnosis_exceptions, other.diagnosis_exceptions);
        push_unique(&mut self.place_of_service_rules, other.place_of_service_rules);
        push_unique(&mut self.age_restrictions, other.age_restrictions);
        push_unique(&mut self.conditional_logic, other.conditional_logic);
        push_unique(&mut self.clinical_criteria, other.clinical_criteria);
        push_unique(&mut self.quantity_limits, other.quantity_limits);
        self.confidence = self.confidence.min(other.confidence);
        self.needs_narrative_review |= other.needs_narrative_review;
        if self.narrative_text.is_none() {
            self.narrative_text = other.narrative_text;
        }
        self.refresh_rule_type();
    }

    /// Fold structured narrative output back into the rule.
    pub fn apply_narrative(&mut self, response: &NarrativeResponse) {
        let criteria = response
            .conditions
            .iter()
            .chain(&response.clinical_requirements)
            .chain(&response.prior_treatments)
            .cloned()
            .collect();
        push_unique(&mut self.clinical_criteria, criteria);
        push_unique(&mut self.quantity_limits, response.quantity_limits.clone());
        if let Some(limits) = &response.age_limits
            && (limits.min_age.is_some() || limits.max_age.is_some())
        {
            push_unique(
                &mut self.age_restrictions,
                vec![AgeRestriction {
                    min_age: limits.min_age,
                    max_age: limits.max_age,
                    auth_requirement: AuthRequirement::Conditional,
                }],
            );
        }
        self.needs_narrative_review = false;
    }

    /// Every state code the rule mentions, in any qualifier.
    pub fn all_states(&self) -> impl Iterator<Item = &str> {
        self.excluded_states
            .iter()
            .chain(&self.included_states)
            .chain(self.conditional_logic.iter().flat_map(|l| &l.excluded_states))
            .map(String::as_str)
    }
}

fn push_unique<T: PartialEq>(into: &mut Vec<T>, items: Vec<T>) {
    for item in items {
        if !into.contains(&item) {
            into.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_with(codes: &[&str], confidence: f32) -> Rule {
        let mut rule = Rule::new("UHC", AuthRequirement::Required);
        rule.procedure_codes = codes.iter().map(|c| c.to_string()).collect();
        rule.confidence = confidence;
        rule
    }

    #[test]
    fn severity_order() {
        use AuthRequirement::*;
        let mut all = [NotRequired, Required, NotificationOnly, Conditional];
        all.sort_by_key(|a| std::cmp::Reverse(a.severity()));
        assert_eq!(all, [Required, Conditional, NotificationOnly, NotRequired]);
    }

    #[test]
    fn conditional_needs_authorization() {
        assert!(AuthRequirement::Required.needs_authorization());
        assert!(AuthRequirement::Conditional.needs_authorization());
        assert!(!AuthRequirement::NotificationOnly.needs_authorization());
        assert!(!AuthRequirement::NotRequired.needs_authorization());
    }

    #[test]
    fn merge_unions_codes_and_takes_min_confidence() {
        let mut a = rule_with(&["29826", "29827"], 0.9);
        let b = rule_with(&["29827", "29828"], 0.6);
        a.merge(b);
        assert_eq!(a.procedure_codes.len(), 3);
        assert_eq!(a.confidence, 0.6);
    }

    #[test]
    fn merge_deduplicates_qualifiers() {
        let pos = PlaceOfServiceRule {
            code: "11".into(),
            description: "Office".into(),
            requires_auth: false,
            qualifier: PosQualifier::Exempt,
        };
        let mut a = rule_with(&["29826"], 0.8);
        a.place_of_service_rules.push(pos.clone());
        let mut b = rule_with(&["29827"], 0.8);
        b.place_of_service_rules.push(pos);
        b.needs_narrative_review = true;
        a.merge(b);
        assert_eq!(a.place_of_service_rules.len(), 1);
        assert!(a.needs_narrative_review);
    }

    #[test]
    fn validate_rejects_missing_codes() {
        let rule = Rule::new("UHC", AuthRequirement::Required);
        assert_eq!(rule.validate(), Err(ValidationError::NoCodes));
    }

    #[test]
    fn validate_rejects_unknown_state() {
        let mut rule = rule_with(&["29826"], 0.8);
        rule.excluded_states.insert("ZZ".into());
        assert_eq!(
            rule.validate(),
            Err(ValidationError::UnknownState("ZZ".into()))
        );
    }

    #[test]
    fn sanitize_drops_bad_fields_and_reports_each() {
        let mut rule = rule_with(&["29826", "2982X"], 1.4);
        rule.diagnosis_codes.insert("C50.011".into());
        rule.diagnosis_codes.insert("c50".into());
        rule.excluded_states.insert("TX".into());
        rule.excluded_states.insert("QQ".into());
        let errors = rule.sanitize();
        assert_eq!(errors.len(), 4);
        assert_eq!(rule.procedure_codes.len(), 1);
        assert_eq!(rule.diagnosis_codes.len(), 1);
        assert!(rule.excluded_states.contains("TX"));
        assert_eq!(rule.confidence, 1.0);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn sanitize_replaces_non_finite_confidence() {
        for bad in [f32::NAN, f32::INFINITY] {
            let mut rule = rule_with(&["29826"], bad);
            let errors = rule.sanitize();
            assert!(matches!(errors[..], [ValidationError::ConfidenceOutOfRange(_)]));
            assert_eq!(rule.confidence, DEFAULT_CONFIDENCE);
            assert!(rule.validate().is_ok());
        }
    }

    #[test]
    fn sanitize_reports_when_nothing_is_left() {
        let mut rule = rule_with(&["bogus"], 0.5);
        let errors = rule.sanitize();
        assert!(errors.contains(&ValidationError::NoCodes));
    }

    #[test]
    fn rule_type_follows_codes() {
        let mut rule = rule_with(&["29826"], 0.8);
        rule.refresh_rule_type();
        assert_eq!(rule.rule_type, RuleType::CodeBased);

        rule.diagnosis_codes.insert("M17.11".into());
        rule.refresh_rule_type();
        assert_eq!(rule.rule_type, RuleType::Combination);

        rule.procedure_codes.clear();
        rule.refresh_rule_type();
        assert_eq!(rule.rule_type, RuleType::DiagnosisBased);

        rule.needs_narrative_review = true;
        rule.refresh_rule_type();
        assert_eq!(rule.rule_type, RuleType::Narrative);
    }

    #[test]
    fn age_bounds_are_inclusive() {
        let adult = AgeRestriction {
            min_age: Some(18),
            max_age: None,
            auth_requirement: AuthRequirement::Required,
        };
        assert!(adult.contains(18));
        assert!(!adult.contains(17));

        let child = AgeRestriction {
            min_age: None,
            max_age: Some(17),
            auth_requirement: AuthRequirement::Conditional,
        };
        assert!(child.contains(0));
        assert!(!child.contains(18));
    }

    #[test]
    fn wildcard_pos_matches_anything() {
        let review = PlaceOfServiceRule {
            code: POS_ANY.into(),
            description: "Site of service review".into(),
            requires_auth: true,
            qualifier: PosQualifier::SiteOfServiceReview,
        };
        assert!(review.matches("11"));
        assert!(review.matches("22"));
    }

    #[test]
    fn rule_json_roundtrip() {
        let mut rule = rule_with(&["29826", "RANGE_70010_70015"], 0.8);
        rule.excluded_states.insert("TX".into());
        rule.source = SourceRef {
            file: "uhc.md".into(),
            page: 3,
            line: 42,
        };
        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("\"REQUIRED\""));
        let parsed: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rule);
    }
}
