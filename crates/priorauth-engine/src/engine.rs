//! Rule evaluation.
//!
//! Each candidate rule produces one [`Decision`] from the first qualifier
//! that applies, checked in a fixed order: geography, diagnosis exemption,
//! place of service, age, then the rule's own requirement (or, for a known
//! state, the requirement of its conditional scope). The most severe
//! decision wins; among equals, the most confident one, then the earliest.

use std::collections::BTreeSet;

use priorauth_core::config::EvaluationConfig;
use priorauth_core::rule::{AuthRequirement, POS_ANY, Rule};
use priorauth_core::states;
use serde::Serialize;
use tracing::debug;

use crate::error::EvaluateError;
use crate::query::{EvaluationQuery, EvaluationResult};
use crate::ruleset::RuleSet;

const NO_MATCH_REASON: &str = "no applicable rules found";

/// The outcome of a single rule for a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub rule_id: String,
    pub auth_requirement: AuthRequirement,
    pub confidence: f32,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct EvaluationEngine {
    no_match_confidence: f32,
    default_rule_confidence: f32,
}

impl Default for EvaluationEngine {
    fn default() -> Self {
        Self::new(&EvaluationConfig::default())
    }
}

impl EvaluationEngine {
    pub fn new(config: &EvaluationConfig) -> Self {
        Self {
            no_match_confidence: config.no_match_confidence.clamp(0.3, 0.5),
            default_rule_confidence: config.default_rule_confidence,
        }
    }

    pub fn evaluate(
        &self,
        rules: &RuleSet,
        query: &EvaluationQuery,
    ) -> Result<EvaluationResult, EvaluateError> {
        if query.procedure_codes.iter().all(|c| c.trim().is_empty()) {
            return Err(EvaluateError::NoProcedureCodes);
        }
        let state = match query.state.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => {
                let upper = s.to_ascii_uppercase();
                if !states::is_canonical(&upper) {
                    return Err(EvaluateError::UnknownState(s.to_string()));
                }
                Some(upper)
            }
            _ => None,
        };
        let codes: Vec<&str> = query.procedure_codes.iter().map(|c| c.trim()).collect();

        let candidates = rules.candidates(&codes);
        let mut reasoning_trail = Vec::with_capacity(candidates.len() + 1);
        if let Some(specialty) = &query.provider_specialty {
            reasoning_trail.push(format!("provider specialty: {specialty}"));
        }

        if candidates.is_empty() {
            debug!(codes = ?codes, "no candidate rules");
            reasoning_trail.push(NO_MATCH_REASON.to_string());
            return Ok(EvaluationResult {
                auth_required: false,
                auth_requirement: AuthRequirement::NotRequired,
                confidence: self.no_match_confidence,
                primary_reason: NO_MATCH_REASON.to_string(),
                matched_rules: Vec::new(),
                reasoning_trail,
            });
        }

        let decisions: Vec<Decision> = candidates
            .iter()
            .map(|rule| self.decide(rule, query, state.as_deref()))
            .collect();
        for d in &decisions {
            reasoning_trail.push(format!(
                "{}: {} -> {} ({:.2})",
                d.rule_id, d.reason, d.auth_requirement, d.confidence
            ));
        }

        let winner = decisions.iter().fold(&decisions[0], |best, d| {
            if outranks(d, best) { d } else { best }
        });
        debug!(
            candidates = decisions.len(),
            rule = %winner.rule_id,
            requirement = %winner.auth_requirement,
            "evaluated query"
        );

        Ok(EvaluationResult {
            auth_required: winner.auth_requirement.needs_authorization(),
            auth_requirement: winner.auth_requirement,
            confidence: winner.confidence,
            primary_reason: winner.reason.clone(),
            matched_rules: decisions.iter().map(|d| d.rule_id.clone()).collect(),
            reasoning_trail,
        })
    }

    /// The first applicable qualifier of `rule` for this query.
    pub fn decide(&self, rule: &Rule, query: &EvaluationQuery, state: Option<&str>) -> Decision {
        let decision = |auth_requirement, confidence, reason: String| Decision {
            rule_id: rule.rule_id.clone(),
            auth_requirement,
            confidence,
            reason,
        };

        if let Some(state) = state {
            if rule.excluded_states.contains(state) {
                return decision(
                    AuthRequirement::NotRequired,
                    1.0,
                    format!("geographic exclusion: {state}"),
                );
            }
            if rule
                .conditional_logic
                .iter()
                .any(|l| l.excluded_states.contains(state))
            {
                return decision(
                    AuthRequirement::NotRequired,
                    1.0,
                    format!("conditional exception: {state}"),
                );
            }
            if !rule.included_states.is_empty() && !rule.included_states.contains(state) {
                let scope = join(&rule.included_states);
                return decision(
                    AuthRequirement::NotRequired,
                    1.0,
                    format!("geographic limitation: applies only in {scope}"),
                );
            }
        }

        if let Some(code) = query.diagnosis_codes.iter().find(|dx| {
            rule.diagnosis_exceptions
                .iter()
                .any(|e| e.codes.contains(dx.trim()))
        }) {
            return decision(
                AuthRequirement::NotRequired,
                0.9,
                format!("diagnosis exemption: {}", code.trim()),
            );
        }

        if let Some(pos) = query.place_of_service.as_deref().map(str::trim)
            && let Some(entry) = rule
                .place_of_service_rules
                .iter()
                .find(|p| p.code == pos)
                .or_else(|| rule.place_of_service_rules.iter().find(|p| p.code == POS_ANY))
        {
            let requirement = if entry.requires_auth {
                AuthRequirement::Required
            } else {
                AuthRequirement::NotRequired
            };
            return decision(requirement, 0.9, format!("place of service {}", entry.code));
        }

        if let Some(age) = query.age
            && let Some(restriction) = rule.age_restrictions.iter().find(|r| r.contains(age))
        {
            return decision(
                restriction.auth_requirement,
                0.8,
                format!("age restriction: {age}"),
            );
        }

        let confidence = if rule.confidence > 0.0 && rule.confidence <= 1.0 {
            rule.confidence
        } else {
            self.default_rule_confidence
        };
        // A state outside every conditional's exception list takes the
        // conditional's requirement in place of the rule's own.
        if let Some(state) = state
            && let Some(logic) = rule.conditional_logic.first()
        {
            return decision(
                logic.result_auth_requirement,
                confidence,
                format!("conditional scope: {state}"),
            );
        }
        decision(rule.auth_requirement, confidence, "base rule".to_string())
    }
}

/// Strictly more severe, or equally severe and strictly more confident.
fn outranks(a: &Decision, b: &Decision) -> bool {
    let (sa, sb) = (a.auth_requirement.severity(), b.auth_requirement.severity());
    sa > sb || (sa == sb && a.confidence > b.confidence)
}

fn join(states: &BTreeSet<String>) -> String {
    states.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use priorauth_core::rule::{
        AgeRestriction, ConditionalLogic, DiagnosisException, ExceptionType, PlaceOfServiceRule,
        PosQualifier,
    };

    fn rule(id: &str, codes: &[&str], auth: AuthRequirement) -> Rule {
        let mut r = Rule::new("UHC", auth);
        r.rule_id = id.into();
        r.procedure_codes = codes.iter().map(|c| c.to_string()).collect();
        r.confidence = 0.85;
        r
    }

    fn query(codes: &[&str]) -> EvaluationQuery {
        EvaluationQuery {
            procedure_codes: codes.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    fn engine() -> EvaluationEngine {
        EvaluationEngine::default()
    }

    fn set_of(rules: Vec<Rule>) -> RuleSet {
        RuleSet::new(rules).unwrap()
    }

    #[test]
    fn base_rule_requires_auth() {
        let set = set_of(vec![rule("r1", &["29826", "29827"], AuthRequirement::Required)]);
        let result = engine().evaluate(&set, &query(&["29826"])).unwrap();
        assert!(result.auth_required);
        assert_eq!(result.auth_requirement, AuthRequirement::Required);
        assert_eq!(result.confidence, 0.85);
        assert_eq!(result.primary_reason, "base rule");
        assert_eq!(result.matched_rules, ["r1"]);
    }

    #[test]
    fn excluded_state_is_not_required() {
        let mut r = rule("r1", &["70450"], AuthRequirement::Required);
        r.excluded_states.insert("TX".into());
        let set = set_of(vec![r]);
        let mut q = query(&["70450"]);
        q.state = Some("tx".into());
        let result = engine().evaluate(&set, &q).unwrap();
        assert!(!result.auth_required);
        assert_eq!(result.confidence, 1.0);
        assert!(result.primary_reason.contains("geographic exclusion"));
    }

    #[test]
    fn conditional_exception_for_listed_state() {
        let mut r = rule("r1", &["12345"], AuthRequirement::Required);
        r.conditional_logic.push(ConditionalLogic {
            excluded_states: ["AK", "TX"].iter().map(|s| s.to_string()).collect(),
            result_auth_requirement: AuthRequirement::Required,
        });
        let set = set_of(vec![r]);

        let mut q = query(&["12345"]);
        q.state = Some("TX".into());
        let result = engine().evaluate(&set, &q).unwrap();
        assert!(!result.auth_required);
        assert!(result.reasoning_trail.iter().any(|t| t.contains("conditional exception")));

        q.state = Some("CA".into());
        let result = engine().evaluate(&set, &q).unwrap();
        assert!(result.auth_required);
    }

    #[test]
    fn conditional_scope_overrides_base_outside_listed_states() {
        let mut r = rule("r1", &["12345"], AuthRequirement::Conditional);
        r.conditional_logic.push(ConditionalLogic {
            excluded_states: ["TX".to_string()].into_iter().collect(),
            result_auth_requirement: AuthRequirement::Required,
        });
        let set = set_of(vec![r]);

        let mut q = query(&["12345"]);
        q.state = Some("CA".into());
        let result = engine().evaluate(&set, &q).unwrap();
        assert_eq!(result.auth_requirement, AuthRequirement::Required);
        assert_eq!(result.primary_reason, "conditional scope: CA");

        q.state = Some("TX".into());
        let result = engine().evaluate(&set, &q).unwrap();
        assert_eq!(result.auth_requirement, AuthRequirement::NotRequired);

        q.state = None;
        let result = engine().evaluate(&set, &q).unwrap();
        assert_eq!(result.auth_requirement, AuthRequirement::Conditional);
        assert_eq!(result.primary_reason, "base rule");
    }

    #[test]
    fn qualifiers_still_apply_within_conditional_scope() {
        let mut r = rule("r1", &["12345"], AuthRequirement::Conditional);
        r.conditional_logic.push(ConditionalLogic {
            excluded_states: ["TX".to_string()].into_iter().collect(),
            result_auth_requirement: AuthRequirement::Required,
        });
        r.diagnosis_exceptions.push(DiagnosisException {
            codes: ["Z00.00".to_string()].into_iter().collect(),
            exception_type: ExceptionType::Exempt,
            description: String::new(),
        });
        let set = set_of(vec![r]);

        let mut q = query(&["12345"]);
        q.state = Some("CA".into());
        q.diagnosis_codes = vec!["Z00.00".into()];
        let result = engine().evaluate(&set, &q).unwrap();
        assert_eq!(result.auth_requirement, AuthRequirement::NotRequired);
        assert!(result.primary_reason.starts_with("diagnosis exemption"));
    }

    #[test]
    fn state_outside_included_states() {
        let mut r = rule("r1", &["12345"], AuthRequirement::Required);
        r.included_states.insert("NY".into());
        let set = set_of(vec![r]);
        let mut q = query(&["12345"]);
        q.state = Some("NJ".into());
        let result = engine().evaluate(&set, &q).unwrap();
        assert!(!result.auth_required);
        assert!(result.primary_reason.starts_with("geographic limitation"));

        q.state = Some("NY".into());
        assert!(engine().evaluate(&set, &q).unwrap().auth_required);
    }

    #[test]
    fn diagnosis_exemption() {
        let mut r = rule("r1", &["77301"], AuthRequirement::Required);
        r.diagnosis_exceptions.push(DiagnosisException {
            codes: ["C50.011".to_string()].into_iter().collect(),
            exception_type: ExceptionType::Exempt,
            description: String::new(),
        });
        let set = set_of(vec![r]);
        let mut q = query(&["77301"]);
        q.diagnosis_codes = vec!["C50.011".into()];
        let result = engine().evaluate(&set, &q).unwrap();
        assert!(!result.auth_required);
        assert_eq!(result.confidence, 0.9);
        assert!(result.primary_reason.contains("diagnosis exemption"));
    }

    #[test]
    fn exact_pos_beats_wildcard() {
        let mut r = rule("r1", &["29826"], AuthRequirement::Required);
        r.place_of_service_rules.push(PlaceOfServiceRule {
            code: POS_ANY.into(),
            description: String::new(),
            requires_auth: true,
            qualifier: PosQualifier::SiteOfServiceReview,
        });
        r.place_of_service_rules.push(PlaceOfServiceRule {
            code: "11".into(),
            description: "Office".into(),
            requires_auth: false,
            qualifier: PosQualifier::Exempt,
        });
        let set = set_of(vec![r]);

        let mut q = query(&["29826"]);
        q.place_of_service = Some("11".into());
        let result = engine().evaluate(&set, &q).unwrap();
        assert_eq!(result.auth_requirement, AuthRequirement::NotRequired);
        assert_eq!(result.confidence, 0.9);

        q.place_of_service = Some("22".into());
        let result = engine().evaluate(&set, &q).unwrap();
        assert_eq!(result.auth_requirement, AuthRequirement::Required);
    }

    #[test]
    fn age_outside_restriction_falls_through_to_base() {
        let mut r = rule("r1", &["97110"], AuthRequirement::Required);
        r.age_restrictions.push(AgeRestriction {
            min_age: Some(18),
            max_age: None,
            auth_requirement: AuthRequirement::NotificationOnly,
        });
        let set = set_of(vec![r]);

        let mut q = query(&["97110"]);
        q.age = Some(10);
        let result = engine().evaluate(&set, &q).unwrap();
        assert_eq!(result.primary_reason, "base rule");
        assert_eq!(result.auth_requirement, AuthRequirement::Required);

        q.age = Some(30);
        let result = engine().evaluate(&set, &q).unwrap();
        assert_eq!(result.auth_requirement, AuthRequirement::NotificationOnly);
        assert_eq!(result.confidence, 0.8);
    }

    #[test]
    fn no_match_is_low_confidence_not_required() {
        let set = set_of(vec![rule("r1", &["29826"], AuthRequirement::Required)]);
        let result = engine().evaluate(&set, &query(&["99213"])).unwrap();
        assert!(!result.auth_required);
        assert!(result.confidence <= 0.5);
        assert_eq!(result.primary_reason, "no applicable rules found");
        assert!(result.matched_rules.is_empty());
    }

    #[test]
    fn empty_codes_rejected() {
        let set = RuleSet::default();
        assert_eq!(
            engine().evaluate(&set, &query(&[])),
            Err(EvaluateError::NoProcedureCodes)
        );
    }

    #[test]
    fn unknown_state_rejected() {
        let set = RuleSet::default();
        let mut q = query(&["29826"]);
        q.state = Some("ZZ".into());
        assert_eq!(
            engine().evaluate(&set, &q),
            Err(EvaluateError::UnknownState("ZZ".into()))
        );
    }

    #[test]
    fn most_severe_rule_wins() {
        let notify = rule("notify", &["29826"], AuthRequirement::NotificationOnly);
        let mut cond = rule("cond", &["29826"], AuthRequirement::Conditional);
        cond.confidence = 0.5;
        let set = set_of(vec![notify, cond]);
        let result = engine().evaluate(&set, &query(&["29826"])).unwrap();
        assert_eq!(result.auth_requirement, AuthRequirement::Conditional);
        assert!(result.auth_required);
        assert_eq!(result.matched_rules.len(), 2);
        assert_eq!(result.reasoning_trail.len(), 2);
    }

    #[test]
    fn ties_go_to_higher_confidence() {
        let mut low = rule("low", &["29826"], AuthRequirement::Required);
        low.confidence = 0.6;
        let high = rule("high", &["29826"], AuthRequirement::Required);
        let set = set_of(vec![low, high]);
        let result = engine().evaluate(&set, &query(&["29826"])).unwrap();
        assert_eq!(result.confidence, 0.85);
    }

    #[test]
    fn range_rule_matches_numeric_code() {
        let set = set_of(vec![rule("r1", &["RANGE_70010_70015"], AuthRequirement::Required)]);
        let result = engine().evaluate(&set, &query(&["70012"])).unwrap();
        assert!(result.auth_required);
    }

    #[test]
    fn zero_confidence_uses_default() {
        let mut r = rule("r1", &["29826"], AuthRequirement::Required);
        r.confidence = 0.0;
        let set = set_of(vec![r]);
        let result = engine().evaluate(&set, &query(&["29826"])).unwrap();
        assert_eq!(result.confidence, 0.7);
    }

    #[test]
    fn specialty_recorded_in_trail() {
        let set = RuleSet::default();
        let mut q = query(&["29826"]);
        q.provider_specialty = Some("Orthopedics".into());
        let result = engine().evaluate(&set, &q).unwrap();
        assert_eq!(result.reasoning_trail[0], "provider specialty: Orthopedics");
    }

    #[test]
    fn result_serializes() {
        let set = set_of(vec![rule("r1", &["29826"], AuthRequirement::Required)]);
        let result = engine().evaluate(&set, &query(&["29826"])).unwrap();
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"auth_requirement\":\"REQUIRED\""));
        let back: EvaluationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
