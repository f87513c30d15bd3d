//! Hand-off types for narrative rules that need an external structuring pass.
//!
//! Rules flagged with `needs_narrative_review` carry their source prose
//! verbatim. A [`NarrativeRequest`] packages that prose with a prompt; the
//! external service answers with a [`NarrativeResponse`] that is folded back
//! into the rule via [`Rule::apply_narrative`](crate::Rule::apply_narrative).

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::rule::Rule;

/// Which question to ask of the narrative text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    ClinicalCriteria,
    StateExceptions,
    ComplexRule,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClinicalCriteria => "clinical_criteria",
            Self::StateExceptions => "state_exceptions",
            Self::ComplexRule => "complex_rule",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            Self::ClinicalCriteria => {
                "Extract clinical criteria from the following prior authorization text:\n\n\
                 Text: {narrative_text}\n\n\
                 Return a JSON object with:\n\
                 - conditions: medical conditions or diagnoses required\n\
                 - age_limits: any age-based requirements (min_age, max_age)\n\
                 - quantity_limits: limits on frequency or quantity\n\
                 - clinical_requirements: specific clinical criteria that must be met\n\
                 - prior_treatments: required prior treatments or step therapy\n"
            }
            Self::StateExceptions => {
                "Identify state-specific exceptions in the following text:\n\n\
                 Text: {narrative_text}\n\n\
                 Return a JSON object with:\n\
                 - excluded_states: two-letter codes where the rule does not apply\n\
                 - included_states: two-letter codes where the rule only applies\n"
            }
            Self::ComplexRule => {
                "Parse this prior authorization rule for {payer} ({category}):\n\n\
                 Text: {narrative_text}\n\n\
                 Return a JSON object with the authorization requirement, the \
                 conditions under which it applies, and any exceptions.\n"
            }
        }
    }

    /// Fill the template for one rule.
    pub fn render(&self, rule: &Rule, narrative_text: &str) -> String {
        self.template()
            .replace("{payer}", &rule.payer)
            .replace("{category}", rule.category.as_deref().unwrap_or("general"))
            .replace("{narrative_text}", narrative_text)
    }
}

/// One narrative rule sent out for structuring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeRequest {
    pub rule_id: String,
    pub payer: String,
    pub category: Option<String>,
    pub service: Option<String>,
    pub procedure_codes: Vec<String>,
    pub narrative_text: String,
    pub prompt_kind: PromptKind,
    pub prompt: String,
    /// ISO 8601 timestamp string.
    pub requested_at: String,
}

impl NarrativeRequest {
    /// Build a request for a rule that carries narrative text.
    ///
    /// Returns `None` for rules without narrative text.
    pub fn for_rule(rule: &Rule, kind: PromptKind) -> Option<Self> {
        let text = rule.narrative_text.as_deref()?;
        Some(Self {
            rule_id: rule.rule_id.clone(),
            payer: rule.payer.clone(),
            category: rule.category.clone(),
            service: rule.service.clone(),
            procedure_codes: rule.procedure_codes.iter().cloned().collect(),
            narrative_text: text.to_string(),
            prompt_kind: kind,
            prompt: kind.render(rule, text),
            requested_at: Utc::now().to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeLimits {
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
}

/// Structured interpretation returned by the external service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NarrativeResponse {
    pub rule_id: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    pub age_limits: Option<AgeLimits>,
    #[serde(default)]
    pub quantity_limits: Vec<String>,
    #[serde(default)]
    pub clinical_requirements: Vec<String>,
    #[serde(default)]
    pub prior_treatments: Vec<String>,
    pub model: Option<String>,
    /// ISO 8601 timestamp string.
    pub structured_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::AuthRequirement;

    fn narrative_rule() -> Rule {
        let mut rule = Rule::new("UHC", AuthRequirement::Conditional);
        rule.rule_id = "uhc-0001".into();
        rule.category = Some("Spine Surgery".into());
        rule.procedure_codes.insert("22630".into());
        rule.needs_narrative_review = true;
        rule.narrative_text = Some("Patient must meet the following criteria".into());
        rule
    }

    #[test]
    fn request_carries_narrative_verbatim() {
        let rule = narrative_rule();
        let req = NarrativeRequest::for_rule(&rule, PromptKind::ClinicalCriteria).unwrap();
        assert_eq!(req.rule_id, "uhc-0001");
        assert_eq!(req.narrative_text, "Patient must meet the following criteria");
        assert!(req.prompt.contains("Patient must meet the following criteria"));
        assert_eq!(req.procedure_codes, ["22630"]);
    }

    #[test]
    fn complex_prompt_names_payer_and_category() {
        let rule = narrative_rule();
        let req = NarrativeRequest::for_rule(&rule, PromptKind::ComplexRule).unwrap();
        assert!(req.prompt.contains("UHC (Spine Surgery)"));
    }

    #[test]
    fn no_request_without_narrative() {
        let mut rule = narrative_rule();
        rule.narrative_text = None;
        assert!(NarrativeRequest::for_rule(&rule, PromptKind::ClinicalCriteria).is_none());
    }

    #[test]
    fn response_parses_with_missing_lists() {
        let json = r#"{
            "rule_id": "uhc-0001",
            "conditions": ["chronic pain"],
            "age_limits": {"min_age": 18, "max_age": null},
            "model": null,
            "structured_at": null
        }"#;
        let resp: NarrativeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.conditions, ["chronic pain"]);
        assert!(resp.prior_treatments.is_empty());
        assert_eq!(resp.age_limits.unwrap().min_age, Some(18));
    }

    #[test]
    fn applying_response_clears_review_flag() {
        let mut rule = narrative_rule();
        let resp = NarrativeResponse {
            rule_id: "uhc-0001".into(),
            conditions: vec!["chronic pain".into()],
            prior_treatments: vec!["6 weeks physical therapy".into()],
            quantity_limits: vec!["2 per year".into()],
            age_limits: Some(AgeLimits {
                min_age: Some(18),
                max_age: None,
            }),
            ..Default::default()
        };
        rule.apply_narrative(&resp);
        assert!(!rule.needs_narrative_review);
        assert_eq!(rule.clinical_criteria.len(), 2);
        assert_eq!(rule.quantity_limits, ["2 per year"]);
        assert_eq!(rule.age_restrictions[0].min_age, Some(18));
    }
}
