//! Hyperedge view of a rule for graph stores.
//!
//! One rule becomes one hyperedge connecting payer, category, service, codes,
//! states and plans. Everything a rule carries is kept in `properties`, so
//! [`Rule::from_hyperedge`] reconstructs the rule exactly.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rule::{
    AgeRestriction, AuthRequirement, ConditionalLogic, DiagnosisException, PlaceOfServiceRule,
    Rule, RuleType, SourceRef,
};

pub const EDGE_TYPE: &str = "authorization_rule";

#[derive(Debug, Error)]
pub enum HyperedgeError {
    #[error("unexpected hyperedge type: {0}")]
    WrongType(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperedge {
    pub id: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub auth_requirement: AuthRequirement,
    pub nodes: HyperedgeNodes,
    pub properties: HyperedgeProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperedgeNodes {
    pub payer: String,
    pub category: Option<String>,
    pub service: Option<String>,
    pub procedure_codes: Vec<String>,
    pub diagnosis_codes: Vec<String>,
    /// Excluded and included states together.
    pub states: Vec<String>,
    pub plans: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperedgeProperties {
    pub rule_type: RuleType,
    pub confidence: f32,
    pub excluded_states: Vec<String>,
    pub included_states: Vec<String>,
    pub diagnosis_exceptions: Vec<DiagnosisException>,
    pub place_of_service_rules: Vec<PlaceOfServiceRule>,
    pub age_restrictions: Vec<AgeRestriction>,
    pub conditional_logic: Vec<ConditionalLogic>,
    pub clinical_criteria: Vec<String>,
    pub quantity_limits: Vec<String>,
    pub narrative_text: Option<String>,
    pub needs_narrative_review: bool,
    pub extracted_at: String,
    pub source: SourceRef,
}

impl Rule {
    /// Identifier used on export: the rule id, or
    /// `<payer>_<category>_<first three codes>` when the rule has none.
    pub fn hyperedge_id(&self) -> String {
        if !self.rule_id.is_empty() {
            return self.rule_id.clone();
        }
        let codes: Vec<&str> = self
            .procedure_codes
            .iter()
            .take(3)
            .map(String::as_str)
            .collect();
        format!(
            "{}_{}_{}",
            self.payer,
            self.category.as_deref().unwrap_or("general"),
            codes.join("-")
        )
    }

    pub fn to_hyperedge(&self) -> Hyperedge {
        let states: BTreeSet<&String> = self
            .excluded_states
            .iter()
            .chain(&self.included_states)
            .collect();
        Hyperedge {
            id: self.hyperedge_id(),
            edge_type: EDGE_TYPE.to_string(),
            auth_requirement: self.auth_requirement,
            nodes: HyperedgeNodes {
                payer: self.payer.clone(),
                category: self.category.clone(),
                service: self.service.clone(),
                procedure_codes: self.procedure_codes.iter().cloned().collect(),
                diagnosis_codes: self.diagnosis_codes.iter().cloned().collect(),
                states: states.into_iter().cloned().collect(),
                plans: self.applicable_plans.iter().cloned().collect(),
            },
            properties: HyperedgeProperties {
                rule_type: self.rule_type,
                confidence: self.confidence,
                excluded_states: self.excluded_states.iter().cloned().collect(),
                included_states: self.included_states.iter().cloned().collect(),
                diagnosis_exceptions: self.diagnosis_exceptions.clone(),
                place_of_service_rules: self.place_of_service_rules.clone(),
                age_restrictions: self.age_restrictions.clone(),
                conditional_logic: self.conditional_logic.clone(),
                clinical_criteria: self.clinical_criteria.clone(),
                quantity_limits: self.quantity_limits.clone(),
                narrative_text: self.narrative_text.clone(),
                needs_narrative_review: self.needs_narrative_review,
                extracted_at: self.extracted_at.clone(),
                source: self.source.clone(),
            },
        }
    }

    pub fn from_hyperedge(edge: Hyperedge) -> Result<Rule, HyperedgeError> {
        if edge.edge_type != EDGE_TYPE {
            return Err(HyperedgeError::WrongType(edge.edge_type));
        }
        let Hyperedge {
            id,
            auth_requirement,
            nodes,
            properties: p,
            ..
        } = edge;
        Ok(Rule {
            rule_id: id,
            rule_type: p.rule_type,
            auth_requirement,
            payer: nodes.payer,
            category: nodes.category,
            service: nodes.service,
            procedure_codes: nodes.procedure_codes.into_iter().collect(),
            diagnosis_codes: nodes.diagnosis_codes.into_iter().collect(),
            excluded_states: p.excluded_states.into_iter().collect(),
            included_states: p.included_states.into_iter().collect(),
            applicable_plans: nodes.plans.into_iter().collect(),
            diagnosis_exceptions: p.diagnosis_exceptions,
            place_of_service_rules: p.place_of_service_rules,
            age_restrictions: p.age_restrictions,
            conditional_logic: p.conditional_logic,
            clinical_criteria: p.clinical_criteria,
            quantity_limits: p.quantity_limits,
            source: p.source,
            confidence: p.confidence,
            narrative_text: p.narrative_text,
            needs_narrative_review: p.needs_narrative_review,
            extracted_at: p.extracted_at,
        })
    }
}
