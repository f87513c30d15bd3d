use priorauth_core::rule::AuthRequirement;
use serde::{Deserialize, Serialize};

/// Patient and procedure context for one authorization question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationQuery {
    pub procedure_codes: Vec<String>,
    #[serde(default)]
    pub diagnosis_codes: Vec<String>,
    pub age: Option<u32>,
    /// Two-letter state or territory code.
    pub state: Option<String>,
    /// CMS place-of-service code, e.g. `11` for office.
    pub place_of_service: Option<String>,
    pub provider_specialty: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub auth_required: bool,
    pub auth_requirement: AuthRequirement,
    pub confidence: f32,
    pub primary_reason: String,
    pub matched_rules: Vec<String>,
    pub reasoning_trail: Vec<String>,
}
