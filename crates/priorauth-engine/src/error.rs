use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluateError {
    #[error("query has no procedure codes")]
    NoProcedureCodes,

    #[error("unknown state code: {0}")]
    UnknownState(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleSetError {
    #[error("duplicate rule id: {0}")]
    DuplicateRuleId(String),
}
