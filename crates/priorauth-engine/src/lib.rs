//! Evaluation: pick the rules that apply to a query and resolve them into
//! one decision with a reasoning trail.

mod engine;
mod error;
mod query;
mod repository;
mod ruleset;

pub use engine::{Decision, EvaluationEngine};
pub use error::{EvaluateError, RuleSetError};
pub use query::{EvaluationQuery, EvaluationResult};
pub use repository::RuleRepository;
pub use ruleset::RuleSet;
