pub mod codes;
pub mod config;
pub mod hyperedge;
pub mod narrative;
pub mod rule;
pub mod section;
pub mod states;

pub use config::{Config, ConfigError};
pub use hyperedge::{Hyperedge, HyperedgeError};
pub use narrative::{NarrativeRequest, NarrativeResponse, PromptKind};
pub use rule::{
    AgeRestriction, AuthRequirement, ConditionalLogic, DiagnosisException, ExceptionType,
    PlaceOfServiceRule, PosQualifier, Rule, RuleType, SourceRef, ValidationError,
};
pub use section::{AuthSignal, Classification, ContentType, ExtractionHints, Section};
