//! Sync layer: sends narrative rules out for structuring and folds the
//! answers back into the rule set.

mod apply;
#[cfg(feature = "http")]
pub mod http;

pub use apply::{ApplySummary, apply_responses, pending_requests};
#[cfg(feature = "http")]
pub use http::{NarrativeClient, NarrativeError};
