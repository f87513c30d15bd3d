//! Document sections and their classification.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::rule::AuthRequirement;

/// Hierarchy label for text that appears before the first header.
pub const DEFAULT_SECTION: &str = "Document Content";

/// A contiguous run of body text under one header path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Header titles from outermost to innermost.
    pub hierarchy_path: Vec<String>,
    pub text: String,
    /// Byte offset of the section's first body line in the document.
    pub start_offset: usize,
    /// Zero-based line index of the first body line.
    pub start_line: usize,
    /// Page number from the most recent `Page N` marker, starting at 1.
    pub page: u32,
}

impl Section {
    /// Header path joined with ` > ` for logs and warnings.
    pub fn path_label(&self) -> String {
        self.hierarchy_path.join(" > ")
    }

    /// True when the section sits under the synthetic default header.
    pub fn is_default(&self) -> bool {
        self.hierarchy_path.len() == 1 && self.hierarchy_path[0] == DEFAULT_SECTION
    }
}

/// What kind of content a section holds.
///
/// Declaration order is the classifier's tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    AuthorizationRule,
    GeographicException,
    ProcedureList,
    ContextInfo,
}

impl ContentType {
    pub const ALL: [ContentType; 4] = [
        Self::AuthorizationRule,
        Self::GeographicException,
        Self::ProcedureList,
        Self::ContextInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationRule => "authorization_rule",
            Self::GeographicException => "geographic_exception",
            Self::ProcedureList => "procedure_list",
            Self::ContextInfo => "context_info",
        }
    }

    /// Sections of these types produce rules of their own.
    pub fn yields_rules(&self) -> bool {
        matches!(self, Self::AuthorizationRule | Self::ProcedureList)
    }
}

/// Strongest authorization phrase found in a piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthSignal {
    Required,
    NotRequired,
    Notification,
    #[default]
    Unknown,
}

impl AuthSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::NotRequired => "not_required",
            Self::Notification => "notification",
            Self::Unknown => "unknown",
        }
    }

    /// The rule requirement this signal implies. No signal means `Conditional`.
    pub fn to_requirement(self) -> AuthRequirement {
        match self {
            Self::Required => AuthRequirement::Required,
            Self::NotRequired => AuthRequirement::NotRequired,
            Self::Notification => AuthRequirement::NotificationOnly,
            Self::Unknown => AuthRequirement::Conditional,
        }
    }
}

/// Cheap pre-scan of a section, used as a fallback when full extraction fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionHints {
    pub procedure_codes: BTreeSet<String>,
    pub state_codes: BTreeSet<String>,
    pub diagnosis_codes: BTreeSet<String>,
    pub auth_signal: AuthSignal,
}

impl ExtractionHints {
    pub fn has_codes(&self) -> bool {
        !self.procedure_codes.is_empty() || !self.diagnosis_codes.is_empty()
    }
}

/// Classifier output for one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub content_type: ContentType,
    pub confidence: f32,
    pub hints: ExtractionHints,
}
