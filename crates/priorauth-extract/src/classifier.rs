//! Weighted pattern-family classification of sections.
//!
//! Each family is a list of patterns; a family's count is the number of its
//! patterns that match somewhere in the section. Scores per content type:
//!
//! | type                   | score                        |
//! |------------------------|------------------------------|
//! | `authorization_rule`   | `2 * auth + code`            |
//! | `geographic_exception` | `2 * exception + geography`  |
//! | `procedure_list`       | `2 * code`                   |
//! | `context_info`         | `1`                          |
//!
//! The highest score wins; ties go to the earlier type in the table.

use priorauth_core::section::{Classification, ContentType, ExtractionHints, Section};
use regex::Regex;
use serde::Serialize;

use crate::error::ExtractError;
use crate::patterns::{AuthPatterns, CodePatterns, compile};

const MAX_CONFIDENCE: f32 = 0.95;
const CONTEXT_ONLY_CONFIDENCE: f32 = 0.5;
const BOOST_THRESHOLD: u32 = 3;
const BOOST: f32 = 0.2;

pub struct Classifier {
    auth: Vec<Regex>,
    exception: Vec<Regex>,
    code: Vec<Regex>,
    geography: Vec<Regex>,
    codes: CodePatterns,
    auth_signal: AuthPatterns,
}

impl Classifier {
    pub fn new() -> Result<Self, ExtractError> {
        Ok(Self {
            auth: compile(&[
                r"(?i)prior authorization.*required",
                r"(?i)requires.*prior auth",
                r"(?i)auth.*required",
                r"(?i)must obtain.*authorization",
                r"(?i)authorization.*necessary",
                r"(?i)\bPA required",
                r"(?i)prior auth.*needed",
            ])?,
            exception: compile(&[
                r"(?i)exception",
                r"(?i)excluded.*from",
                r"(?i)does not apply",
                r"(?i)not required.*for",
                r"(?i)exempt.*from",
                r"(?i)excluding",
                r"(?i)except for",
            ])?,
            code: compile(&[
                r"(?i)cpt.*code",
                r"(?i)procedure.*code",
                r"(?i)hcpcs",
                r"\b\d{5}\b",
                r"\b\d{5}-\d{5}\b",
                r"\b\d{5}(?:,\s*\d{5})+\b",
            ])?,
            geography: compile(&[
                r"(?i)state",
                r"(?i)geographic",
                r"(?i)region",
                r"(?i)location",
                r"\b(?:AL|AK|AZ|AR|CA|CO|CT|DE|FL|GA|HI|ID|IL|IN|IA|KS|KY|LA|ME|MD|MA|MI|MN|MS|MO|MT|NE|NV|NH|NJ|NM|NY|NC|ND|OH|OK|OR|PA|RI|SC|SD|TN|TX|UT|VT|VA|WA|WV|WI|WY|DC|PR|VI|GU|AS|MP)\b",
            ])?,
            codes: CodePatterns::new()?,
            auth_signal: AuthPatterns::new()?,
        })
    }

    pub fn classify(&self, section: &Section) -> Classification {
        let text = section.text.as_str();
        let count = |family: &[Regex]| family.iter().filter(|re| re.is_match(text)).count() as u32;
        let auth = count(&self.auth);
        let exception = count(&self.exception);
        let code = count(&self.code);
        let geography = count(&self.geography);

        let scores = [
            (ContentType::AuthorizationRule, 2 * auth + code),
            (ContentType::GeographicException, 2 * exception + geography),
            (ContentType::ProcedureList, 2 * code),
            (ContentType::ContextInfo, 1),
        ];

        // Strictly-greater replacement keeps the earlier type on ties.
        let (content_type, best) = scores
            .iter()
            .copied()
            .fold(scores[0], |acc, s| if s.1 > acc.1 { s } else { acc });
        let total: u32 = scores.iter().map(|s| s.1).sum();

        let mut confidence = if total > 1 {
            (best as f32 / total as f32).min(MAX_CONFIDENCE)
        } else {
            CONTEXT_ONLY_CONFIDENCE
        };
        if best >= BOOST_THRESHOLD {
            confidence = (confidence + BOOST).min(MAX_CONFIDENCE);
        }

        Classification {
            content_type,
            confidence,
            hints: self.hints(text),
        }
    }

    fn hints(&self, text: &str) -> ExtractionHints {
        ExtractionHints {
            procedure_codes: self.codes.procedure_codes(text),
            state_codes: self.codes.states(text),
            diagnosis_codes: self.codes.diagnosis_codes(text),
            auth_signal: self.auth_signal.signal(text),
        }
    }
}

/// Summary over all classified sections of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassificationStats {
    pub total_sections: usize,
    pub authorization_rule: usize,
    pub geographic_exception: usize,
    pub procedure_list: usize,
    pub context_info: usize,
    pub average_confidence: f32,
    /// Sections classified with confidence above 0.8.
    pub high_confidence: usize,
    pub with_procedure_codes: usize,
    pub with_state_codes: usize,
}

impl ClassificationStats {
    pub fn from_classifications<'a>(
        classifications: impl IntoIterator<Item = &'a Classification>,
    ) -> Self {
        let mut stats = Self::default();
        let mut confidence_sum = 0.0f32;
        for c in classifications {
            stats.total_sections += 1;
            match c.content_type {
                ContentType::AuthorizationRule => stats.authorization_rule += 1,
                ContentType::GeographicException => stats.geographic_exception += 1,
                ContentType::ProcedureList => stats.procedure_list += 1,
                ContentType::ContextInfo => stats.context_info += 1,
            }
            confidence_sum += c.confidence;
            if c.confidence > 0.8 {
                stats.high_confidence += 1;
            }
            if !c.hints.procedure_codes.is_empty() {
                stats.with_procedure_codes += 1;
            }
            if !c.hints.state_codes.is_empty() {
                stats.with_state_codes += 1;
            }
        }
        if stats.total_sections > 0 {
            stats.average_confidence = confidence_sum / stats.total_sections as f32;
        }
        stats
    }
}
