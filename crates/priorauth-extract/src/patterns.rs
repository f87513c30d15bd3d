//! Code, state, and authorization-phrase patterns shared by the classifier
//! and the extractor.
//!
//! All patterns use the `regex` crate's linear-time engine, so matching
//! cost is bounded by input length regardless of the text.

use std::collections::BTreeSet;

use priorauth_core::codes;
use priorauth_core::section::AuthSignal;
use priorauth_core::states;
use regex::Regex;

use crate::error::ExtractError;

/// Procedure, diagnosis, and state-code finders.
pub(crate) struct CodePatterns {
    cpt: Regex,
    cpt_range: Regex,
    hcpcs: Regex,
    category_iii: Regex,
    icd: Regex,
    state_code: Regex,
    state_name: Regex,
}

impl CodePatterns {
    pub(crate) fn new() -> Result<Self, ExtractError> {
        let names = states::names_longest_first()
            .iter()
            .map(|n| n.replace(' ', r"\s+"))
            .collect::<Vec<_>>()
            .join("|");
        Ok(Self {
            cpt: Regex::new(r"\b\d{5}\b")?,
            cpt_range: Regex::new(r"\b(\d{5})\s*[-–]\s*(\d{5})\b")?,
            hcpcs: Regex::new(r"\b[A-V]\d{4}\b")?,
            category_iii: Regex::new(r"\b\d{4}[A-Z]\b")?,
            icd: Regex::new(r"\b[A-Z]\d{2}(?:\.\d{1,4})?\b")?,
            state_code: Regex::new(r"\b[A-Z]{2}\b")?,
            state_name: Regex::new(&format!(r"(?i)\b(?:{names})\b"))?,
        })
    }

    /// Every procedure code in `text`. Ranges add a `RANGE_` token
    /// alongside their literal endpoints.
    pub(crate) fn procedure_codes(&self, text: &str) -> BTreeSet<String> {
        let mut found: BTreeSet<String> = self
            .cpt
            .find_iter(text)
            .filter(|m| !inside_number(text, m.start(), m.end()))
            .chain(self.hcpcs.find_iter(text))
            .chain(self.category_iii.find_iter(text))
            .map(|m| m.as_str().to_string())
            .collect();
        for caps in self.cpt_range.captures_iter(text) {
            let token = codes::range_token(&caps[1], &caps[2]);
            if codes::parse_range(&token).is_some() {
                found.insert(token);
            }
        }
        found
    }

    pub(crate) fn diagnosis_codes(&self, text: &str) -> BTreeSet<String> {
        self.icd
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Canonical state codes named in `text`, either as exact upper-case
    /// two-letter tokens or by full name.
    pub(crate) fn states(&self, text: &str) -> BTreeSet<String> {
        let codes = self
            .state_code
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|c| states::is_canonical(c));
        let named = self.state_name.find_iter(text).filter_map(|m| {
            let normalized = m.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
            states::code_for_name(&normalized)
        });
        codes.chain(named).map(str::to_string).collect()
    }
}

/// The three authorization phrase families.
pub(crate) struct AuthPatterns {
    required: Vec<Regex>,
    not_required: Vec<Regex>,
    notification: Vec<Regex>,
}

impl AuthPatterns {
    pub(crate) fn new() -> Result<Self, ExtractError> {
        Ok(Self {
            required: compile(&[
                r"(?i)prior\s*authorization\s+(?:is\s+)?required",
                r"(?i)requires?\s+prior\s+authorization",
                r"(?i)\bPA\s+required",
                r"(?i)authorization\s+(?:is\s+)?necessary",
            ])?,
            not_required: compile(&[
                r"(?i)\b(?:no|not)\s+(?:prior\s+)?authorization\s+(?:is\s+)?(?:required|necessary)",
                r"(?i)authorization\s+(?:is\s+)?not\s+required",
                r"(?i)\bno\s+PA\s+required",
            ])?,
            notification: compile(&[
                r"(?i)notification\s+only",
                r"(?i)notify\s+only",
                r"(?i)advance\s+notification",
            ])?,
        })
    }

    /// First family with a match wins: required, then not required, then
    /// notification.
    pub(crate) fn signal(&self, text: &str) -> AuthSignal {
        let hit = |family: &[Regex]| family.iter().any(|re| re.is_match(text));
        if hit(&self.required) {
            AuthSignal::Required
        } else if hit(&self.not_required) {
            AuthSignal::NotRequired
        } else if hit(&self.notification) {
            AuthSignal::Notification
        } else {
            AuthSignal::Unknown
        }
    }
}

pub(crate) fn compile(patterns: &[&str]) -> Result<Vec<Regex>, ExtractError> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(ExtractError::from))
        .collect()
}

/// Byte index `n` characters after `idx`, clamped to the end of `text`.
/// `idx` must be a char boundary.
pub(crate) fn chars_after(text: &str, idx: usize, n: usize) -> usize {
    text[idx..]
        .char_indices()
        .nth(n)
        .map_or(text.len(), |(i, _)| idx + i)
}

/// Byte index `n` characters before `idx`, clamped to the start of `text`.
/// `idx` must be a char boundary.
/// True when the digits at `start..end` are one part of a larger number:
/// a decimal (`12345.67`) or a comma group that is not another code
/// (`12345,67`). Comma-joined five-digit codes (`29826,29827`) pass.
fn inside_number(text: &str, start: usize, end: usize) -> bool {
    let bytes = text.as_bytes();
    let joined = |sep: Option<&u8>, run: usize| match sep {
        Some(b'.') => run > 0,
        Some(b',') => run > 0 && run != 5,
        _ => false,
    };
    let after = digit_run(bytes[end..].iter().skip(1));
    let before = digit_run(bytes[..start].iter().rev().skip(1));
    joined(bytes.get(end), after) || joined(start.checked_sub(1).and_then(|i| bytes.get(i)), before)
}

fn digit_run<'a>(bytes: impl Iterator<Item = &'a u8>) -> usize {
    bytes.take_while(|b| b.is_ascii_digit()).count()
}

pub(crate) fn chars_before(text: &str, idx: usize, n: usize) -> usize {
    if n == 0 {
        return idx;
    }
    text[..idx]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map_or(0, |(i, _)| i)
}
