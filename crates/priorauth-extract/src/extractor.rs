//! Structured field extraction from one section of text.
//!
//! Every pattern family runs independently over the whole section, so a
//! section can yield codes, geography, place-of-service and age qualifiers
//! at once.

use std::collections::BTreeSet;
use std::ops::Range;

use priorauth_core::config::ExtractConfig;
use priorauth_core::rule::{
    AgeRestriction, AuthRequirement, ConditionalLogic, DiagnosisException, ExceptionType,
    POS_ANY, PlaceOfServiceRule, PosQualifier,
};
use regex::Regex;

use crate::error::ExtractError;
use crate::patterns::{AuthPatterns, CodePatterns, chars_after, chars_before, compile};

/// Longest state list captured after a geographic phrase.
const SCOPE_SPAN: &str = r"([^.;\n]{1,200})";

/// Characters either side of an age phrase searched for "required".
const AGE_CONTEXT_CHARS: usize = 50;

/// Everything pulled out of one section.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub procedure_codes: BTreeSet<String>,
    /// Diagnosis codes that are not covered by an exemption.
    pub diagnosis_codes: BTreeSet<String>,
    pub auth_requirement: AuthRequirement,
    pub excluded_states: BTreeSet<String>,
    pub included_states: BTreeSet<String>,
    pub conditional_logic: Vec<ConditionalLogic>,
    pub place_of_service_rules: Vec<PlaceOfServiceRule>,
    pub diagnosis_exceptions: Vec<DiagnosisException>,
    pub age_restrictions: Vec<AgeRestriction>,
    /// Category named by keywords in the text, used when headers give none.
    pub category: Option<String>,
    pub needs_narrative_review: bool,
}

impl Extraction {
    pub fn has_codes(&self) -> bool {
        !self.procedure_codes.is_empty() || !self.diagnosis_codes.is_empty()
    }
}

pub struct Extractor {
    codes: CodePatterns,
    auth: AuthPatterns,
    all_states_except: Regex,
    excluded_scope: Regex,
    included_scope: Regex,
    pos_office: Regex,
    pos_outpatient: Regex,
    pos_site_review: Regex,
    diagnosis_exception: Vec<Regex>,
    age_min: Regex,
    age_under: Regex,
    age_range: Regex,
    narrative: Regex,
    categories: Vec<(&'static str, Regex)>,
    diagnosis_lookahead_chars: usize,
    max_section_bytes: usize,
}

impl Extractor {
    pub fn new(config: &ExtractConfig) -> Result<Self, ExtractError> {
        Ok(Self {
            codes: CodePatterns::new()?,
            auth: AuthPatterns::new()?,
            all_states_except: Regex::new(&format!(
                r"(?i)\ball\s+states\b[^.;\n]{{0,200}}?\bexcept\s+(?:in\s+|for\s+)?{SCOPE_SPAN}"
            ))?,
            excluded_scope: Regex::new(&format!(
                r"(?i)\b(?:except\s+(?:in|for)|excluding)\s+{SCOPE_SPAN}"
            ))?,
            included_scope: Regex::new(&format!(
                r"(?i)\b(?:only\s+in|limited\s+to)\s+{SCOPE_SPAN}"
            ))?,
            pos_office: Regex::new(
                r"(?i)(?:not\s+required|no\s+(?:prior\s+)?authorization)\s+(?:if|when)\s+performed\s+in\s+(?:an?\s+)?(?:physician'?s?\s+)?office",
            )?,
            pos_outpatient: Regex::new(
                r"(?i)(?:required|authorization)\s+(?:only\s+)?(?:when|if)\s+(?:requesting\s+service\s+in|performed\s+in)\s+(?:an?\s+)?outpatient\s+hospital",
            )?,
            pos_site_review: Regex::new(r"(?i)site\s+of\s+service\s+(?:will\s+be\s+)?review(?:ed)?")?,
            diagnosis_exception: compile(&[
                r"(?i)(?:not\s+required|no\s+(?:prior\s+)?authorization(?:\s+required)?)\s+for\s+(?:the\s+)?following\s+diagnosis\s+codes?",
                r"(?i)diagnosis\s+codes?\s+(?:that\s+)?(?:are\s+)?(?:exempt|do\s+not\s+require)",
                r"(?i)(?:exempt|exception)\s+diagnosis\s+codes?",
            ])?,
            age_min: Regex::new(
                r"(?i)\b(?:patients?\s+)?ages?\s+(\d+)\s*(?:and\s+)?(?:older|above|over|\+)",
            )?,
            age_under: Regex::new(
                r"(?i)\b(?:patients?\s+)?(?:under|below)\s+(?:the\s+)?(?:age\s+(?:of\s+)?)?(\d+)\b",
            )?,
            age_range: Regex::new(r"(?i)\bages?\s+(\d+)\s*(?:to|through|-|–)\s*(\d+)\b")?,
            narrative: Regex::new(
                r"(?i)\b(?:must\s+meet|clinical\s+indications|medical\s+necessity|in\s+combination\s+with|when\s+used\s+for|following\s+criteria)\b",
            )?,
            categories: vec![
                (
                    "Radiology",
                    Regex::new(
                        r"(?i)\b(?:radiology|imaging|mri|pet|magnetic\s+resonance|computed\s+tomography)\b",
                    )?,
                ),
                (
                    "Cardiology",
                    Regex::new(
                        r"(?i)\b(?:cardiology|cardiac|cardiovascular|echocardiogram|stress\s+test|catheterization)\b",
                    )?,
                ),
                (
                    "Orthopedics",
                    Regex::new(r"(?i)\b(?:orthopedics?|arthroscopy|spine|spinal\s+fusion|joint\s+replacement)\b")?,
                ),
            ],
            diagnosis_lookahead_chars: config.diagnosis_lookahead_chars,
            max_section_bytes: config.max_section_bytes,
        })
    }

    pub fn extract(&self, text: &str) -> Result<Extraction, ExtractError> {
        if text.len() > self.max_section_bytes {
            return Err(ExtractError::SectionTooLarge {
                size: text.len(),
                limit: self.max_section_bytes,
            });
        }

        let age_restrictions = self.age_restrictions(text)?;
        let diagnosis_exceptions = self.diagnosis_exceptions(text);
        let diagnosis_codes = self
            .codes
            .diagnosis_codes(text)
            .into_iter()
            .filter(|c| !diagnosis_exceptions.iter().any(|e| e.codes.contains(c)))
            .collect();
        let (excluded_states, included_states, conditional_logic) = self.geographic_scope(text);

        Ok(Extraction {
            procedure_codes: self.codes.procedure_codes(text),
            diagnosis_codes,
            auth_requirement: self.auth.signal(text).to_requirement(),
            excluded_states,
            included_states,
            conditional_logic,
            place_of_service_rules: self.place_of_service(text),
            diagnosis_exceptions,
            age_restrictions,
            category: self.category(text),
            needs_narrative_review: self.narrative.is_match(text),
        })
    }

    /// First category whose keywords appear in `text`.
    pub fn category(&self, text: &str) -> Option<String> {
        self.categories
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(name, _)| name.to_string())
    }

    // ── Geography ──

    /// `(excluded, included, conditional)` state scopes.
    ///
    /// "All states except X" is conditional logic and is found first; plain
    /// "except in X" phrases inside such a match are not counted again as
    /// flat exclusions.
    fn geographic_scope(
        &self,
        text: &str,
    ) -> (BTreeSet<String>, BTreeSet<String>, Vec<ConditionalLogic>) {
        let mut conditional_spans: Vec<Range<usize>> = Vec::new();
        let mut conditional = Vec::new();
        for caps in self.all_states_except.captures_iter(text) {
            if let Some(whole) = caps.get(0) {
                conditional_spans.push(whole.range());
            }
            let states = self.codes.states(&caps[1]);
            if !states.is_empty() {
                conditional.push(ConditionalLogic {
                    excluded_states: states,
                    result_auth_requirement: AuthRequirement::Required,
                });
            }
        }

        let outside_conditional =
            |start: usize| !conditional_spans.iter().any(|span| span.contains(&start));
        let collect = |re: &Regex| -> BTreeSet<String> {
            re.captures_iter(text)
                .filter(|caps| caps.get(0).is_some_and(|m| outside_conditional(m.start())))
                .flat_map(|caps| self.codes.states(&caps[1]))
                .collect()
        };

        (
            collect(&self.excluded_scope),
            collect(&self.included_scope),
            conditional,
        )
    }

    // ── Place of service ──

    fn place_of_service(&self, text: &str) -> Vec<PlaceOfServiceRule> {
        let mut rules = Vec::new();
        if self.pos_office.is_match(text) {
            rules.push(PlaceOfServiceRule {
                code: "11".into(),
                description: "Office".into(),
                requires_auth: false,
                qualifier: PosQualifier::Exempt,
            });
        }
        if self.pos_outpatient.is_match(text) {
            rules.push(PlaceOfServiceRule {
                code: "22".into(),
                description: "Outpatient Hospital".into(),
                requires_auth: true,
                qualifier: PosQualifier::PriorAuth,
            });
        }
        if self.pos_site_review.is_match(text) {
            rules.push(PlaceOfServiceRule {
                code: POS_ANY.into(),
                description: "Site of service review".into(),
                requires_auth: true,
                qualifier: PosQualifier::SiteOfServiceReview,
            });
        }
        rules
    }

    // ── Diagnosis exceptions ──

    fn diagnosis_exceptions(&self, text: &str) -> Vec<DiagnosisException> {
        let mut exceptions: Vec<DiagnosisException> = Vec::new();
        for re in &self.diagnosis_exception {
            for m in re.find_iter(text) {
                let end = chars_after(text, m.end(), self.diagnosis_lookahead_chars);
                let codes = self.codes.diagnosis_codes(&text[m.end()..end]);
                if codes.is_empty() || exceptions.iter().any(|e| e.codes == codes) {
                    continue;
                }
                exceptions.push(DiagnosisException {
                    codes,
                    exception_type: ExceptionType::Exempt,
                    description: format!("diagnosis exception: {}", m.as_str()),
                });
            }
        }
        exceptions
    }

    // ── Age ──

    fn age_restrictions(&self, text: &str) -> Result<Vec<AgeRestriction>, ExtractError> {
        let mut restrictions = Vec::new();

        for caps in self.age_min.captures_iter(text) {
            let Some(m) = caps.get(0) else { continue };
            let min_age = parse_age(&caps[1])?;
            let start = chars_before(text, m.start(), AGE_CONTEXT_CHARS);
            let end = chars_after(text, m.end(), AGE_CONTEXT_CHARS);
            let auth_requirement = if text[start..end].to_lowercase().contains("required") {
                AuthRequirement::Required
            } else {
                AuthRequirement::Conditional
            };
            restrictions.push(AgeRestriction {
                min_age: Some(min_age),
                max_age: None,
                auth_requirement,
            });
        }

        for caps in self.age_under.captures_iter(text) {
            if let Some(max_age) = parse_age(&caps[1])?.checked_sub(1) {
                restrictions.push(AgeRestriction {
                    min_age: None,
                    max_age: Some(max_age),
                    auth_requirement: AuthRequirement::Conditional,
                });
            }
        }

        for caps in self.age_range.captures_iter(text) {
            let (min_age, max_age) = (parse_age(&caps[1])?, parse_age(&caps[2])?);
            if min_age <= max_age {
                restrictions.push(AgeRestriction {
                    min_age: Some(min_age),
                    max_age: Some(max_age),
                    auth_requirement: AuthRequirement::Conditional,
                });
            }
        }

        Ok(restrictions)
    }
}

fn parse_age(digits: &str) -> Result<u32, ExtractError> {
    digits
        .parse()
        .map_err(|_| ExtractError::NumberOutOfRange(digits.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> Extractor {
        Extractor::new(&ExtractConfig::default()).unwrap()
    }

    fn extract(text: &str) -> Extraction {
        extractor().extract(text).unwrap()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn required_rule_with_codes() {
        let e = extract("Prior authorization required. 29826 29827");
        assert_eq!(e.auth_requirement, AuthRequirement::Required);
        assert_eq!(e.procedure_codes, set(&["29826", "29827"]));
        assert!(!e.needs_narrative_review);
    }

    #[test]
    fn no_auth_phrase_defaults_to_conditional() {
        let e = extract("Knee arthroscopy 29881");
        assert_eq!(e.auth_requirement, AuthRequirement::Conditional);
    }

    #[test]
    fn all_states_except_is_conditional_not_flat_exclusion() {
        let e = extract("Prior authorization required for all states except Alaska, Texas. 12345");
        assert!(e.excluded_states.is_empty());
        assert_eq!(e.conditional_logic.len(), 1);
        assert_eq!(e.conditional_logic[0].excluded_states, set(&["AK", "TX"]));
        assert_eq!(
            e.conditional_logic[0].result_auth_requirement,
            AuthRequirement::Required
        );
    }

    #[test]
    fn all_states_except_in_not_double_counted() {
        let e = extract("Required in all states except in TX and UT.");
        assert!(e.excluded_states.is_empty());
        assert_eq!(e.conditional_logic[0].excluded_states, set(&["TX", "UT"]));
    }

    #[test]
    fn except_in_binds_excluded_states() {
        let e = extract("Prior authorization required except in Rhode Island and WI. 70450");
        assert_eq!(e.excluded_states, set(&["RI", "WI"]));
        assert!(e.conditional_logic.is_empty());
    }

    #[test]
    fn only_in_binds_included_states() {
        let e = extract("This program is limited to UT and Puerto Rico. 70450");
        assert_eq!(e.included_states, set(&["PR", "UT"]));
    }

    #[test]
    fn scope_stops_at_sentence_end() {
        let e = extract("Required except in TX. Members in CA follow standard review. 70450");
        assert_eq!(e.excluded_states, set(&["TX"]));
    }

    #[test]
    fn non_state_tokens_in_scope_rejected() {
        let e = extract("Required except for ER visits and XX plans. 70450");
        assert!(e.excluded_states.is_empty());
    }

    #[test]
    fn place_of_service_families() {
        let e = extract(
            "Not required when performed in an office. Required when performed in an \
             outpatient hospital. Site of service will be reviewed. 29881",
        );
        let codes: Vec<&str> = e
            .place_of_service_rules
            .iter()
            .map(|p| p.code.as_str())
            .collect();
        assert_eq!(codes, ["11", "22", "*"]);
        assert!(!e.place_of_service_rules[0].requires_auth);
        assert!(e.place_of_service_rules[1].requires_auth);
        assert_eq!(
            e.place_of_service_rules[2].qualifier,
            PosQualifier::SiteOfServiceReview
        );
    }

    #[test]
    fn diagnosis_exception_within_lookahead() {
        let e = extract(
            "Prior authorization required for 77067. Not required for the following \
             diagnosis codes: C50.011, C50.012. Other diagnosis M17.11 still applies.",
        );
        assert_eq!(e.diagnosis_exceptions.len(), 1);
        let exempt = &e.diagnosis_exceptions[0].codes;
        assert!(exempt.contains("C50.011"));
        assert!(exempt.contains("C50.012"));
        assert!(!e.diagnosis_codes.contains("C50.011"));
    }

    #[test]
    fn diagnosis_codes_beyond_lookahead_not_exempt() {
        let config = ExtractConfig {
            diagnosis_lookahead_chars: 10,
            ..ExtractConfig::default()
        };
        let e = Extractor::new(&config)
            .unwrap()
            .extract("Exempt diagnosis codes are listed in the appendix below: C50.011 77067")
            .unwrap();
        assert!(e.diagnosis_exceptions.is_empty());
        assert!(e.diagnosis_codes.contains("C50.011"));
    }

    #[test]
    fn age_thresholds() {
        let e = extract("Prior authorization required for patients ages 18 and older. 97110");
        assert_eq!(
            e.age_restrictions,
            [AgeRestriction {
                min_age: Some(18),
                max_age: None,
                auth_requirement: AuthRequirement::Required,
            }]
        );

        let e = extract("Review applies to members under age 21. 97110");
        assert_eq!(e.age_restrictions[0].max_age, Some(20));
        assert_eq!(
            e.age_restrictions[0].auth_requirement,
            AuthRequirement::Conditional
        );

        let e = extract("Covered for ages 5 to 17. 97110");
        assert_eq!(e.age_restrictions[0].min_age, Some(5));
        assert_eq!(e.age_restrictions[0].max_age, Some(17));
    }

    #[test]
    fn age_context_without_required_is_conditional() {
        let e = extract("For patients ages 65 and older see the Medicare supplement. 97110");
        assert_eq!(
            e.age_restrictions[0].auth_requirement,
            AuthRequirement::Conditional
        );
    }

    #[test]
    fn oversized_age_is_an_error() {
        let err = extractor()
            .extract("ages 99999999999 and older. 97110")
            .unwrap_err();
        assert!(matches!(err, ExtractError::NumberOutOfRange(_)));
    }

    #[test]
    fn oversized_section_is_an_error() {
        let config = ExtractConfig {
            max_section_bytes: 16,
            ..ExtractConfig::default()
        };
        let err = Extractor::new(&config)
            .unwrap()
            .extract("Prior authorization required. 29826")
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractError::SectionTooLarge { size: 35, limit: 16 }
        ));
    }

    #[test]
    fn narrative_phrases_flag_review() {
        let e = extract("Patients must meet the following criteria before 22630 is approved.");
        assert!(e.needs_narrative_review);
    }

    #[test]
    fn category_from_keywords() {
        assert_eq!(
            extractor().category("Advanced imaging such as MRI"),
            Some("Radiology".to_string())
        );
        assert_eq!(
            extractor().category("Echocardiogram and cardiac catheterization"),
            Some("Cardiology".to_string())
        );
        assert_eq!(extractor().category("General notes"), None);
    }
}
