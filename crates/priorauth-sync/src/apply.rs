use std::collections::HashMap;

use priorauth_core::{NarrativeRequest, NarrativeResponse, PromptKind, Rule};
use tracing::{debug, info, warn};

/// What happened when responses were folded into a rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    /// Response ids with no matching rule.
    pub unmatched: Vec<String>,
}

/// Requests for every rule still flagged for narrative review.
pub fn pending_requests(rules: &[Rule], kind: PromptKind) -> Vec<NarrativeRequest> {
    let requests: Vec<NarrativeRequest> = rules
        .iter()
        .filter(|r| r.needs_narrative_review)
        .filter_map(|r| {
            let req = NarrativeRequest::for_rule(r, kind);
            if req.is_none() {
                debug!(rule = %r.rule_id, "flagged rule has no narrative text");
            }
            req
        })
        .collect();
    info!(count = requests.len(), kind = kind.as_str(), "narrative requests prepared");
    requests
}

/// Fold structured responses back into their rules by id.
pub fn apply_responses(rules: &mut [Rule], responses: &[NarrativeResponse]) -> ApplySummary {
    let index: HashMap<String, usize> = rules
        .iter()
        .enumerate()
        .map(|(i, r)| (r.rule_id.clone(), i))
        .collect();

    let mut summary = ApplySummary::default();
    for response in responses {
        match index.get(&response.rule_id) {
            Some(&i) => {
                rules[i].apply_narrative(response);
                rules[i].refresh_rule_type();
                summary.applied += 1;
            }
            None => {
                warn!(rule = %response.rule_id, "response for unknown rule");
                summary.unmatched.push(response.rule_id.clone());
            }
        }
    }
    info!(applied = summary.applied, unmatched = summary.unmatched.len(), "narrative responses applied");
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use priorauth_core::AuthRequirement;
    use priorauth_core::narrative::AgeLimits;

    fn rules() -> Vec<Rule> {
        let mut narrative = Rule::new("UHC", AuthRequirement::Conditional);
        narrative.rule_id = "uhc-0001".into();
        narrative.procedure_codes.insert("22630".into());
        narrative.needs_narrative_review = true;
        narrative.narrative_text = Some("Medical necessity criteria apply".into());

        let mut plain = Rule::new("UHC", AuthRequirement::Required);
        plain.rule_id = "uhc-0002".into();
        plain.procedure_codes.insert("29826".into());
        vec![narrative, plain]
    }

    #[test]
    fn only_flagged_rules_are_requested() {
        let requests = pending_requests(&rules(), PromptKind::ClinicalCriteria);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].rule_id, "uhc-0001");
        assert!(requests[0].prompt.contains("Medical necessity criteria apply"));
    }

    #[test]
    fn responses_fold_into_rules() {
        let mut rules = rules();
        let responses = vec![
            NarrativeResponse {
                rule_id: "uhc-0001".into(),
                conditions: vec!["Failed conservative therapy".into()],
                age_limits: Some(AgeLimits {
                    min_age: Some(18),
                    max_age: None,
                }),
                ..Default::default()
            },
            NarrativeResponse {
                rule_id: "uhc-9999".into(),
                ..Default::default()
            },
        ];
        let summary = apply_responses(&mut rules, &responses);
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.unmatched, ["uhc-9999"]);
        assert!(!rules[0].needs_narrative_review);
        assert_eq!(rules[0].clinical_criteria, ["Failed conservative therapy"]);
        assert_eq!(rules[0].age_restrictions[0].min_age, Some(18));
        assert!(pending_requests(&rules, PromptKind::ClinicalCriteria).is_empty());
    }
}
