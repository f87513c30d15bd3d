//! Immutable rule collection with a procedure-code index.

use std::collections::{BTreeSet, HashMap};

use priorauth_core::codes;
use priorauth_core::rule::Rule;

use crate::error::RuleSetError;

#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    /// Literal code → positions in `rules`.
    by_code: HashMap<String, Vec<usize>>,
    /// Numeric range bounds with their rule position.
    ranges: Vec<(u32, u32, usize)>,
}

impl RuleSet {
    /// Index `rules`. Rule ids must be unique within the set.
    pub fn new(rules: Vec<Rule>) -> Result<Self, RuleSetError> {
        if let Some(dup) = first_duplicate(&rules) {
            return Err(RuleSetError::DuplicateRuleId(dup.to_string()));
        }

        let mut by_code: HashMap<String, Vec<usize>> = HashMap::new();
        let mut ranges = Vec::new();
        for (i, rule) in rules.iter().enumerate() {
            for code in &rule.procedure_codes {
                match codes::parse_range(code) {
                    Some((start, end)) => ranges.push((start, end, i)),
                    None => by_code.entry(code.clone()).or_default().push(i),
                }
            }
        }
        Ok(Self {
            rules,
            by_code,
            ranges,
        })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.rule_id == rule_id)
    }

    /// Rules whose procedure codes cover any of `codes`, in rule-set order.
    pub fn candidates<S: AsRef<str>>(&self, query_codes: &[S]) -> Vec<&Rule> {
        let mut hits = BTreeSet::new();
        for code in query_codes {
            let code = code.as_ref();
            if let Some(positions) = self.by_code.get(code) {
                hits.extend(positions.iter().copied());
            }
            if codes::is_cpt(code)
                && let Ok(n) = code.parse::<u32>()
            {
                hits.extend(
                    self.ranges
                        .iter()
                        .filter(|(start, end, _)| (*start..=*end).contains(&n))
                        .map(|&(_, _, i)| i),
                );
            }
        }
        hits.into_iter().map(|i| &self.rules[i]).collect()
    }
}

fn first_duplicate(rules: &[Rule]) -> Option<&str> {
    let mut seen = BTreeSet::new();
    rules
        .iter()
        .map(|r| r.rule_id.as_str())
        .find(|id| !seen.insert(*id))
}
