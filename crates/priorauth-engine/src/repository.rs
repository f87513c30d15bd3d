//! Shared access to the current rule set.
//!
//! Readers take an `Arc` snapshot and evaluate against it without holding
//! the lock. A reload builds a complete new [`RuleSet`] and swaps it in, so
//! no reader ever sees a partial update.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use priorauth_core::rule::Rule;

use crate::error::RuleSetError;
use crate::ruleset::RuleSet;

#[derive(Debug, Default)]
pub struct RuleRepository {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleRepository {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(rules)),
        }
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in `rules`, returning the snapshot it replaced.
    pub fn replace(&self, rules: RuleSet) -> Arc<RuleSet> {
        let next = Arc::new(rules);
        let count = next.len();
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *guard, next);
        info!(rules = count, previous = previous.len(), "rule set replaced");
        previous
    }

    /// Index `rules` and swap them in. On error the current set is kept.
    pub fn reload(&self, rules: Vec<Rule>) -> Result<Arc<RuleSet>, RuleSetError> {
        let next = RuleSet::new(rules)?;
        Ok(self.replace(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use priorauth_core::rule::AuthRequirement;

    fn rules_of(n: usize) -> Vec<Rule> {
        (0..n)
            .map(|i| {
                let mut r = Rule::new("UHC", AuthRequirement::Required);
                r.rule_id = format!("r{i}");
                r.procedure_codes.insert(format!("{:05}", 29800 + i));
                r
            })
            .collect()
    }

    fn set_of(n: usize) -> RuleSet {
        RuleSet::new(rules_of(n)).unwrap()
    }

    #[test]
    fn snapshot_survives_replace() {
        let repo = RuleRepository::new(set_of(2));
        let before = repo.snapshot();
        let old = repo.replace(set_of(5));
        assert_eq!(before.len(), 2);
        assert_eq!(old.len(), 2);
        assert_eq!(repo.snapshot().len(), 5);
    }

    #[test]
    fn concurrent_readers_see_whole_sets() {
        let repo = Arc::new(RuleRepository::new(set_of(1)));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let repo = Arc::clone(&repo);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let n = repo.snapshot().len();
                        assert!(n == 1 || n == 3);
                    }
                })
            })
            .collect();
        repo.replace(set_of(3));
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(repo.snapshot().len(), 3);
    }

    #[test]
    fn reload_keeps_current_set_on_duplicate_ids() {
        let repo = RuleRepository::default();
        assert!(repo.reload(rules_of(3)).unwrap().is_empty());
        assert_eq!(repo.snapshot().len(), 3);

        let mut dup = rules_of(2);
        dup[1].rule_id = "r0".into();
        assert_eq!(
            repo.reload(dup).unwrap_err(),
            RuleSetError::DuplicateRuleId("r0".into())
        );
        assert_eq!(repo.snapshot().len(), 3);
    }
}
