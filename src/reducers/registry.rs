use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tracing::instrument;

use super::{ReducerConflictError, ReducerPolicy, apply_policy};
use crate::channels::Channel;
use crate::state::WorkflowState;

/// Key → policy table, fixed at graph compile time.
///
/// The registry is the single merge point for a barrier: it applies every
/// partial update of a superstep in the deterministic order the runner
/// collected them, tracks same-barrier subkey collisions, and bumps the
/// version of each key whose content actually changed (once per barrier).
#[derive(Clone, Debug, Default)]
pub struct ReducerRegistry {
    policies: FxHashMap<String, ReducerPolicy>,
}

impl ReducerRegistry {
    pub fn new(policies: FxHashMap<String, ReducerPolicy>) -> Self {
        Self { policies }
    }

    /// Policy for a key. Undeclared keys default to `Overwrite`.
    #[must_use]
    pub fn policy_for(&self, key: &str) -> ReducerPolicy {
        self.policies
            .get(key)
            .copied()
            .unwrap_or(ReducerPolicy::Overwrite)
    }

    /// Returns `true` if the key was explicitly declared.
    #[must_use]
    pub fn is_declared(&self, key: &str) -> bool {
        self.policies.contains_key(key)
    }

    /// Iterate declared (key, policy) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ReducerPolicy)> {
        self.policies.iter()
    }

    /// Merge the ordered update maps of one barrier into the state.
    ///
    /// Updates are applied map-by-map in the order given; within one map,
    /// keys are applied in sorted order so identical barriers replay
    /// identically. Returns the sorted list of keys whose content changed.
    #[instrument(skip(self, state, updates), err)]
    pub fn apply_step(
        &self,
        state: &mut WorkflowState,
        updates: &[FxHashMap<String, Value>],
    ) -> Result<Vec<String>, ReducerConflictError> {
        let mut seen_subkeys: FxHashMap<&str, FxHashSet<String>> = FxHashMap::default();
        let mut changed: FxHashSet<String> = FxHashSet::default();

        for update in updates {
            let mut pairs: Vec<_> = update.iter().collect();
            pairs.sort_by(|(a, _), (b, _)| a.cmp(b));
            for (key, value) in pairs {
                let policy = self.policy_for(key);
                let seen = seen_subkeys.entry(key.as_str()).or_default();
                let channel = state.channel_entry(key);
                if apply_policy(policy, key, channel.get_mut(), value, seen)? {
                    changed.insert(key.clone());
                }
            }
        }

        let mut updated: Vec<String> = changed.into_iter().collect();
        updated.sort();
        for key in &updated {
            let channel = state.channel_entry(key);
            let next = channel.version().saturating_add(1);
            channel.set_version(next);
        }
        Ok(updated)
    }
}
