//! Query invalidation dispatch.
//!
//! Maps a significant transition to the query predicates that depend on the
//! resource, and flags the matching store entries stale.

use ripple_core::{
    Classification, EngineConfig, InvalidationRule, QueryPredicate, ResourceIdentity,
    ResourceType, ScopeId, StorageError,
};
use ripple_storage::ResourceStore;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct QueryInvalidationDispatcher {
    rules: HashMap<ResourceType, Vec<InvalidationRule>>,
}

impl QueryInvalidationDispatcher {
    pub fn new(rules: impl IntoIterator<Item = InvalidationRule>) -> Self {
        let mut by_type: HashMap<ResourceType, Vec<InvalidationRule>> = HashMap::new();
        for rule in rules {
            by_type.entry(rule.resource_type).or_default().push(rule);
        }
        Self { rules: by_type }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.invalidations.iter().cloned())
    }

    /// Predicates invalidated by a significant transition of `identity`.
    ///
    /// Every predicate is confined to `scope`; unscoped keys match from any
    /// scope. Rules with `narrow_by_id` match only keys whose first argument
    /// is the resource id.
    pub fn predicates_for(&self, scope: ScopeId, identity: &ResourceIdentity) -> Vec<QueryPredicate> {
        self.rules
            .get(&identity.resource_type)
            .map(|rules| {
                rules
                    .iter()
                    .map(|rule| {
                        let predicate = QueryPredicate::family(rule.family.clone()).in_scope(scope);
                        if rule.narrow_by_id {
                            predicate.with_arg(identity.resource_id.as_str())
                        } else {
                            predicate
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mark dependents of `identity` stale. Noise is a no-op.
    ///
    /// Returns how many entries flipped from fresh to stale.
    pub fn dispatch(
        &self,
        store: &ResourceStore,
        scope: ScopeId,
        identity: &ResourceIdentity,
        classification: Classification,
    ) -> Result<usize, StorageError> {
        if !classification.is_significant() {
            return Ok(0);
        }

        let mut invalidated = 0;
        for predicate in self.predicates_for(scope, identity) {
            invalidated += store.mark_stale(&predicate)?;
        }
        debug!(identity = %identity, scope = %scope, invalidated = invalidated, "Dispatched invalidation");
        Ok(invalidated)
    }
}
