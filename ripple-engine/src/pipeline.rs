//! Per-event invalidation pipeline.
//!
//! One resource change is one step: upsert the projection, observe the
//! transition, then dispatch invalidation for significant ones. The caller
//! holds the subscription's record lock for the whole call, so steps of one
//! subscription never interleave.

use crate::detector::{TransitionDetector, TransitionRecords};
use crate::dispatcher::QueryInvalidationDispatcher;
use crate::stats::EngineStats;
use ripple_core::{
    Classification, EngineConfig, EventError, ResourceEvent, ResourceIdentity, ScopeId,
    SourceEvent, StorageError,
};
use ripple_storage::ResourceStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, trace, warn};

/// What processing one resource change did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    Changed {
        identity: ResourceIdentity,
        classification: Classification,
        malformed: bool,
        invalidated: usize,
    },
    Deleted {
        identity: ResourceIdentity,
    },
}

impl EventOutcome {
    pub fn identity(&self) -> &ResourceIdentity {
        match self {
            EventOutcome::Changed { identity, .. } | EventOutcome::Deleted { identity } => identity,
        }
    }

    pub fn classification(&self) -> Option<Classification> {
        match self {
            EventOutcome::Changed { classification, .. } => Some(*classification),
            EventOutcome::Deleted { .. } => None,
        }
    }
}

pub struct InvalidationPipeline {
    detector: TransitionDetector,
    dispatcher: QueryInvalidationDispatcher,
    store: Arc<ResourceStore>,
    stats: Arc<EngineStats>,
}

impl InvalidationPipeline {
    pub fn new(
        detector: TransitionDetector,
        dispatcher: QueryInvalidationDispatcher,
        store: Arc<ResourceStore>,
    ) -> Self {
        Self {
            detector,
            dispatcher,
            store,
            stats: Arc::new(EngineStats::new()),
        }
    }

    pub fn from_config(config: &EngineConfig, store: Arc<ResourceStore>) -> Self {
        Self::new(
            TransitionDetector::from_config(config),
            QueryInvalidationDispatcher::from_config(config),
            store,
        )
    }

    pub fn store(&self) -> &Arc<ResourceStore> {
        &self.store
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    pub fn detector(&self) -> &TransitionDetector {
        &self.detector
    }

    pub fn dispatcher(&self) -> &QueryInvalidationDispatcher {
        &self.dispatcher
    }

    /// Process one delivered event for the subscription owning `records`.
    ///
    /// Events addressed to another scope are rejected without touching any
    /// state. Batches are expanded and processed in order, each change as its
    /// own step. Store failures are logged and never abort the stream.
    pub fn process(
        &self,
        records: &mut TransitionRecords,
        scope: ScopeId,
        event: SourceEvent,
    ) -> Result<Vec<EventOutcome>, EventError> {
        if event.scope() != scope {
            EngineStats::incr(&self.stats.scope_mismatches);
            let err = EventError::ScopeMismatch {
                expected: scope,
                got: event.scope(),
            };
            warn!(error = %err, event_type = event.event_type(), "Discarding event for another scope");
            return Err(err);
        }

        let outcomes = match event {
            SourceEvent::ResourceChanged(change) => vec![self.process_change(records, change)],
            SourceEvent::ResourceChangedBatch {
                scope,
                resource_type,
                resources,
            } => SourceEvent::batch_events(scope, resource_type, resources)
                .map(|change| self.process_change(records, change))
                .collect(),
            SourceEvent::ResourceDeleted { scope, identity } => {
                vec![self.process_deletion(records, scope, identity)]
            }
        };
        Ok(outcomes)
    }

    fn process_change(&self, records: &mut TransitionRecords, event: ResourceEvent) -> EventOutcome {
        EngineStats::incr(&self.stats.events_processed);

        // A projection the store rejects is still observed, which reports it
        // as malformed.
        if let Err(err) = self.store.upsert(
            event.scope,
            event.identity.clone(),
            event.projection.clone(),
        ) {
            log_store_error(&event.identity, &err, "upsert");
        }

        let (classification, malformed) = match self.detector.try_observe(records, &event) {
            Ok(classification) => (classification, false),
            Err(err) => {
                EngineStats::incr(&self.stats.malformed);
                warn!(identity = %event.identity, scope = %event.scope, error = %err, "Malformed event treated as noise");
                (Classification::Noise, true)
            }
        };

        let invalidated = if classification.is_significant() {
            EngineStats::incr(&self.stats.significant);
            match self.dispatcher.dispatch(
                &self.store,
                event.scope,
                &event.identity,
                classification,
            ) {
                Ok(count) => count,
                Err(err) => {
                    log_store_error(&event.identity, &err, "dispatch");
                    0
                }
            }
        } else {
            EngineStats::incr(&self.stats.noise);
            0
        };
        EngineStats::add(&self.stats.entries_invalidated, invalidated);

        trace!(
            identity = %event.identity,
            classification = %classification,
            invalidated = invalidated,
            "Processed resource change"
        );
        EventOutcome::Changed {
            identity: event.identity,
            classification,
            malformed,
            invalidated,
        }
    }

    fn process_deletion(
        &self,
        records: &mut TransitionRecords,
        scope: ScopeId,
        identity: ResourceIdentity,
    ) -> EventOutcome {
        EngineStats::incr(&self.stats.deletions);
        records.forget(&identity);
        if let Err(err) = self.store.remove(scope, &identity) {
            log_store_error(&identity, &err, "remove");
        }
        trace!(identity = %identity, scope = %scope, "Processed resource deletion");
        EventOutcome::Deleted { identity }
    }
}

fn log_store_error(identity: &ResourceIdentity, err: &StorageError, operation: &str) {
    match err {
        StorageError::ProjectionTypeMismatch { .. } => {
            warn!(identity = %identity, operation = operation, error = %err, "Store rejected projection");
        }
        _ => {
            error!(identity = %identity, operation = operation, error = %err, "Store operation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::{
        BatchItem, QueryKey, ResourceProjection, ResourceType, DIRECTORY_LISTING_FAMILY,
    };
    use serde_json::json;

    fn pipeline() -> InvalidationPipeline {
        let config = EngineConfig::with_default_policies();
        InvalidationPipeline::from_config(&config, Arc::new(ResourceStore::new(16)))
    }

    fn mode(scope: ScopeId, id: &str, mode: &str) -> SourceEvent {
        ResourceEvent::changed(scope, ResourceIdentity::location(id), json!({ "index_mode": mode }))
            .into()
    }

    fn listing(scope: ScopeId, id: &str) -> QueryKey {
        QueryKey::scoped(scope, DIRECTORY_LISTING_FAMILY).arg(id)
    }

    #[test]
    fn test_significant_change_upserts_then_invalidates() {
        let pipeline = pipeline();
        let scope = ScopeId::new();
        let mut records = TransitionRecords::new();
        pipeline.store().put_query(listing(scope, "L1"), json!([])).unwrap();

        pipeline.process(&mut records, scope, mode(scope, "L1", "none")).unwrap();
        let outcomes = pipeline
            .process(&mut records, scope, mode(scope, "L1", "full"))
            .unwrap();

        assert_eq!(
            outcomes,
            vec![EventOutcome::Changed {
                identity: ResourceIdentity::location("L1"),
                classification: Classification::Significant,
                malformed: false,
                invalidated: 1,
            }]
        );
        let stored = pipeline
            .store()
            .projection(scope, &ResourceIdentity::location("L1"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.field("index_mode"), Some(&json!("full")));
        assert!(pipeline.store().read(&listing(scope, "L1")).unwrap().unwrap().is_stale());
    }

    #[test]
    fn test_scope_mismatch_touches_nothing() {
        let pipeline = pipeline();
        let scope = ScopeId::new();
        let other = ScopeId::new();
        let mut records = TransitionRecords::new();

        let err = pipeline
            .process(&mut records, scope, mode(other, "L1", "none"))
            .unwrap_err();
        assert_eq!(
            err,
            EventError::ScopeMismatch {
                expected: scope,
                got: other
            }
        );
        assert!(records.is_empty());
        assert_eq!(pipeline.store().stats().unwrap().resources, 0);
        assert_eq!(pipeline.stats().snapshot().scope_mismatches, 1);
    }

    #[test]
    fn test_malformed_change_is_noise_and_still_upserted() {
        let pipeline = pipeline();
        let scope = ScopeId::new();
        let mut records = TransitionRecords::new();

        let event = ResourceEvent::changed(scope, ResourceIdentity::location("L1"), json!({}));
        let outcomes = pipeline.process(&mut records, scope, event.into()).unwrap();

        assert_eq!(outcomes[0].classification(), Some(Classification::Noise));
        assert!(matches!(outcomes[0], EventOutcome::Changed { malformed: true, .. }));
        assert!(pipeline
            .store()
            .projection(scope, &ResourceIdentity::location("L1"))
            .unwrap()
            .is_some());
        assert_eq!(pipeline.stats().snapshot().malformed, 1);
    }

    #[test]
    fn test_mistagged_projection_is_not_upserted() {
        let pipeline = pipeline();
        let scope = ScopeId::new();
        let mut records = TransitionRecords::new();

        let event = ResourceEvent::new(
            ResourceIdentity::location("L1"),
            scope,
            ResourceProjection::new(ResourceType::Tag, json!({ "index_mode": "none" })),
        );
        let outcomes = pipeline.process(&mut records, scope, event.into()).unwrap();

        assert!(matches!(outcomes[0], EventOutcome::Changed { malformed: true, .. }));
        assert_eq!(pipeline.store().stats().unwrap().resources, 0);
        assert!(records.is_empty());
    }

    #[test]
    fn test_batch_processed_in_order() {
        let pipeline = pipeline();
        let scope = ScopeId::new();
        let mut records = TransitionRecords::new();
        pipeline.store().put_query(listing(scope, "L1"), json!([])).unwrap();

        let batch = SourceEvent::ResourceChangedBatch {
            scope,
            resource_type: ResourceType::Location,
            resources: vec![
                BatchItem {
                    resource_id: "L1".into(),
                    payload: json!({ "index_mode": "none" }),
                },
                BatchItem {
                    resource_id: "L1".into(),
                    payload: json!({ "index_mode": "quick" }),
                },
            ],
        };
        let outcomes = pipeline.process(&mut records, scope, batch).unwrap();

        let classes: Vec<_> = outcomes.iter().filter_map(EventOutcome::classification).collect();
        assert_eq!(classes, vec![Classification::Noise, Classification::Significant]);
        assert_eq!(pipeline.stats().snapshot().events_processed, 2);
    }

    #[test]
    fn test_deletion_forgets_without_invalidating() {
        let pipeline = pipeline();
        let scope = ScopeId::new();
        let mut records = TransitionRecords::new();
        let identity = ResourceIdentity::location("L1");
        pipeline.store().put_query(listing(scope, "L1"), json!([])).unwrap();

        pipeline.process(&mut records, scope, mode(scope, "L1", "none")).unwrap();
        let outcomes = pipeline
            .process(
                &mut records,
                scope,
                SourceEvent::ResourceDeleted {
                    scope,
                    identity: identity.clone(),
                },
            )
            .unwrap();

        assert_eq!(outcomes, vec![EventOutcome::Deleted { identity: identity.clone() }]);
        assert!(records.is_empty());
        assert!(pipeline.store().projection(scope, &identity).unwrap().is_none());
        assert!(!pipeline.store().read(&listing(scope, "L1")).unwrap().unwrap().is_stale());

        // Re-created resource starts over with a first observation.
        let outcomes = pipeline
            .process(&mut records, scope, mode(scope, "L1", "full"))
            .unwrap();
        assert_eq!(outcomes[0].classification(), Some(Classification::Noise));
    }

    #[test]
    fn test_source_switch_invalidates_unscoped_listing() {
        let pipeline = pipeline();
        let scope = ScopeId::new();
        let mut records = TransitionRecords::new();
        let key = QueryKey::global(DIRECTORY_LISTING_FAMILY).arg("L1");
        pipeline.store().put_query(key.clone(), json!([])).unwrap();

        let first = pipeline.process(&mut records, scope, mode(scope, "L1", "none")).unwrap();
        assert_eq!(first[0].classification(), Some(Classification::Noise));
        let outcomes = pipeline
            .process(&mut records, scope, mode(scope, "L1", "full"))
            .unwrap();

        assert!(matches!(
            outcomes[0],
            EventOutcome::Changed { classification: Classification::Significant, invalidated: 1, .. }
        ));
        assert!(pipeline.store().read(&key).unwrap().unwrap().is_stale());
    }

    #[test]
    fn test_disposed_store_does_not_abort_processing() {
        let pipeline = pipeline();
        let scope = ScopeId::new();
        let mut records = TransitionRecords::new();
        pipeline.store().dispose().unwrap();

        pipeline.process(&mut records, scope, mode(scope, "L1", "none")).unwrap();
        let outcomes = pipeline
            .process(&mut records, scope, mode(scope, "L1", "full"))
            .unwrap();
        assert_eq!(outcomes[0].classification(), Some(Classification::Significant));
    }
}
