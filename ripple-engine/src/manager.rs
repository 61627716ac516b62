//! Scoped subscription lifecycle.
//!
//! At most one subscription is live at a time, bound to the active scope.
//! Each subscription owns its [`TransitionRecords`] behind a lock together
//! with a cancellation token. Every delivered event checks the token under
//! that lock before touching any state, so once teardown has cancelled the
//! token and taken the lock once, no further mutation can happen.

use crate::detector::TransitionRecords;
use crate::pipeline::InvalidationPipeline;
use crate::stats::EngineStats;
use ripple_core::{
    EngineConfig, EventError, ResourceType, RippleResult, ScopeId, SourceEvent,
    SubscriptionError, SubscriptionId,
};
use ripple_events::{EventCallback, ResourceEventSource, SubscriptionFilter, SubscriptionHandle};
use ripple_storage::ResourceStore;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

/// State shared between a subscription's callback and its owner.
struct SubscriptionState {
    scope: ScopeId,
    id: OnceLock<SubscriptionId>,
    token: CancellationToken,
    records: Mutex<TransitionRecords>,
    pipeline: Arc<InvalidationPipeline>,
}

impl SubscriptionState {
    fn deliver(&self, event: SourceEvent) {
        let mut records = match self.records.lock() {
            Ok(records) => records,
            Err(_) => {
                error!(scope = %self.scope, "Transition records lock poisoned, dropping event");
                return;
            }
        };

        if self.token.is_cancelled() {
            EngineStats::incr(&self.pipeline.stats().stale_callbacks_dropped);
            if let Some(subscription_id) = self.id.get().copied() {
                let err = EventError::StaleSubscriptionCallback { subscription_id };
                trace!(scope = %self.scope, error = %err, "Dropping event");
            }
            return;
        }

        // Per-event errors are logged by the pipeline and never end the stream.
        match self.pipeline.process(&mut records, self.scope, event) {
            Ok(outcomes) => {
                trace!(scope = %self.scope, outcomes = outcomes.len(), "Delivered event");
            }
            Err(err) => {
                trace!(scope = %self.scope, error = %err, "Event discarded");
            }
        }
    }
}

struct ActiveSubscription {
    state: Arc<SubscriptionState>,
    handle: SubscriptionHandle,
}

impl ActiveSubscription {
    /// Cancel, wait for the source to acknowledge, then discard the records.
    async fn teardown(self) -> Result<(), SubscriptionError> {
        let scope = self.state.scope;
        let subscription_id = self.handle.id();

        self.state.token.cancel();
        // An event already past the token check finishes before this returns.
        if let Ok(records) = self.state.records.lock() {
            drop(records);
        }

        let result = self.handle.unsubscribe().await;

        let discarded = match self.state.records.lock() {
            Ok(mut records) => {
                let len = records.len();
                records.clear();
                len
            }
            Err(poisoned) => {
                let mut records = poisoned.into_inner();
                let len = records.len();
                records.clear();
                len
            }
        };

        match &result {
            Ok(()) => info!(
                scope = %scope,
                subscription_id = %subscription_id,
                discarded_records = discarded,
                "Subscription closed"
            ),
            Err(err) => error!(
                scope = %scope,
                subscription_id = %subscription_id,
                error = %err,
                "Subscription teardown failed"
            ),
        }
        result
    }
}

/// Keeps one live subscription for the active scope.
pub struct ScopedSubscriptionManager<S> {
    source: S,
    pipeline: Arc<InvalidationPipeline>,
    resource_types: BTreeSet<ResourceType>,
    active: tokio::sync::Mutex<Option<ActiveSubscription>>,
}

impl<S: ResourceEventSource> ScopedSubscriptionManager<S> {
    /// Subscribe to every resource type, feeding `pipeline`.
    pub fn new(source: S, pipeline: Arc<InvalidationPipeline>) -> Self {
        Self {
            source,
            pipeline,
            resource_types: BTreeSet::new(),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Build the store, policies and pipeline from `config`.
    pub fn from_config(source: S, config: &EngineConfig) -> Self {
        let store = Arc::new(ResourceStore::from_config(config));
        let pipeline = Arc::new(InvalidationPipeline::from_config(config, store));
        Self::new(source, pipeline)
            .with_resource_types(config.tracked_resource_types.iter().copied())
    }

    /// Restrict subscriptions to these resource types.
    pub fn with_resource_types(mut self, types: impl IntoIterator<Item = ResourceType>) -> Self {
        self.resource_types.extend(types);
        self
    }

    pub fn pipeline(&self) -> &Arc<InvalidationPipeline> {
        &self.pipeline
    }

    pub fn store(&self) -> &Arc<ResourceStore> {
        self.pipeline.store()
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        self.pipeline.stats()
    }

    /// Switch the active scope.
    ///
    /// Equal to the current scope is a no-op. Otherwise the previous
    /// subscription is cancelled and its teardown awaited before its records
    /// are discarded, and then, for `Some(scope)`, a new subscription with an
    /// empty record map is opened. Setup failures are returned as-is, without
    /// retrying; the manager is then left with no active scope.
    pub async fn set_scope(&self, scope: Option<ScopeId>) -> RippleResult<()> {
        let mut active = self.active.lock().await;
        let current = active.as_ref().map(|subscription| subscription.state.scope);
        if current == scope {
            return Ok(());
        }

        if let Some(previous) = active.take() {
            previous.teardown().await?;
        }

        if let Some(scope) = scope {
            *active = Some(self.open(scope).await?);
        }
        Ok(())
    }

    /// Close the active subscription, if any.
    pub async fn shutdown(&self) -> RippleResult<()> {
        self.set_scope(None).await
    }

    pub async fn active_scope(&self) -> Option<ScopeId> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|subscription| subscription.state.scope)
    }

    pub async fn active_subscription_id(&self) -> Option<SubscriptionId> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|subscription| subscription.handle.id())
    }

    /// Number of transition records held by the active subscription.
    pub async fn tracked_resources(&self) -> usize {
        let active = self.active.lock().await;
        active
            .as_ref()
            .and_then(|subscription| subscription.state.records.lock().ok().map(|r| r.len()))
            .unwrap_or(0)
    }

    async fn open(&self, scope: ScopeId) -> Result<ActiveSubscription, SubscriptionError> {
        let state = Arc::new(SubscriptionState {
            scope,
            id: OnceLock::new(),
            token: CancellationToken::new(),
            records: Mutex::new(TransitionRecords::new()),
            pipeline: self.pipeline.clone(),
        });

        let delivery = state.clone();
        let callback: EventCallback = Arc::new(move |event| delivery.deliver(event));
        let filter =
            SubscriptionFilter::scope(scope).with_types(self.resource_types.iter().copied());

        let handle = match self.source.subscribe(filter, callback).await {
            Ok(handle) => handle,
            Err(err) => {
                error!(scope = %scope, error = %err, "Subscription failed");
                return Err(err);
            }
        };
        let _ = state.id.set(handle.id());

        info!(scope = %scope, subscription_id = %handle.id(), "Subscription opened");
        Ok(ActiveSubscription { state, handle })
    }
}
