//! Ripple Test Utilities
//!
//! Shared test infrastructure for the Ripple workspace:
//! - A scriptable event source with failure injection and gated teardown
//! - Proptest generators for identities, index modes and event sequences
//! - Fixtures for common location scenarios
//! - Store assertions and an async polling helper

pub use ripple_core::{
    Classification, EngineConfig, IndexMode, QueryKey, QueryPredicate, ResourceEvent,
    ResourceIdentity, ResourceType, ScopeId, SourceEvent, SubscriptionError, SubscriptionId,
    DIRECTORY_LISTING_FAMILY,
};
pub use ripple_storage::ResourceStore;

use async_trait::async_trait;
use ripple_events::{EventCallback, ResourceEventSource, SubscriptionFilter, SubscriptionHandle};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify};

// ============================================================================
// MANUAL EVENT SOURCE
// ============================================================================

struct ManualSubscription {
    id: SubscriptionId,
    filter: SubscriptionFilter,
    callback: EventCallback,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct ManualInner {
    subscriptions: Mutex<Vec<ManualSubscription>>,
    fail_next_subscribe: Mutex<Option<String>>,
    fail_next_teardown: Mutex<Option<String>>,
    teardown_gate: Mutex<Option<watch::Receiver<bool>>>,
    teardown_started: Notify,
    subscribe_calls: AtomicUsize,
}

/// Event source driven by the test.
///
/// Events are delivered synchronously on the caller's thread by
/// [`emit`](Self::emit). Setup and teardown failures can be injected, and
/// teardowns can be held open to exercise delivery racing cancellation.
#[derive(Clone, Default)]
pub struct ManualEventSource {
    inner: Arc<ManualInner>,
}

/// Releases teardowns held by [`ManualEventSource::hold_teardowns`].
pub struct TeardownGate {
    tx: watch::Sender<bool>,
}

impl TeardownGate {
    pub fn release(&self) {
        let _ = self.tx.send(true);
    }
}

impl ManualEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `subscribe` fails with `SubscriptionFailed`.
    pub fn fail_next_subscribe(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.inner.fail_next_subscribe.lock() {
            *slot = Some(reason.into());
        }
    }

    /// The next teardown completes with `TeardownFailed`.
    pub fn fail_next_teardown(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.inner.fail_next_teardown.lock() {
            *slot = Some(reason.into());
        }
    }

    /// Teardowns started after this call do not complete until the gate is
    /// released. Delivery to the subscription keeps working meanwhile.
    pub fn hold_teardowns(&self) -> TeardownGate {
        let (tx, rx) = watch::channel(false);
        if let Ok(mut slot) = self.inner.teardown_gate.lock() {
            *slot = Some(rx);
        }
        TeardownGate { tx }
    }

    /// Resolves once a teardown has started (immediately if one already did).
    pub async fn teardown_started(&self) {
        self.inner.teardown_started.notified().await;
    }

    /// Deliver `event` to every active subscription whose filter matches.
    ///
    /// Returns the number of callbacks invoked.
    pub fn emit(&self, event: impl Into<SourceEvent>) -> usize {
        let event = event.into();
        let callbacks: Vec<EventCallback> = match self.inner.subscriptions.lock() {
            Ok(subscriptions) => subscriptions
                .iter()
                .filter(|s| s.active.load(Ordering::SeqCst) && s.filter.matches(&event))
                .map(|s| s.callback.clone())
                .collect(),
            Err(_) => return 0,
        };
        for callback in &callbacks {
            callback(event.clone());
        }
        callbacks.len()
    }

    /// Invoke one subscription's callback directly, even after it was torn
    /// down and ignoring its filter. Returns false for an unknown id.
    pub fn emit_to(&self, subscription_id: SubscriptionId, event: impl Into<SourceEvent>) -> bool {
        let callback = match self.inner.subscriptions.lock() {
            Ok(subscriptions) => subscriptions
                .iter()
                .find(|s| s.id == subscription_id)
                .map(|s| s.callback.clone()),
            Err(_) => None,
        };
        match callback {
            Some(callback) => {
                callback(event.into());
                true
            }
            None => false,
        }
    }

    /// Most recent subscription opened for `scope`.
    pub fn subscription_for(&self, scope: ScopeId) -> Option<SubscriptionId> {
        self.inner.subscriptions.lock().ok().and_then(|subscriptions| {
            subscriptions
                .iter()
                .rev()
                .find(|s| s.filter.scope == scope)
                .map(|s| s.id)
        })
    }

    /// Filter of a subscription, if it exists.
    pub fn filter_of(&self, subscription_id: SubscriptionId) -> Option<SubscriptionFilter> {
        self.inner.subscriptions.lock().ok().and_then(|subscriptions| {
            subscriptions
                .iter()
                .find(|s| s.id == subscription_id)
                .map(|s| s.filter.clone())
        })
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .subscriptions
            .lock()
            .map(|subscriptions| {
                subscriptions
                    .iter()
                    .filter(|s| s.active.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_active(&self, subscription_id: SubscriptionId) -> bool {
        self.inner
            .subscriptions
            .lock()
            .map(|subscriptions| {
                subscriptions
                    .iter()
                    .any(|s| s.id == subscription_id && s.active.load(Ordering::SeqCst))
            })
            .unwrap_or(false)
    }

    /// Number of `subscribe` calls, including failed ones.
    pub fn subscribe_calls(&self) -> usize {
        self.inner.subscribe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceEventSource for ManualEventSource {
    async fn subscribe(
        &self,
        filter: SubscriptionFilter,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        self.inner.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let failure = self
            .inner
            .fail_next_subscribe
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(reason) = failure {
            return Err(SubscriptionError::SubscriptionFailed {
                scope: filter.scope,
                reason,
            });
        }

        let id = SubscriptionId::new();
        let active = Arc::new(AtomicBool::new(true));
        if let Ok(mut subscriptions) = self.inner.subscriptions.lock() {
            subscriptions.push(ManualSubscription {
                id,
                filter,
                callback,
                active: active.clone(),
            });
        }

        let inner = self.inner.clone();
        let teardown = async move {
            let gate = inner.teardown_gate.lock().ok().and_then(|slot| slot.clone());
            inner.teardown_started.notify_one();
            if let Some(mut gate) = gate {
                let _ = gate.wait_for(|released| *released).await;
            }
            active.store(false, Ordering::SeqCst);

            let failure = inner
                .fail_next_teardown
                .lock()
                .ok()
                .and_then(|mut slot| slot.take());
            match failure {
                Some(reason) => Err(SubscriptionError::TeardownFailed {
                    subscription_id: id,
                    reason,
                }),
                None => Ok(()),
            }
        };

        Ok(SubscriptionHandle::new(id, teardown))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Ripple types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    pub fn arb_scope_id() -> impl Strategy<Value = ScopeId> {
        any::<[u8; 16]>().prop_map(|bytes| ScopeId::from_uuid(Uuid::from_bytes(bytes)))
    }

    pub fn arb_index_mode() -> impl Strategy<Value = IndexMode> {
        prop::sample::select(IndexMode::ALL.to_vec())
    }

    pub fn arb_resource_type() -> impl Strategy<Value = ResourceType> {
        prop::sample::select(ResourceType::ALL.to_vec())
    }

    /// Small id space so sequences revisit the same locations.
    pub fn arb_location_id() -> impl Strategy<Value = String> {
        (0u8..4).prop_map(|n| format!("L{}", n))
    }

    pub fn arb_location_identity() -> impl Strategy<Value = ResourceIdentity> {
        arb_location_id().prop_map(ResourceIdentity::location)
    }

    /// A location change within `scope`.
    pub fn arb_location_event(scope: ScopeId) -> impl Strategy<Value = ResourceEvent> {
        (arb_location_id(), arb_index_mode())
            .prop_map(move |(id, mode)| fixtures::location_event(scope, &id, mode))
    }

    pub fn arb_location_events(
        scope: ScopeId,
        max_len: usize,
    ) -> impl Strategy<Value = Vec<ResourceEvent>> {
        prop::collection::vec(arb_location_event(scope), 1..=max_len.max(1))
    }

    /// `(location id, index mode)` pairs, for building events in several scopes.
    pub fn arb_mode_changes(max_len: usize) -> impl Strategy<Value = Vec<(String, IndexMode)>> {
        prop::collection::vec((arb_location_id(), arb_index_mode()), 1..=max_len.max(1))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built events, keys and stores.

    use super::*;
    use serde_json::json;

    /// A location change carrying `mode` as its index mode.
    pub fn location_event(scope: ScopeId, id: &str, mode: IndexMode) -> ResourceEvent {
        ResourceEvent::changed(
            scope,
            ResourceIdentity::location(id),
            json!({ "index_mode": mode.as_str(), "name": id }),
        )
    }

    pub fn location_deleted(scope: ScopeId, id: &str) -> SourceEvent {
        SourceEvent::ResourceDeleted {
            scope,
            identity: ResourceIdentity::location(id),
        }
    }

    /// A location change whose projection lacks the index mode.
    pub fn malformed_location_event(scope: ScopeId, id: &str) -> ResourceEvent {
        ResourceEvent::changed(scope, ResourceIdentity::location(id), json!({ "name": id }))
    }

    pub fn listing_key(scope: ScopeId, location_id: &str) -> QueryKey {
        QueryKey::scoped(scope, DIRECTORY_LISTING_FAMILY).arg(location_id)
    }

    pub fn default_config() -> EngineConfig {
        EngineConfig::with_default_policies()
    }

    /// Materialize a fresh directory listing for each location in `scope`.
    pub fn seed_listings(store: &ResourceStore, scope: ScopeId, location_ids: &[&str]) {
        for id in location_ids {
            // Seeding a disposed store is a test bug.
            let _ = store.put_query(listing_key(scope, id), json!([format!("{}/a.txt", id)]));
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Store assertions and async helpers.

    use super::*;
    use std::time::Duration;

    pub fn is_stale(store: &ResourceStore, key: &QueryKey) -> bool {
        match store.read(key) {
            Ok(Some(read)) => read.is_stale(),
            Ok(None) => panic!("query {} was never materialized", key),
            Err(err) => panic!("reading {} failed: {}", key, err),
        }
    }

    pub fn assert_stale(store: &ResourceStore, key: &QueryKey) {
        assert!(is_stale(store, key), "expected {} to be stale", key);
    }

    pub fn assert_fresh(store: &ResourceStore, key: &QueryKey) {
        assert!(!is_stale(store, key), "expected {} to be fresh", key);
    }

    /// Poll `condition` until it holds or `timeout` passes.
    pub async fn wait_until<F>(timeout: Duration, condition: F) -> bool
    where
        F: Fn() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
