//! Resource event source trait.
//!
//! A source delivers [`SourceEvent`]s, one at a time, to a registered
//! callback until the subscription is torn down. Teardown is awaitable: once
//! [`SubscriptionHandle::unsubscribe`] resolves, the source has acknowledged
//! that it will not start delivering any further event.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use ripple_core::{ResourceType, ScopeId, SourceEvent, SubscriptionError, SubscriptionId};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Callback invoked for every delivered event.
///
/// Sources never invoke the callback for one subscription concurrently with
/// itself.
pub type EventCallback = Arc<dyn Fn(SourceEvent) + Send + Sync>;

/// Which events a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Accepted resource types. Empty accepts every type.
    pub resource_types: BTreeSet<ResourceType>,
    pub scope: ScopeId,
}

impl SubscriptionFilter {
    /// Every resource type within `scope`.
    pub fn scope(scope: ScopeId) -> Self {
        Self {
            resource_types: BTreeSet::new(),
            scope,
        }
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = ResourceType>) -> Self {
        self.resource_types.extend(types);
        self
    }

    pub fn matches(&self, event: &SourceEvent) -> bool {
        event.scope() == self.scope
            && (self.resource_types.is_empty()
                || self.resource_types.contains(&event.resource_type()))
    }
}

/// Handle to a live subscription.
///
/// Dropping the handle without calling [`unsubscribe`](Self::unsubscribe)
/// still stops delivery, but gives no acknowledgment.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    teardown: BoxFuture<'static, Result<(), SubscriptionError>>,
}

impl SubscriptionHandle {
    pub fn new<F>(id: SubscriptionId, teardown: F) -> Self
    where
        F: Future<Output = Result<(), SubscriptionError>> + Send + 'static,
    {
        Self {
            id,
            teardown: Box::pin(teardown),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop delivery and wait for the source to acknowledge it.
    pub async fn unsubscribe(self) -> Result<(), SubscriptionError> {
        self.teardown.await
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// The backend transport, seen from the consumer side.
#[async_trait]
pub trait ResourceEventSource: Send + Sync {
    /// Open a subscription delivering events that match `filter`.
    ///
    /// Fails with [`SubscriptionError::SubscriptionFailed`] when the
    /// transport is unavailable. Implementations must not retry internally.
    async fn subscribe(
        &self,
        filter: SubscriptionFilter,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle, SubscriptionError>;
}

#[async_trait]
impl<S: ResourceEventSource + ?Sized> ResourceEventSource for Arc<S> {
    async fn subscribe(
        &self,
        filter: SubscriptionFilter,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        (**self).subscribe(filter, callback).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::{ResourceEvent, ResourceIdentity};
    use serde_json::json;

    fn location_event(scope: ScopeId) -> SourceEvent {
        ResourceEvent::changed(
            scope,
            ResourceIdentity::location("L1"),
            json!({ "index_mode": "none" }),
        )
        .into()
    }

    #[test]
    fn test_filter_matches_scope() {
        let a = ScopeId::new();
        let b = ScopeId::new();
        let filter = SubscriptionFilter::scope(a);
        assert!(filter.matches(&location_event(a)));
        assert!(!filter.matches(&location_event(b)));
    }

    #[test]
    fn test_filter_matches_resource_types() {
        let scope = ScopeId::new();
        let tags_only = SubscriptionFilter::scope(scope).with_types([ResourceType::Tag]);
        assert!(!tags_only.matches(&location_event(scope)));

        let locations = SubscriptionFilter::scope(scope).with_types([ResourceType::Location]);
        assert!(locations.matches(&location_event(scope)));
    }

    #[tokio::test]
    async fn test_handle_runs_teardown_on_unsubscribe() {
        let id = SubscriptionId::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = SubscriptionHandle::new(id, async move {
            let _ = tx.send(());
            Ok(())
        });

        assert_eq!(handle.id(), id);
        handle.unsubscribe().await.expect("teardown should succeed");
        assert!(rx.await.is_ok());
    }
}
