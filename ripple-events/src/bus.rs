//! In-process event bus.
//!
//! ## Architecture
//!
//! - One tokio broadcast channel carries every published event
//! - Each subscription gets its own delivery task that filters by scope and
//!   resource type, then invokes the callback
//! - Tearing a subscription down signals its task and awaits it, so the
//!   returned acknowledgment means no callback is running or will run

use crate::source::{EventCallback, ResourceEventSource, SubscriptionFilter, SubscriptionHandle};
use async_trait::async_trait;
use ripple_core::{EngineConfig, SourceEvent, SubscriptionError, SubscriptionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// Broadcast-backed [`ResourceEventSource`].
#[derive(Clone)]
pub struct InMemoryEventBus {
    /// Each delivery task subscribes to this channel and filters on its own.
    tx: broadcast::Sender<SourceEvent>,
    closed: Arc<AtomicBool>,
}

impl InMemoryEventBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a bus sized by `event_buffer`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.event_buffer)
    }

    /// Publish an event to every live subscription.
    ///
    /// Returns how many delivery tasks received it. Publishing with no
    /// subscribers simply drops the event.
    pub fn publish(&self, event: impl Into<SourceEvent>) -> usize {
        let event = event.into();
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(event_type = event_type, receivers = receivers, "Published event");
                receivers
            }
            Err(_) => {
                debug!(event_type = event_type, "No receivers for event");
                0
            }
        }
    }

    /// Refuse new subscriptions. Existing ones keep running until torn down.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        info!("Event bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of delivery tasks currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl ResourceEventSource for InMemoryEventBus {
    async fn subscribe(
        &self,
        filter: SubscriptionFilter,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        if self.is_closed() {
            return Err(SubscriptionError::SubscriptionFailed {
                scope: filter.scope,
                reason: "event bus is closed".to_string(),
            });
        }

        let id = SubscriptionId::new();
        let rx = self.tx.subscribe();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(deliver(id, filter, callback, rx, stop_rx));

        let teardown = async move {
            // The task may already be gone if the bus was dropped.
            let _ = stop_tx.send(());
            task.await
                .map_err(|e| SubscriptionError::TeardownFailed {
                    subscription_id: id,
                    reason: e.to_string(),
                })
        };

        Ok(SubscriptionHandle::new(id, teardown))
    }
}

/// Delivery loop for one subscription.
async fn deliver(
    id: SubscriptionId,
    filter: SubscriptionFilter,
    callback: EventCallback,
    mut rx: broadcast::Receiver<SourceEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    debug!(subscription_id = %id, scope = %filter.scope, "Delivery task started");
    loop {
        tokio::select! {
            biased;
            // Fires on an explicit stop and when the handle is dropped.
            _ = &mut stop_rx => break,
            result = rx.recv() => match result {
                Ok(event) => {
                    if filter.matches(&event) {
                        callback(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        subscription_id = %id,
                        skipped = skipped,
                        "Subscription lagged, events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!(subscription_id = %id, "Delivery task stopped");
}
