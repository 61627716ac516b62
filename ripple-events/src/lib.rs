//! Ripple Events - Resource Event Sources
//!
//! The consumer-side contract for backend change notifications
//! ([`ResourceEventSource`]) and an in-process broadcast implementation
//! ([`InMemoryEventBus`]) used by embedders and tests.

mod bus;
mod source;

pub use bus::InMemoryEventBus;
pub use source::{EventCallback, ResourceEventSource, SubscriptionFilter, SubscriptionHandle};
