//! Ripple Engine - Resource-Event-Driven Cache Invalidation
//!
//! Turns a live stream of resource-change notifications into precise
//! staleness flags on cached query results.
//!
//! ## Architecture
//!
//! - [`ScopedSubscriptionManager`] keeps one subscription open for the active
//!   scope and tears it down safely on scope change
//! - [`InvalidationPipeline`] runs each delivered change through the store,
//!   the detector and the dispatcher as one step
//! - [`TransitionDetector`] classifies changes against per-type transition
//!   tables, using the last-observed values in [`TransitionRecords`]
//! - [`QueryInvalidationDispatcher`] turns significant changes into
//!   scope-confined query predicates and marks matches stale

pub mod detector;
pub mod dispatcher;
pub mod manager;
pub mod pipeline;
pub mod stats;
pub mod telemetry;

pub use detector::{TransitionDetector, TransitionRecords};
pub use dispatcher::QueryInvalidationDispatcher;
pub use manager::ScopedSubscriptionManager;
pub use pipeline::{EventOutcome, InvalidationPipeline};
pub use stats::{EngineStats, EngineStatsSnapshot};
pub use telemetry::init_tracing;
