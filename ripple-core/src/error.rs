//! Error types for Ripple operations

use crate::{ResourceIdentity, ResourceType, ScopeId, SubscriptionId};
use thiserror::Error;

/// Subscription lifecycle errors, surfaced to the scope-management caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Subscription failed for scope {scope}: {reason}")]
    SubscriptionFailed { scope: ScopeId, reason: String },

    #[error("Teardown of subscription {subscription_id} failed: {reason}")]
    TeardownFailed {
        subscription_id: SubscriptionId,
        reason: String,
    },
}

/// Per-event errors. These are contained locally and never abort a stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Malformed event for {identity}: {reason}")]
    MalformedEvent {
        identity: ResourceIdentity,
        reason: String,
    },

    #[error("Event delivered to cancelled subscription {subscription_id}")]
    StaleSubscriptionCallback { subscription_id: SubscriptionId },

    #[error("Event for scope {got} delivered to subscription for scope {expected}")]
    ScopeMismatch { expected: ScopeId, got: ScopeId },

    #[error("Undecodable event: {reason}")]
    Undecodable { reason: String },
}

/// Normalized store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Projection tagged {projection_type} cannot be stored under {identity}")]
    ProjectionTypeMismatch {
        identity: ResourceIdentity,
        projection_type: ResourceType,
    },

    #[error("Store has been disposed")]
    StoreDisposed,

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or RIPPLE_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("More than one transition policy for resource type {resource_type}")]
    DuplicatePolicy { resource_type: ResourceType },
}

/// Master error type for all Ripple errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RippleError {
    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Ripple operations.
pub type RippleResult<T> = Result<T, RippleError>;

// =============================================================================
// TESTS
// =============================================================================
