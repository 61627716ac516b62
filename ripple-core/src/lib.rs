//! Ripple Core - Data Types, Policies, and Errors
//!
//! Pure data structures shared by every other Ripple crate: resource and
//! scope identities, the typed event stream, query keys, declarative
//! transition/invalidation policies, configuration, and the error taxonomy.

mod config;
mod enums;
mod error;
mod event;
mod identity;
mod policy;
mod query;

pub use config::{resolve_config_path, EngineConfig, CONFIG_ENV_VAR};
pub use enums::{Classification, IndexMode};
pub use error::{
    ConfigError, EventError, RippleError, RippleResult, StorageError, SubscriptionError,
};
pub use event::{BatchItem, ResourceEvent, ResourceProjection, SourceEvent};
pub use identity::{
    ResourceId, ResourceIdentity, ResourceType, ScopeId, SubscriptionId, UnknownResourceType,
};
pub use policy::{
    Discriminant, DiscriminantRule, InvalidationRule, SourceSwitch, TransitionEntry,
    TransitionPolicy, ValuePattern, DIRECTORY_LISTING_FAMILY, INDEX_MODE_FIELD,
};
pub use query::{QueryKey, QueryPredicate};
