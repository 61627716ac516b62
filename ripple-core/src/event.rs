//! Resource event types
//!
//! The backend's notifications are decoded once, at the subscription
//! boundary, into [`SourceEvent`]. Everything downstream works with typed
//! variants instead of re-inspecting ad-hoc payload shapes.

use crate::{EventError, ResourceId, ResourceIdentity, ResourceType, ScopeId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Type-tagged snapshot of a resource's observable fields.
///
/// Only the fields named by a discriminant rule are ever interpreted; the
/// rest of the payload is carried through to the store untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceProjection {
    pub resource_type: ResourceType,
    pub payload: JsonValue,
}

impl ResourceProjection {
    pub fn new(resource_type: ResourceType, payload: JsonValue) -> Self {
        Self {
            resource_type,
            payload,
        }
    }

    /// Look up a field by dotted path (`"index_mode"`, `"config.index_mode"`).
    pub fn field(&self, path: &str) -> Option<&JsonValue> {
        if path.is_empty() {
            return None;
        }
        path.split('.')
            .try_fold(&self.payload, |value, segment| value.get(segment))
    }

    /// Whether this projection may be stored under `identity`.
    pub fn is_valid_for(&self, identity: &ResourceIdentity) -> bool {
        self.resource_type == identity.resource_type
    }
}

/// One resource-changed notification, immutable once delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub identity: ResourceIdentity,
    pub scope: ScopeId,
    pub projection: ResourceProjection,
}

impl ResourceEvent {
    pub fn new(identity: ResourceIdentity, scope: ScopeId, projection: ResourceProjection) -> Self {
        Self {
            identity,
            scope,
            projection,
        }
    }

    /// Build an event whose projection is tagged with the identity's type.
    pub fn changed(scope: ScopeId, identity: ResourceIdentity, payload: JsonValue) -> Self {
        let projection = ResourceProjection::new(identity.resource_type, payload);
        Self::new(identity, scope, projection)
    }
}

/// One element of a batched change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub resource_id: ResourceId,
    pub payload: JsonValue,
}

/// Everything an event source can deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceEvent {
    /// A single resource's current projection.
    ResourceChanged(ResourceEvent),

    /// Several resources of one type changed together (e.g. during indexing).
    ResourceChangedBatch {
        scope: ScopeId,
        resource_type: ResourceType,
        resources: Vec<BatchItem>,
    },

    /// A resource no longer exists.
    ResourceDeleted {
        scope: ScopeId,
        identity: ResourceIdentity,
    },
}

impl SourceEvent {
    /// Decode one wire message.
    pub fn from_json(raw: &str) -> Result<Self, EventError> {
        serde_json::from_str(raw).map_err(|e| EventError::Undecodable {
            reason: e.to_string(),
        })
    }

    pub fn scope(&self) -> ScopeId {
        match self {
            SourceEvent::ResourceChanged(event) => event.scope,
            SourceEvent::ResourceChangedBatch { scope, .. }
            | SourceEvent::ResourceDeleted { scope, .. } => *scope,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            SourceEvent::ResourceChanged(event) => event.identity.resource_type,
            SourceEvent::ResourceChangedBatch { resource_type, .. } => *resource_type,
            SourceEvent::ResourceDeleted { identity, .. } => identity.resource_type,
        }
    }

    /// Variant name, for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            SourceEvent::ResourceChanged(_) => "ResourceChanged",
            SourceEvent::ResourceChangedBatch { .. } => "ResourceChangedBatch",
            SourceEvent::ResourceDeleted { .. } => "ResourceDeleted",
        }
    }

    /// Expand a batch into individual events, preserving order.
    pub fn batch_events(
        scope: ScopeId,
        resource_type: ResourceType,
        resources: Vec<BatchItem>,
    ) -> impl Iterator<Item = ResourceEvent> {
        resources.into_iter().map(move |item| {
            ResourceEvent::changed(
                scope,
                ResourceIdentity::new(resource_type, item.resource_id),
                item.payload,
            )
        })
    }
}

impl From<ResourceEvent> for SourceEvent {
    fn from(event: ResourceEvent) -> Self {
        SourceEvent::ResourceChanged(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_projection_field_lookup() {
        let projection = ResourceProjection::new(
            ResourceType::Location,
            json!({ "index_mode": "full", "config": { "depth": 3 } }),
        );
        assert_eq!(projection.field("index_mode"), Some(&json!("full")));
        assert_eq!(projection.field("config.depth"), Some(&json!(3)));
        assert_eq!(projection.field("config.missing"), None);
        assert_eq!(projection.field(""), None);
    }

    #[test]
    fn test_projection_valid_for_matching_type_only() {
        let projection = ResourceProjection::new(ResourceType::Tag, json!({}));
        assert!(projection.is_valid_for(&ResourceIdentity::new(ResourceType::Tag, "t1")));
        assert!(!projection.is_valid_for(&ResourceIdentity::location("t1")));
    }

    #[test]
    fn test_source_event_decodes_tagged_change() {
        let scope = ScopeId::new();
        let raw = json!({
            "type": "ResourceChanged",
            "identity": { "resource_type": "location", "resource_id": "L1" },
            "scope": scope,
            "projection": { "resource_type": "location", "payload": { "index_mode": "none" } }
        })
        .to_string();

        let event = SourceEvent::from_json(&raw).expect("tagged change should decode");
        assert_eq!(event.scope(), scope);
        assert_eq!(event.resource_type(), ResourceType::Location);
        assert_eq!(event.event_type(), "ResourceChanged");
    }

    #[test]
    fn test_source_event_rejects_unknown_variant() {
        let err = SourceEvent::from_json(r#"{"type":"Nope"}"#).unwrap_err();
        assert!(matches!(err, EventError::Undecodable { .. }));
    }

    #[test]
    fn test_batch_events_preserve_order() {
        let scope = ScopeId::new();
        let items = vec![
            BatchItem {
                resource_id: "a".into(),
                payload: json!({ "n": 1 }),
            },
            BatchItem {
                resource_id: "b".into(),
                payload: json!({ "n": 2 }),
            },
        ];
        let ids: Vec<String> = SourceEvent::batch_events(scope, ResourceType::File, items)
            .map(|e| e.identity.resource_id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
