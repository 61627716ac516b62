//! Transition detection.
//!
//! The detector interprets [`TransitionPolicy`] tables. It holds no per-resource
//! state of its own: the last-observed discriminants live in a
//! [`TransitionRecords`] arena owned by the subscription that observed them,
//! and are discarded with it.

use ripple_core::{
    Classification, Discriminant, EngineConfig, EventError, ResourceEvent, ResourceIdentity,
    ResourceProjection, ResourceType, TransitionPolicy,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Last-observed discriminant per resource identity, for one subscription.
#[derive(Debug, Default)]
pub struct TransitionRecords {
    records: HashMap<ResourceIdentity, Discriminant>,
}

impl TransitionRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &ResourceIdentity) -> Option<&Discriminant> {
        self.records.get(identity)
    }

    /// Replace the record, returning the previous discriminant.
    fn record(&mut self, identity: ResourceIdentity, value: Discriminant) -> Option<Discriminant> {
        self.records.insert(identity, value)
    }

    /// Drop the record of a deleted resource.
    pub fn forget(&mut self, identity: &ResourceIdentity) -> Option<Discriminant> {
        self.records.remove(identity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Classifies resource changes per declared transition policies.
#[derive(Debug, Clone, Default)]
pub struct TransitionDetector {
    policies: HashMap<ResourceType, TransitionPolicy>,
}

impl TransitionDetector {
    /// Later policies for the same resource type replace earlier ones.
    pub fn new(policies: impl IntoIterator<Item = TransitionPolicy>) -> Self {
        Self {
            policies: policies
                .into_iter()
                .map(|policy| (policy.resource_type, policy))
                .collect(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.transitions.iter().cloned())
    }

    pub fn policy(&self, resource_type: ResourceType) -> Option<&TransitionPolicy> {
        self.policies.get(&resource_type)
    }

    /// Observe one event, returning its classification or why it is malformed.
    ///
    /// The record is overwritten before classification, for noise as well as
    /// significant changes. A malformed event leaves the record untouched.
    /// Resource types without a policy keep no record and are always noise.
    pub fn try_observe(
        &self,
        records: &mut TransitionRecords,
        event: &ResourceEvent,
    ) -> Result<Classification, EventError> {
        let Some(policy) = self.policies.get(&event.identity.resource_type) else {
            return Ok(Classification::Noise);
        };

        let discriminant = extract(policy, &event.identity, &event.projection)?;
        let prior = records.record(event.identity.clone(), discriminant.clone());
        let classification = classify(policy, prior.as_ref(), &discriminant);

        if classification.is_significant() {
            debug!(
                identity = %event.identity,
                scope = %event.scope,
                from = prior.as_ref().map(Discriminant::as_str).unwrap_or("-"),
                to = %discriminant,
                "Significant transition"
            );
        }
        Ok(classification)
    }

    /// [`try_observe`](Self::try_observe), with malformed events logged and
    /// classified as noise.
    pub fn observe(&self, records: &mut TransitionRecords, event: &ResourceEvent) -> Classification {
        match self.try_observe(records, event) {
            Ok(classification) => classification,
            Err(err) => {
                warn!(identity = %event.identity, scope = %event.scope, error = %err, "Malformed event treated as noise");
                Classification::Noise
            }
        }
    }
}

/// Read the policy's discriminant field out of a projection.
pub fn extract(
    policy: &TransitionPolicy,
    identity: &ResourceIdentity,
    projection: &ResourceProjection,
) -> Result<Discriminant, EventError> {
    let malformed = |reason: String| EventError::MalformedEvent {
        identity: identity.clone(),
        reason,
    };

    if !projection.is_valid_for(identity) {
        return Err(malformed(format!(
            "projection tagged {}",
            projection.resource_type
        )));
    }

    let field = &policy.discriminant.field;
    let raw = match projection.field(field) {
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Bool(b)) => b.to_string(),
        Some(JsonValue::Number(n)) => n.to_string(),
        Some(JsonValue::Null) | None => {
            return Err(malformed(format!("missing field '{}'", field)));
        }
        Some(_) => {
            return Err(malformed(format!("field '{}' is not a scalar", field)));
        }
    };

    let allowed = &policy.discriminant.allowed;
    if !allowed.is_empty() && !allowed.iter().any(|value| value == &raw) {
        return Err(malformed(format!(
            "unexpected value '{}' for field '{}'",
            raw, field
        )));
    }
    Ok(Discriminant::new(raw))
}

/// Apply a policy's transition table to one `(prior, new)` pair.
///
/// A first observation and an unchanged value are always noise. Otherwise
/// the first matching table entry decides; absent one, the pair is
/// significant only when it matches a declared source switch.
pub fn classify(
    policy: &TransitionPolicy,
    prior: Option<&Discriminant>,
    new: &Discriminant,
) -> Classification {
    let Some(prior) = prior else {
        return Classification::Noise;
    };
    if prior == new {
        return Classification::Noise;
    }

    if let Some(entry) = policy
        .table
        .iter()
        .find(|entry| entry.from.matches(prior) && entry.to.matches(new))
    {
        return entry.classification;
    }

    if policy
        .source_switches
        .iter()
        .any(|switch| switch.matches(prior, new))
    {
        Classification::Significant
    } else {
        Classification::Noise
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::{ScopeId, TransitionEntry, ValuePattern};
    use serde_json::json;

    fn location(scope: ScopeId, id: &str, payload: JsonValue) -> ResourceEvent {
        ResourceEvent::changed(scope, ResourceIdentity::location(id), payload)
    }

    fn mode(scope: ScopeId, id: &str, mode: &str) -> ResourceEvent {
        location(scope, id, json!({ "index_mode": mode, "name": id }))
    }

    fn detector() -> TransitionDetector {
        TransitionDetector::new([TransitionPolicy::location_index_mode()])
    }

    #[test]
    fn test_first_observation_is_noise() {
        let detector = detector();
        let mut records = TransitionRecords::new();
        let scope = ScopeId::new();

        assert_eq!(
            detector.observe(&mut records, &mode(scope, "L2", "full")),
            Classification::Noise
        );
        assert_eq!(
            records.get(&ResourceIdentity::location("L2")),
            Some(&Discriminant::from("full"))
        );
    }

    #[test]
    fn test_none_none_full_sequence() {
        let detector = detector();
        let mut records = TransitionRecords::new();
        let scope = ScopeId::new();

        let classes: Vec<Classification> = ["none", "none", "full"]
            .into_iter()
            .map(|m| detector.observe(&mut records, &mode(scope, "L1", m)))
            .collect();
        assert_eq!(
            classes,
            vec![
                Classification::Noise,
                Classification::Noise,
                Classification::Significant
            ]
        );
    }

    #[test]
    fn test_persisted_to_none_is_noise_by_default() {
        let detector = detector();
        let mut records = TransitionRecords::new();
        let scope = ScopeId::new();

        detector.observe(&mut records, &mode(scope, "L1", "deep"));
        assert_eq!(
            detector.observe(&mut records, &mode(scope, "L1", "none")),
            Classification::Noise
        );
    }

    #[test]
    fn test_declared_reverse_switch_is_significant() {
        let detector = TransitionDetector::new([TransitionPolicy::location_index_mode()
            .with_source_switch(ValuePattern::not("none"), ValuePattern::exact("none"))]);
        let mut records = TransitionRecords::new();
        let scope = ScopeId::new();

        detector.observe(&mut records, &mode(scope, "L1", "deep"));
        assert_eq!(
            detector.observe(&mut records, &mode(scope, "L1", "none")),
            Classification::Significant
        );
    }

    #[test]
    fn test_between_persisted_modes_is_noise() {
        let detector = detector();
        let mut records = TransitionRecords::new();
        let scope = ScopeId::new();

        detector.observe(&mut records, &mode(scope, "L1", "shallow"));
        assert_eq!(
            detector.observe(&mut records, &mode(scope, "L1", "full")),
            Classification::Noise
        );
        assert_eq!(
            records.get(&ResourceIdentity::location("L1")),
            Some(&Discriminant::from("full"))
        );
    }

    #[test]
    fn test_table_entry_overrides_default() {
        let mut policy = TransitionPolicy::location_index_mode();
        policy.table.push(TransitionEntry {
            from: ValuePattern::exact("shallow"),
            to: ValuePattern::exact("full"),
            classification: Classification::Significant,
        });
        policy.table.push(TransitionEntry {
            from: ValuePattern::exact("none"),
            to: ValuePattern::Any,
            classification: Classification::Noise,
        });

        let shallow = Discriminant::from("shallow");
        let full = Discriminant::from("full");
        let none = Discriminant::from("none");
        assert_eq!(classify(&policy, Some(&shallow), &full), Classification::Significant);
        assert_eq!(classify(&policy, Some(&none), &full), Classification::Noise);
        assert_eq!(classify(&policy, Some(&full), &none), Classification::Noise);
    }

    #[test]
    fn test_equal_values_are_noise_even_with_wildcard_table() {
        let mut policy = TransitionPolicy::location_index_mode();
        policy.table.push(TransitionEntry {
            from: ValuePattern::Any,
            to: ValuePattern::Any,
            classification: Classification::Significant,
        });
        let full = Discriminant::from("full");
        assert_eq!(classify(&policy, Some(&full), &full), Classification::Noise);
        assert_eq!(classify(&policy, None, &full), Classification::Noise);
    }

    #[test]
    fn test_missing_field_is_malformed_and_keeps_record() {
        let detector = detector();
        let mut records = TransitionRecords::new();
        let scope = ScopeId::new();

        detector.observe(&mut records, &mode(scope, "L1", "none"));
        let err = detector
            .try_observe(&mut records, &location(scope, "L1", json!({ "name": "L1" })))
            .unwrap_err();
        assert!(matches!(err, EventError::MalformedEvent { .. }));
        assert_eq!(
            records.get(&ResourceIdentity::location("L1")),
            Some(&Discriminant::from("none"))
        );
    }

    #[test]
    fn test_unknown_mode_is_malformed() {
        let detector = detector();
        let mut records = TransitionRecords::new();
        let event = mode(ScopeId::new(), "L1", "turbo");

        assert!(detector.try_observe(&mut records, &event).is_err());
        assert_eq!(detector.observe(&mut records, &event), Classification::Noise);
        assert!(records.is_empty());
    }

    #[test]
    fn test_mismatched_projection_is_malformed() {
        let policy = TransitionPolicy::location_index_mode();
        let projection = ResourceProjection::new(ResourceType::Tag, json!({ "index_mode": "none" }));
        let err = extract(&policy, &ResourceIdentity::location("L1"), &projection).unwrap_err();
        assert!(err.to_string().contains("projection tagged tag"));
    }

    #[test]
    fn test_untracked_type_keeps_no_record() {
        let detector = detector();
        let mut records = TransitionRecords::new();
        let event = ResourceEvent::changed(
            ScopeId::new(),
            ResourceIdentity::new(ResourceType::Tag, "T1"),
            json!({ "color": "red" }),
        );
        assert_eq!(detector.observe(&mut records, &event), Classification::Noise);
        assert!(records.is_empty());
    }

    #[test]
    fn test_extract_accepts_scalar_values() {
        let policy = TransitionPolicy {
            resource_type: ResourceType::Volume,
            discriminant: ripple_core::DiscriminantRule {
                field: "state.mounted".to_string(),
                allowed: Vec::new(),
            },
            table: Vec::new(),
            source_switches: Vec::new(),
        };
        let identity = ResourceIdentity::new(ResourceType::Volume, "V1");
        let projection =
            ResourceProjection::new(ResourceType::Volume, json!({ "state": { "mounted": true } }));
        assert_eq!(
            extract(&policy, &identity, &projection).unwrap(),
            Discriminant::from("true")
        );
    }

    #[test]
    fn test_forget_removes_record() {
        let detector = detector();
        let mut records = TransitionRecords::new();
        let scope = ScopeId::new();
        detector.observe(&mut records, &mode(scope, "L1", "none"));

        assert!(records.forget(&ResourceIdentity::location("L1")).is_some());
        assert_eq!(
            detector.observe(&mut records, &mode(scope, "L1", "full")),
            Classification::Noise
        );
    }
}
