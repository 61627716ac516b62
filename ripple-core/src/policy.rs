//! Declarative transition and invalidation policies
//!
//! Policies are plain data so they can be loaded from configuration. The
//! detector and dispatcher in `ripple-engine` interpret them.

use crate::{Classification, ConfigError, ResourceType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Query family of directory listings, parameterized by location id.
pub const DIRECTORY_LISTING_FAMILY: &str = "files.directory_listing";

/// Field of a location projection that holds its index mode.
pub const INDEX_MODE_FIELD: &str = "index_mode";

/// Last-observed value of a resource's discriminant field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Discriminant(String);

impl Discriminant {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Discriminant {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Discriminant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pattern over discriminant values.
///
/// Written as a string in configuration: `"none"` matches exactly,
/// `"!none"` matches anything else, `"*"` matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValuePattern {
    Any,
    Exact(String),
    Not(String),
}

impl ValuePattern {
    pub fn exact(value: impl Into<String>) -> Self {
        Self::Exact(value.into())
    }

    pub fn not(value: impl Into<String>) -> Self {
        Self::Not(value.into())
    }

    pub fn matches(&self, value: &Discriminant) -> bool {
        match self {
            ValuePattern::Any => true,
            ValuePattern::Exact(expected) => expected == value.as_str(),
            ValuePattern::Not(excluded) => excluded != value.as_str(),
        }
    }
}

impl FromStr for ValuePattern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            field: "pattern".to_string(),
            reason: format!("'{}' {}", s, reason),
        };
        match s {
            "" => Err(invalid("is empty")),
            "*" => Ok(ValuePattern::Any),
            _ => match s.strip_prefix('!') {
                Some("") => Err(invalid("negates nothing")),
                Some(rest) => Ok(ValuePattern::Not(rest.to_string())),
                None => Ok(ValuePattern::Exact(s.to_string())),
            },
        }
    }
}

impl TryFrom<String> for ValuePattern {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ValuePattern> for String {
    fn from(pattern: ValuePattern) -> Self {
        pattern.to_string()
    }
}

impl fmt::Display for ValuePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValuePattern::Any => f.write_str("*"),
            ValuePattern::Exact(value) => f.write_str(value),
            ValuePattern::Not(value) => write!(f, "!{}", value),
        }
    }
}

/// Where a resource type keeps its discriminant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscriminantRule {
    /// Dotted path into the projection payload.
    pub field: String,
    /// Accepted values. Empty accepts any scalar.
    #[serde(default)]
    pub allowed: Vec<String>,
}

/// Explicit `(prior, new) -> classification` table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionEntry {
    pub from: ValuePattern,
    pub to: ValuePattern,
    pub classification: Classification,
}

/// A transition that moves a resource between serving data sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSwitch {
    pub from: ValuePattern,
    pub to: ValuePattern,
}

impl SourceSwitch {
    pub fn matches(&self, prior: &Discriminant, new: &Discriminant) -> bool {
        self.from.matches(prior) && self.to.matches(new)
    }
}

/// Transition table for one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionPolicy {
    pub resource_type: ResourceType,
    pub discriminant: DiscriminantRule,
    /// Explicit entries, consulted first; the first match wins.
    #[serde(default)]
    pub table: Vec<TransitionEntry>,
    /// Pairs that are significant when no table entry matches.
    #[serde(default)]
    pub source_switches: Vec<SourceSwitch>,
}

impl TransitionPolicy {
    /// Locations switch data source when they leave the ephemeral index
    /// (`none`) for a persisted index mode. Dropping back to `none` is noise
    /// unless a switch for it is added with [`Self::with_source_switch`].
    pub fn location_index_mode() -> Self {
        Self {
            resource_type: ResourceType::Location,
            discriminant: DiscriminantRule {
                field: INDEX_MODE_FIELD.to_string(),
                allowed: crate::IndexMode::ALL
                    .iter()
                    .map(|mode| mode.as_str().to_string())
                    .collect(),
            },
            table: Vec::new(),
            source_switches: vec![SourceSwitch {
                from: ValuePattern::exact("none"),
                to: ValuePattern::not("none"),
            }],
        }
    }

    pub fn with_source_switch(mut self, from: ValuePattern, to: ValuePattern) -> Self {
        self.source_switches.push(SourceSwitch { from, to });
        self
    }
}

/// Static mapping from a resource type to one dependent query family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvalidationRule {
    pub resource_type: ResourceType,
    pub family: String,
    /// When set, only keys whose first argument is the resource id match.
    #[serde(default)]
    pub narrow_by_id: bool,
}

impl InvalidationRule {
    /// Directory listings keyed by location id.
    pub fn location_directory_listing() -> Self {
        Self {
            resource_type: ResourceType::Location,
            family: DIRECTORY_LISTING_FAMILY.to_string(),
            narrow_by_id: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_pattern_parse() {
        assert_eq!("*".parse::<ValuePattern>().unwrap(), ValuePattern::Any);
        assert_eq!(
            "none".parse::<ValuePattern>().unwrap(),
            ValuePattern::exact("none")
        );
        assert_eq!(
            "!none".parse::<ValuePattern>().unwrap(),
            ValuePattern::not("none")
        );
        assert!("".parse::<ValuePattern>().is_err());
        assert!("!".parse::<ValuePattern>().is_err());
    }

    #[test]
    fn test_value_pattern_display_round_trips() {
        for raw in ["*", "full", "!none"] {
            let pattern: ValuePattern = raw.parse().unwrap();
            assert_eq!(pattern.to_string(), raw);
        }
    }

    #[test]
    fn test_value_pattern_matches() {
        let none = Discriminant::from("none");
        let full = Discriminant::from("full");
        assert!(ValuePattern::Any.matches(&none));
        assert!(ValuePattern::exact("none").matches(&none));
        assert!(!ValuePattern::exact("none").matches(&full));
        assert!(ValuePattern::not("none").matches(&full));
        assert!(!ValuePattern::not("none").matches(&none));
    }

    #[test]
    fn test_location_policy_switches_on_leaving_none() {
        let policy = TransitionPolicy::location_index_mode();
        let none = Discriminant::from("none");
        let full = Discriminant::from("full");
        let quick = Discriminant::from("quick");

        assert!(policy.source_switches.iter().any(|s| s.matches(&none, &full)));
        assert!(!policy.source_switches.iter().any(|s| s.matches(&full, &none)));
        assert!(!policy.source_switches.iter().any(|s| s.matches(&quick, &full)));
    }

    #[test]
    fn test_reverse_switch_is_opt_in() {
        let policy = TransitionPolicy::location_index_mode()
            .with_source_switch(ValuePattern::not("none"), ValuePattern::exact("none"));
        let none = Discriminant::from("none");
        let full = Discriminant::from("full");

        assert_eq!(policy.source_switches.len(), 2);
        assert!(policy.source_switches.iter().any(|s| s.matches(&full, &none)));
    }

    #[test]
    fn test_location_policy_allows_every_index_mode() {
        let policy = TransitionPolicy::location_index_mode();
        assert_eq!(policy.discriminant.allowed.len(), crate::IndexMode::ALL.len());
        assert_eq!(policy.discriminant.field, INDEX_MODE_FIELD);
    }
}
