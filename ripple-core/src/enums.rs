//! Enum types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Indexing mode of a location, the discriminant of location resources.
///
/// `None` means the location is served from an ephemeral, in-memory index;
/// every other mode is backed by the persisted index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// Location exists but is not indexed
    None,
    /// Only scan file/directory structure
    Shallow,
    /// Quick scan (metadata only)
    Quick,
    /// Include content hashing for deduplication
    Content,
    /// Full indexing with content analysis and metadata
    Deep,
    /// Full indexing with all features
    Full,
}

impl IndexMode {
    pub const ALL: [IndexMode; 6] = [
        IndexMode::None,
        IndexMode::Shallow,
        IndexMode::Quick,
        IndexMode::Content,
        IndexMode::Deep,
        IndexMode::Full,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexMode::None => "none",
            IndexMode::Shallow => "shallow",
            IndexMode::Quick => "quick",
            IndexMode::Content => "content",
            IndexMode::Deep => "deep",
            IndexMode::Full => "full",
        }
    }

    /// Whether results for this mode come from the persisted index.
    pub fn is_persisted(&self) -> bool {
        !matches!(self, IndexMode::None)
    }
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IndexMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| format!("unknown index mode '{}'", s))
    }
}

/// Outcome of classifying one resource event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// The change moves dependent queries onto a different data source.
    Significant,
    /// Nothing cached depends on this change.
    Noise,
}

impl Classification {
    pub fn is_significant(&self) -> bool {
        matches!(self, Classification::Significant)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Significant => f.write_str("significant"),
            Classification::Noise => f.write_str("noise"),
        }
    }
}
