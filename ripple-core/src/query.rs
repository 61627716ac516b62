//! Query keys and the prefix predicates used to address them

use crate::ScopeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered tuple identifying one cached query result.
///
/// `("files.directory_listing", location_id)` is a typical key. Keys opened
/// inside a scope carry it, so invalidation in one scope can never reach
/// another scope's entries. Unscoped keys belong to whichever scope is
/// active and are reached from every scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
    pub scope: Option<ScopeId>,
    pub family: String,
    pub args: Vec<String>,
}

impl QueryKey {
    /// A key that does not belong to any scope.
    pub fn global(family: impl Into<String>) -> Self {
        Self {
            scope: None,
            family: family.into(),
            args: Vec::new(),
        }
    }

    /// A key owned by `scope`.
    pub fn scoped(scope: ScopeId, family: impl Into<String>) -> Self {
        Self {
            scope: Some(scope),
            family: family.into(),
            args: Vec::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scope) = &self.scope {
            write!(f, "[{}] ", scope)?;
        }
        write!(f, "{}", self.family)?;
        for arg in &self.args {
            write!(f, "/{}", arg)?;
        }
        Ok(())
    }
}

/// Prefix predicate over [`QueryKey`]s.
///
/// Matches every key of `family` whose leading arguments equal `args_prefix`.
/// When `scope` is set, keys owned by a different scope are excluded; unscoped
/// keys still match. An empty prefix matches the whole family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryPredicate {
    pub scope: Option<ScopeId>,
    pub family: String,
    pub args_prefix: Vec<String>,
}

impl QueryPredicate {
    pub fn family(family: impl Into<String>) -> Self {
        Self {
            scope: None,
            family: family.into(),
            args_prefix: Vec::new(),
        }
    }

    pub fn in_scope(mut self, scope: ScopeId) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args_prefix.push(arg.into());
        self
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        if let (Some(scope), Some(owner)) = (self.scope, key.scope) {
            if owner != scope {
                return false;
            }
        }
        key.family == self.family && key.args.starts_with(&self.args_prefix)
    }
}

impl fmt::Display for QueryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scope) = &self.scope {
            write!(f, "[{}] ", scope)?;
        }
        write!(f, "{}", self.family)?;
        for arg in &self.args_prefix {
            write!(f, "/{}", arg)?;
        }
        f.write_str("/*")
    }
}
