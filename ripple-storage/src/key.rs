//! Scope-isolated resource keys.
//!
//! A [`ScopedResourceKey`] can only be built from a scope and an identity, so
//! every projection lookup names the scope it belongs to.

use ripple_core::{ResourceIdentity, ScopeId};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopedResourceKey {
    inner: ScopedKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct ScopedKeyInner {
    scope: ScopeId,
    identity: ResourceIdentity,
}

impl ScopedResourceKey {
    pub fn new(scope: ScopeId, identity: ResourceIdentity) -> Self {
        Self {
            inner: ScopedKeyInner { scope, identity },
        }
    }

    pub fn scope(&self) -> ScopeId {
        self.inner.scope
    }

    pub fn identity(&self) -> &ResourceIdentity {
        &self.inner.identity
    }

    /// Whether this key belongs to `scope`.
    pub fn belongs_to(&self, scope: ScopeId) -> bool {
        self.inner.scope == scope
    }
}

impl fmt::Display for ScopedResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.inner.scope, self.inner.identity)
    }
}
