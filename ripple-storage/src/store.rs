//! Normalized resource store.
//!
//! Holds the latest projection of every observed resource, keyed by scope and
//! identity, next to the materialized query results the rendering layer reads.
//! Query entries carry an explicit `stale` flag: marking stale never
//! recomputes, and only [`ResourceStore::put_query`] clears it.
//!
//! Reads take a short shared lock and never wait on event processing beyond
//! the duration of a single mutation.

use crate::{QueryRead, ScopedResourceKey};
use chrono::{DateTime, Utc};
use ripple_core::{
    EngineConfig, QueryKey, QueryPredicate, ResourceIdentity, ResourceProjection, ScopeId,
    StorageError,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Notification sent when a query entry's staleness flips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StalenessChanged {
    pub key: QueryKey,
    pub stale: bool,
}

/// Point-in-time store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Projections currently held, across all scopes.
    pub resources: u64,
    /// Materialized query entries.
    pub queries: u64,
    /// Query entries currently flagged stale.
    pub stale_queries: u64,
    /// Total upserts accepted since creation.
    pub upserts: u64,
    /// Total fresh-to-stale flips since creation.
    pub stale_marks: u64,
}

impl StoreStats {
    /// Fraction of query entries that are stale (0.0 to 1.0).
    pub fn stale_ratio(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.stale_queries as f64 / self.queries as f64
        }
    }
}

#[derive(Debug, Clone)]
struct QueryEntry {
    value: JsonValue,
    stale: bool,
    cached_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoreState {
    resources: HashMap<ScopedResourceKey, ResourceProjection>,
    queries: BTreeMap<QueryKey, QueryEntry>,
    upserts: u64,
    stale_marks: u64,
    disposed: bool,
}

/// Keyed cache of resource projections and query results.
pub struct ResourceStore {
    state: RwLock<StoreState>,
    staleness_tx: broadcast::Sender<StalenessChanged>,
}

impl ResourceStore {
    /// Create a store whose staleness channel buffers `staleness_buffer` notifications.
    pub fn new(staleness_buffer: usize) -> Self {
        let (staleness_tx, _rx) = broadcast::channel(staleness_buffer.max(1));
        Self {
            state: RwLock::new(StoreState::default()),
            staleness_tx,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.staleness_buffer)
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, StoreState>, StorageError> {
        let state = self.state.read().map_err(|_| StorageError::LockPoisoned)?;
        if state.disposed {
            return Err(StorageError::StoreDisposed);
        }
        Ok(state)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StorageError> {
        let state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        if state.disposed {
            return Err(StorageError::StoreDisposed);
        }
        Ok(state)
    }

    /// Store the latest projection of `identity` within `scope`.
    ///
    /// Last write wins. Fails when the projection is tagged with a different
    /// resource type than the identity.
    pub fn upsert(
        &self,
        scope: ScopeId,
        identity: ResourceIdentity,
        projection: ResourceProjection,
    ) -> Result<(), StorageError> {
        if !projection.is_valid_for(&identity) {
            return Err(StorageError::ProjectionTypeMismatch {
                identity,
                projection_type: projection.resource_type,
            });
        }

        let mut state = self.write_state()?;
        trace!(scope = %scope, identity = %identity, "Upserting projection");
        state
            .resources
            .insert(ScopedResourceKey::new(scope, identity), projection);
        state.upserts += 1;
        Ok(())
    }

    /// Drop the projection of a deleted resource.
    pub fn remove(
        &self,
        scope: ScopeId,
        identity: &ResourceIdentity,
    ) -> Result<Option<ResourceProjection>, StorageError> {
        let mut state = self.write_state()?;
        let key = ScopedResourceKey::new(scope, identity.clone());
        Ok(state.resources.remove(&key))
    }

    pub fn projection(
        &self,
        scope: ScopeId,
        identity: &ResourceIdentity,
    ) -> Result<Option<ResourceProjection>, StorageError> {
        let state = self.read_state()?;
        let key = ScopedResourceKey::new(scope, identity.clone());
        Ok(state.resources.get(&key).cloned())
    }

    /// Number of projections held for `scope`.
    pub fn resource_count(&self, scope: ScopeId) -> Result<usize, StorageError> {
        let state = self.read_state()?;
        Ok(state
            .resources
            .keys()
            .filter(|key| key.belongs_to(scope))
            .count())
    }

    /// Materialize a query result. This is the explicit recompute: the entry
    /// is stored fresh, and a previously stale entry is reported as fresh.
    pub fn put_query(&self, key: QueryKey, value: JsonValue) -> Result<(), StorageError> {
        let was_stale = {
            let mut state = self.write_state()?;
            let entry = QueryEntry {
                value,
                stale: false,
                cached_at: Utc::now(),
            };
            state
                .queries
                .insert(key.clone(), entry)
                .is_some_and(|previous| previous.stale)
        };

        if was_stale {
            self.notify(StalenessChanged { key, stale: false });
        }
        Ok(())
    }

    /// Flag every entry matching `predicate` as stale.
    ///
    /// Idempotent: entries that are already stale are left alone and are not
    /// reported again. Returns how many entries flipped.
    pub fn mark_stale(&self, predicate: &QueryPredicate) -> Result<usize, StorageError> {
        let flipped: Vec<QueryKey> = {
            let mut state = self.write_state()?;
            let mut flipped = Vec::new();
            for (key, entry) in state.queries.iter_mut() {
                if !entry.stale && predicate.matches(key) {
                    entry.stale = true;
                    flipped.push(key.clone());
                }
            }
            state.stale_marks += flipped.len() as u64;
            flipped
        };

        debug!(predicate = %predicate, flipped = flipped.len(), "Marked queries stale");
        let count = flipped.len();
        for key in flipped {
            self.notify(StalenessChanged { key, stale: true });
        }
        Ok(count)
    }

    /// Read a query entry. Never blocks on recomputation and never recomputes.
    pub fn read(&self, key: &QueryKey) -> Result<Option<QueryRead<JsonValue>>, StorageError> {
        let state = self.read_state()?;
        Ok(state
            .queries
            .get(key)
            .map(|entry| QueryRead::new(entry.value.clone(), entry.stale, entry.cached_at)))
    }

    /// Receive a [`StalenessChanged`] for every flip from now on.
    pub fn subscribe_staleness(&self) -> broadcast::Receiver<StalenessChanged> {
        self.staleness_tx.subscribe()
    }

    fn notify(&self, change: StalenessChanged) {
        // No receivers is fine; the flag itself is the source of truth.
        let _ = self.staleness_tx.send(change);
    }

    pub fn stats(&self) -> Result<StoreStats, StorageError> {
        let state = self.read_state()?;
        Ok(StoreStats {
            resources: state.resources.len() as u64,
            queries: state.queries.len() as u64,
            stale_queries: state.queries.values().filter(|entry| entry.stale).count() as u64,
            upserts: state.upserts,
            stale_marks: state.stale_marks,
        })
    }

    /// Release all entries. Every later operation fails with
    /// [`StorageError::StoreDisposed`]. Disposing twice is a no-op.
    pub fn dispose(&self) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| StorageError::LockPoisoned)?;
        if state.disposed {
            return Ok(());
        }
        let resources = state.resources.len();
        let queries = state.queries.len();
        state.resources.clear();
        state.queries.clear();
        state.disposed = true;
        info!(resources = resources, queries = queries, "Resource store disposed");
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.state
            .read()
            .map(|state| state.disposed)
            .unwrap_or(true)
    }
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore")
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
