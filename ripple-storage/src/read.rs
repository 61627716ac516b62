//! Query reads carrying staleness metadata.
//!
//! Reads never recompute. A stale entry is still returned, flagged, so the
//! consuming layer decides when to refetch and call
//! [`ResourceStore::put_query`](crate::ResourceStore::put_query).

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Result of a query read.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRead<T> {
    value: T,
    stale: bool,
    /// When the value was last materialized.
    cached_at: DateTime<Utc>,
}

impl<T> QueryRead<T> {
    pub fn new(value: T, stale: bool, cached_at: DateTime<Utc>) -> Self {
        Self {
            value,
            stale,
            cached_at,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// Whether a significant transition invalidated the value since it was stored.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// Time since the value was materialized.
    pub fn age(&self) -> Duration {
        let now = Utc::now();
        if now > self.cached_at {
            (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        }
    }

    pub fn map<U, F>(self, f: F) -> QueryRead<U>
    where
        F: FnOnce(T) -> U,
    {
        QueryRead {
            value: f(self.value),
            stale: self.stale,
            cached_at: self.cached_at,
        }
    }
}

impl<T> AsRef<T> for QueryRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_read_accessors() {
        let cached_at = Utc::now();
        let read = QueryRead::new(vec![1, 2, 3], true, cached_at);
        assert!(read.is_stale());
        assert_eq!(read.cached_at(), cached_at);
        assert_eq!(read.value(), &vec![1, 2, 3]);
        assert_eq!(read.into_value().len(), 3);
    }

    #[test]
    fn test_query_read_age() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        let read = QueryRead::new("listing", false, past);
        let age = read.age();
        assert!(age >= Duration::from_secs(4));
        assert!(age <= Duration::from_secs(10));
    }

    #[test]
    fn test_query_read_future_timestamp_has_zero_age() {
        let future = Utc::now() + chrono::Duration::seconds(60);
        let read = QueryRead::new((), false, future);
        assert_eq!(read.age(), Duration::ZERO);
    }

    #[test]
    fn test_query_read_map_keeps_staleness() {
        let read = QueryRead::new(21, true, Utc::now()).map(|n| n * 2);
        assert!(read.is_stale());
        assert_eq!(*read.as_ref(), 42);
    }
}
