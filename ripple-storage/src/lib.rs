//! Ripple Storage - Normalized Resource Store
//!
//! The latest known projection of every observed resource, plus the
//! materialized query results the rendering layer reads, each with an
//! explicit staleness flag and a broadcast channel reporting flips.

mod key;
mod read;
mod store;

pub use key::ScopedResourceKey;
pub use read::QueryRead;
pub use store::{ResourceStore, StalenessChanged, StoreStats};
