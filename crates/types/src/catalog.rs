//! Catalog snapshot handed through catalog and settings updates.

use serde::{Deserialize, Serialize};

/// Opaque snapshot of the cluster catalog at a point in time.
///
/// The initiator core never interprets the catalog; it only forwards
/// snapshots to the execution pools so idle sites can adopt the new
/// version before their next transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogContext {
    /// Monotonically increasing catalog version.
    pub version: u64,
}

impl CatalogContext {
    /// Create a context for the given catalog version.
    pub fn new(version: u64) -> Self {
        Self { version }
    }
}
