//! Parsed store identity.

use serde::{Deserialize, Serialize};

/// A store created by a refresh cycle.
///
/// Only [`crate::codec`] constructs these, so `name` always agrees with
/// `created_at` and `feed_digest`. Two records denote the same store iff
/// their names are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreRecord {
    pub name: String,
    /// UNIX timestamp (seconds) at which the store was created
    pub created_at: i64,
    pub feed_digest: String,
}

impl StoreRecord {
    pub(crate) fn new(name: String, created_at: i64, feed_digest: String) -> Self {
        Self {
            name,
            created_at,
            feed_digest,
        }
    }
}
