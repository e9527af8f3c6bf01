//! Durable bookkeeping of imported stores.
//!
//! One relational backend holds:
//! - the history of successful imports, most recent first
//! - the exclusive, non-blocking lock that serialises refresh cycles
//! - the catalog of stores whose names carry the configured prefix
//!
//! A [`BookkeepingSession`] is one transaction. Lock, reads, history writes
//! and forgets of a cycle all happen inside it, and it is committed only
//! after the new store has been populated. Creating and dropping stores
//! cannot take part in that transaction, so it goes through the separate
//! [`StoreAdmin`] seam; a store created by a cycle that later fails is left
//! behind and reclaimed by the next cycle's retention pass.

pub mod memory;
pub mod postgres;

pub use memory::MemoryBackend;
pub use postgres::{quote_ident, PgBackend, PgStoreAdmin, HISTORY_TABLE};

use async_trait::async_trait;
use refresh_naming::{StoreNameCodec, StoreRecord};
use serde::Serialize;

use crate::error::Result;

/// Backend holding the history table.
#[async_trait]
pub trait BookkeepingBackend: Send + Sync {
    /// Create the history table if it does not exist. Safe to race.
    async fn ensure_schema(&self) -> Result<()>;

    /// Open a session with a transaction already begun.
    async fn begin(&self) -> Result<Box<dyn BookkeepingSession>>;

    /// Read-only snapshot of history and catalog. Takes no lock.
    async fn list_imports(&self, codec: &StoreNameCodec) -> Result<ImportsSnapshot>;
}

/// One bookkeeping transaction.
#[async_trait]
pub trait BookkeepingSession: Send {
    /// Take the exclusive lock for the rest of the transaction.
    ///
    /// Fails fast with [`crate::RefreshError::Contention`] if another session
    /// holds it.
    async fn acquire_exclusive_lock(&mut self) -> Result<()>;

    /// Successful imports under the codec's prefix, most recent first.
    async fn read_latest(&mut self, codec: &StoreNameCodec) -> Result<Vec<StoreRecord>>;

    /// Names of all existing stores under the codec's prefix, ascending.
    async fn read_catalog(&mut self, codec: &StoreNameCodec) -> Result<Vec<String>>;

    /// Append `record` to the history (single statement).
    async fn record_success(&mut self, record: &StoreRecord) -> Result<()>;

    /// Remove the history entry for `name`, if any.
    async fn forget(&mut self, name: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Creates and drops stores, outside any bookkeeping transaction.
#[async_trait]
pub trait StoreAdmin: Send + Sync {
    /// Create an empty store.
    async fn create_store(&self, name: &str) -> Result<()>;

    async fn drop_store(&self, name: &str) -> Result<()>;
}

/// History and catalog as seen outside a refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportsSnapshot {
    /// Most recent first
    pub history: Vec<StoreRecord>,
    /// Ascending by name
    pub catalog: Vec<String>,
}

impl ImportsSnapshot {
    /// The most recent import whose store still exists.
    pub fn current(&self) -> Option<&StoreRecord> {
        self.history
            .iter()
            .find(|record| self.catalog.contains(&record.name))
    }
}
