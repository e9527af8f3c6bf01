//! In-process bookkeeping backend.
//!
//! Mirrors the PostgreSQL semantics closely enough to drive full refresh
//! cycles in tests:
//! - one exclusive, non-blocking lock; a second taker gets `Contention`
//! - history writes are staged per session and published on commit only
//! - the lock is released on commit, rollback, or when a session is dropped
//! - stores are created and dropped immediately, outside any session
//!
//! Store drops can be made to fail per name to exercise GC error handling.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use refresh_naming::{StoreNameCodec, StoreRecord};

use super::{BookkeepingBackend, BookkeepingSession, ImportsSnapshot, StoreAdmin};
use crate::error::{RefreshError, Result};

#[derive(Debug, Default)]
struct MemoryState {
    schema_ready: bool,
    /// Committed history, in insertion order
    history: Vec<StoreRecord>,
    stores: BTreeSet<String>,
    /// Id of the session holding the lock
    lock_holder: Option<u64>,
    next_session: u64,
    failing_drops: BTreeSet<String>,
    commits: usize,
    rollbacks: usize,
}

fn newest_first(mut history: Vec<StoreRecord>) -> Vec<StoreRecord> {
    history.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.name.cmp(&a.name))
    });
    history
}

/// Shared in-memory backend. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not wedge the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an existing store to the catalog.
    pub fn add_store(&self, name: &str) {
        self.lock_state().stores.insert(name.to_string());
    }

    /// Add a committed history entry (does not create the store).
    pub fn add_history(&self, record: StoreRecord) {
        let mut state = self.lock_state();
        state.schema_ready = true;
        state.history.retain(|r| r.name != record.name);
        state.history.push(record);
    }

    /// Make every `drop_store(name)` fail.
    pub fn fail_drop_of(&self, name: &str) {
        self.lock_state().failing_drops.insert(name.to_string());
    }

    /// All stores, ascending.
    pub fn stores(&self) -> Vec<String> {
        self.lock_state().stores.iter().cloned().collect()
    }

    /// Committed history, most recent first.
    pub fn history(&self) -> Vec<StoreRecord> {
        newest_first(self.lock_state().history.clone())
    }

    pub fn is_locked(&self) -> bool {
        self.lock_state().lock_holder.is_some()
    }

    pub fn commits(&self) -> usize {
        self.lock_state().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock_state().rollbacks
    }
}

#[async_trait]
impl BookkeepingBackend for MemoryBackend {
    async fn ensure_schema(&self) -> Result<()> {
        self.lock_state().schema_ready = true;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn BookkeepingSession>> {
        let mut state = self.lock_state();
        let id = state.next_session;
        state.next_session += 1;
        Ok(Box::new(MemorySession {
            backend: self.clone(),
            id,
            staged: None,
        }))
    }

    async fn list_imports(&self, codec: &StoreNameCodec) -> Result<ImportsSnapshot> {
        let state = self.lock_state();
        let history = if state.schema_ready {
            newest_first(
                state
                    .history
                    .iter()
                    .filter(|r| codec.is_ours(&r.name))
                    .cloned()
                    .collect(),
            )
        } else {
            Vec::new()
        };
        let catalog = state
            .stores
            .iter()
            .filter(|name| name.starts_with(codec.prefix()))
            .cloned()
            .collect();
        Ok(ImportsSnapshot { history, catalog })
    }
}

struct MemorySession {
    backend: MemoryBackend,
    id: u64,
    /// Copy-on-write view of the history for this transaction
    staged: Option<Vec<StoreRecord>>,
}

impl MemorySession {
    fn check_writable(&self, state: &MemoryState) -> Result<()> {
        if !state.schema_ready {
            return Err(RefreshError::backend(
                "memory bookkeeping",
                std::io::Error::new(std::io::ErrorKind::NotFound, "history table does not exist"),
            ));
        }
        match state.lock_holder {
            Some(holder) if holder != self.id => Err(RefreshError::Contention),
            _ => Ok(()),
        }
    }

    fn view(&self, state: &MemoryState) -> Vec<StoreRecord> {
        self.staged.clone().unwrap_or_else(|| state.history.clone())
    }

    fn release(&self, state: &mut MemoryState) {
        if state.lock_holder == Some(self.id) {
            state.lock_holder = None;
        }
    }
}

#[async_trait]
impl BookkeepingSession for MemorySession {
    async fn acquire_exclusive_lock(&mut self) -> Result<()> {
        let mut state = self.backend.lock_state();
        self.check_writable(&state)?;
        state.lock_holder = Some(self.id);
        Ok(())
    }

    async fn read_latest(&mut self, codec: &StoreNameCodec) -> Result<Vec<StoreRecord>> {
        let state = self.backend.lock_state();
        let view = self.view(&state);
        Ok(newest_first(
            view.into_iter()
                .filter(|r| codec.is_ours(&r.name))
                .collect(),
        ))
    }

    async fn read_catalog(&mut self, codec: &StoreNameCodec) -> Result<Vec<String>> {
        let state = self.backend.lock_state();
        Ok(state
            .stores
            .iter()
            .filter(|name| name.starts_with(codec.prefix()))
            .cloned()
            .collect())
    }

    async fn record_success(&mut self, record: &StoreRecord) -> Result<()> {
        let state = self.backend.lock_state();
        self.check_writable(&state)?;
        let mut view = self.view(&state);
        view.retain(|r| r.name != record.name);
        view.push(record.clone());
        drop(state);
        self.staged = Some(view);
        Ok(())
    }

    async fn forget(&mut self, name: &str) -> Result<()> {
        let state = self.backend.lock_state();
        self.check_writable(&state)?;
        let mut view = self.view(&state);
        view.retain(|r| r.name != name);
        drop(state);
        self.staged = Some(view);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.backend.lock_state();
        if let Some(history) = &self.staged {
            state.history = history.clone();
        }
        state.commits += 1;
        self.release(&mut state);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut state = self.backend.lock_state();
        state.rollbacks += 1;
        self.release(&mut state);
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let backend = self.backend.clone();
        let mut state = backend.lock_state();
        self.release(&mut state);
    }
}

#[async_trait]
impl StoreAdmin for MemoryBackend {
    async fn create_store(&self, name: &str) -> Result<()> {
        let mut state = self.lock_state();
        if !state.stores.insert(name.to_string()) {
            return Err(RefreshError::backend(
                format!("create store {name}"),
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "store already exists"),
            ));
        }
        Ok(())
    }

    async fn drop_store(&self, name: &str) -> Result<()> {
        let mut state = self.lock_state();
        if state.failing_drops.contains(name) {
            return Err(RefreshError::backend(
                format!("drop store {name}"),
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "store is being accessed by other users",
                ),
            ));
        }
        if !state.stores.remove(name) {
            return Err(RefreshError::backend(
                format!("drop store {name}"),
                std::io::Error::new(std::io::ErrorKind::NotFound, "store does not exist"),
            ));
        }
        Ok(())
    }
}
