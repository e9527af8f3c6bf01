//! Error types for refresh cycles.

use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;

use crate::config::ConfigError;
use crate::process::ProcessError;

/// Top-level error for a refresh cycle.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Another cycle holds the bookkeeping lock. Benign: the orchestrator
    /// reports it as a skipped cycle, never as a failure.
    #[error("another import is already running")]
    Contention,

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("failed to digest {}: {source}", path.display())]
    Digest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("retention policy violation: {0}")]
    PolicyViolation(String),

    #[error("failed to drop store {store:?}")]
    StoreDeletion {
        store: String,
        #[source]
        source: Box<RefreshError>,
    },

    #[error("connection descriptor: {0}")]
    Descriptor(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RefreshError {
    pub fn backend(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Returns true for the "lock already held" condition.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Contention)
    }
}

pub type Result<T> = std::result::Result<T, RefreshError>;
