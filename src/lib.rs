//! Feed Refresh - atomic, lock-guarded refresh of feed-derived stores
//!
//! Each refresh cycle downloads a data feed, materialises it into a freshly
//! created database (a "store") through an external transform, and
//! promotes that store to be the current one while retiring stale stores.
//! A non-blocking lock in the bookkeeping database guarantees that only one
//! cycle runs at a time, and a failed cycle never changes which store is
//! current.

pub mod bookkeeping;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod orchestrator;
pub mod process;
pub mod retention;
pub mod signal;

pub use bookkeeping::{
    BookkeepingBackend, BookkeepingSession, ImportsSnapshot, MemoryBackend, PgBackend,
    StoreAdmin,
};
pub use config::{BuiltinDefaults, ConfigError, EffectiveConfig, RefreshConfig};
pub use descriptor::ConnectionDescriptor;
pub use error::{RefreshError, Result};
pub use orchestrator::{
    Clock, CycleState, FixedClock, ImportOutcome, RefreshOrchestrator, SkipReason, SystemClock,
};
pub use process::{ChildRegistry, CommandSpec, OutputMode, ProcessError, ProcessRunner};
pub use refresh_naming::{StoreNameCodec, StoreRecord};
pub use retention::{KeepAll, KeepRecent, RetentionPolicy};
pub use signal::{TerminationHandler, EXIT_CODE_TERMINATED};

/// File name of the downloaded artifact inside the scratch directory.
pub const ARTIFACT_FILE_NAME: &str = "feed.zip";
