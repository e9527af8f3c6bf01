//! One refresh cycle, end to end.
//!
//! Download the feed, take the bookkeeping lock, collect stale stores,
//! skip if the feed is unchanged, otherwise create a new store, run the
//! transform into it and promote it. History writes happen inside one
//! bookkeeping transaction that commits only after the transform exits 0
//! and is rolled back on any error once the lock is held.
//!
//! Store creation and deletion run outside that transaction. A store
//! created by a cycle that fails later stays behind: it is in the catalog
//! but not in the history, so the next cycle's retention pass drops it.

mod clock;
mod outcome;
mod state;

pub use clock::{Clock, FixedClock, SystemClock};
pub use outcome::{ImportOutcome, SkipReason, OUTCOME_SCHEMA_ID};
pub use state::CycleState;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use refresh_naming::{digest_file, StoreNameCodec, StoreRecord};
use tracing::Instrument;
use ulid::Ulid;

use crate::bookkeeping::{BookkeepingBackend, BookkeepingSession, StoreAdmin};
use crate::config::RefreshConfig;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{RefreshError, Result};
use crate::process::{CommandSpec, OutputMode, ProcessRunner};
use crate::retention::{deletion_candidates, verify_retention, KeepRecent, RetentionPolicy};
use state::StateTracker;

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Digest the artifact off the async runtime.
async fn digest_artifact(path: PathBuf) -> Result<String> {
    let target = path.clone();
    let digest = tokio::task::spawn_blocking(move || digest_file(&target))
        .await
        .map_err(|e| RefreshError::Digest {
            path: path.clone(),
            source: io::Error::new(io::ErrorKind::Other, e),
        })?;
    digest.map_err(|source| RefreshError::Digest { path, source })
}

/// Runs refresh cycles against one bookkeeping backend.
pub struct RefreshOrchestrator {
    config: RefreshConfig,
    codec: StoreNameCodec,
    backend: Arc<dyn BookkeepingBackend>,
    admin: Arc<dyn StoreAdmin>,
    runner: ProcessRunner,
    policy: Box<dyn RetentionPolicy>,
    clock: Box<dyn Clock>,
}

impl RefreshOrchestrator {
    /// Orchestrator with the configured [`KeepRecent`] policy and the
    /// system clock.
    pub fn new(
        config: RefreshConfig,
        backend: Arc<dyn BookkeepingBackend>,
        admin: Arc<dyn StoreAdmin>,
        runner: ProcessRunner,
    ) -> Self {
        let codec = StoreNameCodec::new(config.store_prefix.clone());
        let policy = KeepRecent::from(&config.retention);
        Self {
            config,
            codec,
            backend,
            admin,
            runner,
            policy: Box::new(policy),
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_policy(mut self, policy: impl RetentionPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn codec(&self) -> &StoreNameCodec {
        &self.codec
    }

    /// Invocation of the download collaborator.
    pub fn download_command(&self) -> CommandSpec {
        let cfg = &self.config;
        CommandSpec::new(&cfg.download.script)
            .env("FEED_TMP_DIR", cfg.tmp_dir.to_string_lossy())
            .env("FEED_DOWNLOAD_URL", &cfg.download.url)
            .env("FEED_DOWNLOAD_USER_AGENT", &cfg.download.user_agent)
            .env("FEED_VERBOSE", flag(cfg.verbose))
            .stdout(OutputMode::from_flag(cfg.download.show_output))
    }

    /// Invocation of the transform collaborator populating `store`.
    pub fn transform_command(&self, store: &str) -> CommandSpec {
        let cfg = &self.config;
        let db = &cfg.database;
        let transform = &cfg.transform;

        let mut spec = CommandSpec::new(&transform.script)
            .stdout(OutputMode::from_flag(transform.show_output));
        if let Some(host) = &db.host {
            spec = spec.env("PGHOST", host);
        }
        if let Some(port) = db.port {
            spec = spec.env("PGPORT", port.to_string());
        }
        if let Some(user) = &db.user {
            spec = spec.env("PGUSER", user);
        }
        if let Some(password) = &db.password {
            spec = spec.env("PGPASSWORD", password);
        }
        spec = spec
            .env("PGDATABASE", store)
            .env("FEED_TMP_DIR", cfg.tmp_dir.to_string_lossy())
            .env("FEED_VERBOSE", flag(cfg.verbose));
        if let Some(schema) = &cfg.schema {
            spec = spec.env("FEED_IMPORTER_SCHEMA", schema);
        }
        if let Some(tidy) = transform.tidy_before_import {
            spec = spec.env("FEED_TIDY_BEFORE_IMPORT", flag(tidy));
        }
        if let Some(dir) = &transform.extensions_dir {
            spec = spec.env("FEED_SQL_D_PATH", dir.to_string_lossy());
        }
        if let Some(dir) = &transform.preprocess_dir {
            spec = spec.env("FEED_PREPROCESS_D_PATH", dir.to_string_lossy());
        }
        if let Some(dir) = &transform.postprocess_dir {
            spec = spec.env("FEED_POSTPROCESS_D_PATH", dir.to_string_lossy());
        }
        for (key, value) in &transform.extra_env {
            spec = spec.env(key, value);
        }
        spec
    }

    /// Run one cycle.
    ///
    /// Lock contention and an unchanged feed are reported as skipped
    /// outcomes. Everything else that goes wrong is an error, after the
    /// bookkeeping transaction has been rolled back.
    pub async fn run_cycle(&self) -> Result<ImportOutcome> {
        let cycle_id = Ulid::new();
        let span = tracing::info_span!(
            "refresh",
            cycle_id = %cycle_id,
            prefix = %self.codec.prefix()
        );
        self.cycle(cycle_id).instrument(span).await
    }

    async fn cycle(&self, cycle_id: Ulid) -> Result<ImportOutcome> {
        let mut state = StateTracker::new();
        let mut outcome = ImportOutcome::new(cycle_id.to_string());

        match self.drive(&mut state, &mut outcome).await {
            Ok(()) => {
                outcome.state = state.current();
                tracing::info!(state = %outcome.state, "{}", outcome.human_summary());
                Ok(outcome)
            }
            Err(e) => {
                state.fail();
                tracing::error!(error = %e, "refresh cycle failed");
                Err(e)
            }
        }
    }

    async fn drive(&self, state: &mut StateTracker, outcome: &mut ImportOutcome) -> Result<()> {
        let cfg = &self.config;

        state.enter(CycleState::Downloading);
        tokio::fs::create_dir_all(&cfg.tmp_dir).await?;
        tracing::info!(
            url = %cfg.download.url,
            artifact = %cfg.artifact_path().display(),
            "downloading feed"
        );
        let started = Instant::now();
        self.runner.run(&self.download_command()).await?;
        outcome.download_duration_ms = Some(millis(started.elapsed()));

        self.backend.ensure_schema().await?;
        let mut session = self.backend.begin().await?;

        tracing::info!("obtaining exclusive bookkeeping lock");
        match session.acquire_exclusive_lock().await {
            Ok(()) => {}
            Err(e) if e.is_contention() => {
                tracing::info!("another import is already running, skipping");
                abort(session).await;
                state.enter(CycleState::Skipped);
                outcome.mark_skipped(SkipReason::Contention);
                return Ok(());
            }
            Err(e) => {
                abort(session).await;
                return Err(e);
            }
        }
        state.enter(CycleState::LockAcquired);

        if let Err(e) = self.locked(session.as_mut(), state, outcome).await {
            tracing::warn!("an error occurred, rolling back bookkeeping transaction");
            abort(session).await;
            return Err(e);
        }

        tracing::debug!("committing bookkeeping transaction");
        session.commit().await?;
        if state.current() == CycleState::Promoting {
            state.enter(CycleState::Committed);
        }
        Ok(())
    }

    /// Everything that happens while the lock is held.
    async fn locked(
        &self,
        session: &mut dyn BookkeepingSession,
        state: &mut StateTracker,
        outcome: &mut ImportOutcome,
    ) -> Result<()> {
        let cfg = &self.config;
        state.enter(CycleState::Deciding);

        let history = session.read_latest(&self.codec).await?;
        let catalog = self.decode_catalog(session.read_catalog(&self.codec).await?);
        tracing::debug!(
            history = ?history.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            catalog = ?catalog.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            "bookkeeping state"
        );

        let mut live = Vec::with_capacity(history.len());
        for record in history {
            if catalog.iter().any(|c| c.name == record.name) {
                live.push(record);
            } else {
                tracing::warn!(
                    store = %record.name,
                    "history points to a store that does not exist, forgetting it"
                );
                session.forget(&record.name).await?;
            }
        }
        if let Some(current) = live.first() {
            tracing::info!(
                store = %current.name,
                "keeping current store until the new import has succeeded"
            );
        }

        let keep = verify_retention(self.policy.as_ref(), &live, &catalog)?;
        for name in deletion_candidates(&catalog, &keep) {
            tracing::info!(store = %name, "dropping older or unfinished store");
            match self.admin.drop_store(&name).await {
                Ok(()) => {
                    if live.iter().any(|r| r.name == name) {
                        session.forget(&name).await?;
                    }
                    outcome.deleted.push(name);
                }
                Err(e) if cfg.continue_on_deletion_failure => {
                    tracing::warn!(store = %name, error = %e, "failed to drop store, continuing");
                    outcome.deletion_failures.push(name);
                }
                Err(e) => {
                    return Err(RefreshError::StoreDeletion {
                        store: name,
                        source: Box::new(e),
                    })
                }
            }
        }
        live.retain(|r| !outcome.deleted.contains(&r.name));
        outcome.retained = keep.into_iter().collect();

        let digest = digest_artifact(cfg.artifact_path()).await?;
        tracing::debug!(digest = %digest, "feed digest");
        outcome.feed_digest = Some(digest.clone());

        if live.first().is_some_and(|current| current.feed_digest == digest) {
            tracing::info!("feed digest has not changed, skipping import");
            state.enter(CycleState::Skipped);
            outcome.mark_skipped(SkipReason::Unchanged);
            return Ok(());
        }

        let record = self.codec.record(self.clock.now(), &digest);
        let descriptor = match &cfg.descriptor.path {
            Some(path) => Some((
                path.clone(),
                ConnectionDescriptor::from_config(&cfg.descriptor, &record.name)?,
            )),
            None => None,
        };

        state.enter(CycleState::Transforming);
        self.transform(&record, outcome).await?;

        state.enter(CycleState::Promoting);
        tracing::info!(store = %record.name, "marking import as the latest");
        session.record_success(&record).await?;
        if let Some((path, descriptor)) = descriptor {
            descriptor.write(&path).await?;
        }

        outcome.retained.push(record.name.clone());
        outcome.retained.sort();
        outcome.store = Some(record);
        Ok(())
    }

    async fn transform(&self, record: &StoreRecord, outcome: &mut ImportOutcome) -> Result<()> {
        tracing::debug!(store = %record.name, "creating store");
        self.admin.create_store(&record.name).await?;

        let spec = self.transform_command(&record.name);
        tracing::info!(store = %record.name, "importing feed into store");
        tracing::debug!(env = ?spec.env.keys().collect::<Vec<_>>(), "transform environment");

        let started = Instant::now();
        self.runner.run(&spec).await?;
        outcome.transform_duration_ms = Some(millis(started.elapsed()));
        Ok(())
    }

    fn decode_catalog(&self, names: Vec<String>) -> Vec<StoreRecord> {
        names
            .into_iter()
            .filter_map(|name| {
                let record = self.codec.decode(&name);
                if record.is_none() {
                    tracing::debug!(store = %name, "leaving store with a foreign name alone");
                }
                record
            })
            .collect()
    }
}

/// Roll back, logging instead of propagating a rollback failure so the
/// original error wins.
async fn abort(session: Box<dyn BookkeepingSession>) {
    if let Err(e) = session.rollback().await {
        tracing::warn!(error = %e, "rollback failed");
    }
}
