//! Shared fixtures for refresh cycle integration tests
//!
//! Collaborators are small `sh` scripts written into a scratch directory:
//! - `download.sh` copies `source.bin` to `$FEED_TMP_DIR/feed.zip`
//! - `import.sh` appends `$PGDATABASE` to `transform.log`, dumps its
//!   environment to `transform.env`, optionally sleeps for the seconds in
//!   `transform.sleep` and exits with the code in `transform.exit` (0 if
//!   missing)

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feed_refresh::{
    ChildRegistry, FixedClock, MemoryBackend, ProcessRunner, RefreshConfig, RefreshOrchestrator,
};
use refresh_naming::digest_file;
use tempfile::TempDir;

/// Timestamp every orchestrator built by [`Harness::orchestrator`] uses.
pub const T0: i64 = 1_700_000_000;

/// Write an executable script.
pub fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
}

pub struct Harness {
    pub dir: TempDir,
    pub backend: Arc<MemoryBackend>,
    pub registry: Arc<ChildRegistry>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();

        write_script(
            &root.join("download.sh"),
            &format!(
                "set -e\ncp '{}' \"$FEED_TMP_DIR/feed.zip\"",
                root.join("source.bin").display()
            ),
        );
        write_script(
            &root.join("import.sh"),
            &format!(
                concat!(
                    "echo \"$PGDATABASE\" >> '{log}'\n",
                    "env | sort > '{env}'\n",
                    "if [ -f '{sleep}' ]; then sleep \"$(cat '{sleep}')\"; fi\n",
                    "if [ -f '{exit}' ]; then exit \"$(cat '{exit}')\"; fi\n",
                    "exit 0"
                ),
                log = root.join("transform.log").display(),
                env = root.join("transform.env").display(),
                sleep = root.join("transform.sleep").display(),
                exit = root.join("transform.exit").display(),
            ),
        );

        let harness = Self {
            dir,
            backend: Arc::new(MemoryBackend::new()),
            registry: ChildRegistry::new(),
        };
        harness.set_feed(b"feed version 1");
        harness
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Bytes the next download produces.
    pub fn set_feed(&self, bytes: &[u8]) {
        fs::write(self.path().join("source.bin"), bytes).expect("write feed");
    }

    pub fn feed_digest(&self) -> String {
        digest_file(&self.path().join("source.bin")).expect("digest feed")
    }

    /// Name the next import at `created_at` gets.
    pub fn store_name(&self, created_at: i64) -> String {
        format!("feed_{}_{}", created_at, self.feed_digest())
    }

    pub fn set_transform_exit(&self, code: i32) {
        fs::write(self.path().join("transform.exit"), code.to_string()).expect("write exit");
    }

    pub fn set_transform_sleep(&self, seconds: u32) {
        fs::write(self.path().join("transform.sleep"), seconds.to_string()).expect("write sleep");
    }

    /// Stores the transform ran against, in order.
    pub fn transform_runs(&self) -> Vec<String> {
        fs::read_to_string(self.path().join("transform.log"))
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Environment of the last transform run.
    pub fn transform_env(&self) -> String {
        fs::read_to_string(self.path().join("transform.env")).unwrap_or_default()
    }

    pub fn config(&self) -> RefreshConfig {
        self.config_in(self.path().join("tmp"))
    }

    pub fn config_in(&self, tmp_dir: PathBuf) -> RefreshConfig {
        let mut cfg = RefreshConfig::default();
        cfg.store_prefix = "feed_".to_string();
        cfg.tmp_dir = tmp_dir;
        cfg.download.url = "https://example.org/feed.zip".to_string();
        cfg.download.user_agent = "feed-refresh-tests".to_string();
        cfg.download.script = self.path().join("download.sh");
        cfg.transform.script = self.path().join("import.sh");
        cfg
    }

    pub fn orchestrator(&self) -> RefreshOrchestrator {
        self.orchestrator_with(self.config(), T0)
    }

    pub fn orchestrator_at(&self, now: i64) -> RefreshOrchestrator {
        self.orchestrator_with(self.config(), now)
    }

    pub fn orchestrator_with(&self, config: RefreshConfig, now: i64) -> RefreshOrchestrator {
        RefreshOrchestrator::new(
            config,
            self.backend.clone(),
            self.backend.clone(),
            ProcessRunner::new(Arc::clone(&self.registry)),
        )
        .with_clock(FixedClock(now))
    }
}
