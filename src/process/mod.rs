//! External collaborator execution.
//!
//! Runs an executable to completion and maps its exit status to
//! success/failure:
//! - exit code 0 is the only success
//! - any other exit code or a terminating signal fails with the code,
//!   the signal name and the child's pid
//! - a spawn error (missing executable, permission denied) fails
//!   immediately with the underlying I/O error
//!
//! Every running child is tracked in a [`ChildRegistry`] for the whole time
//! it runs, so a termination handler can kill it before the orchestrator
//! exits. Children are also spawned with kill-on-drop, so dropping the
//! future that awaits them never leaves an orphan behind.
//!
//! There are no retries and no timeouts here.

mod registry;

pub use registry::{ChildRegistry, RegisteredChild};

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use thiserror::Error;
use tokio::process::Command;

/// Where a child's output stream goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Inherit,
    Discard,
}

impl OutputMode {
    pub fn from_flag(show: bool) -> Self {
        if show {
            Self::Inherit
        } else {
            Self::Discard
        }
    }

    fn stdio(self) -> Stdio {
        match self {
            Self::Inherit => Stdio::inherit(),
            Self::Discard => Stdio::null(),
        }
    }
}

/// A fully described invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Merged over the inherited environment; these values win.
    pub env: BTreeMap<String, String>,
    pub stdout: OutputMode,
    pub stderr: OutputMode,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            stdout: OutputMode::Inherit,
            stderr: OutputMode::Inherit,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdout(mut self, mode: OutputMode) -> Self {
        self.stdout = mode;
        self
    }
}

/// Termination of a child that did not exit with code 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub signal: Option<String>,
    pub pid: Option<u32>,
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, &self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code)?,
            (None, Some(signal)) => write!(f, "signal {}", signal)?,
            (None, None) => write!(f, "unknown status")?,
        }
        if let Some(pid) = self.pid {
            write!(f, ", pid {}", pid)?;
        }
        Ok(())
    }
}

/// Errors from running a collaborator.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} failed ({report})", program.display())]
    Exited { program: PathBuf, report: ExitReport },

    #[error("failed waiting for {}: {source}", program.display())]
    Wait {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    /// Exit code of a child that ran to completion, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited { report, .. } => report.code,
            _ => None,
        }
    }

    /// Name of the signal that terminated the child, if any.
    pub fn signal(&self) -> Option<&str> {
        match self {
            Self::Exited { report, .. } => report.signal.as_deref(),
            _ => None,
        }
    }
}

/// Runs collaborators and keeps them registered while they run.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    registry: Arc<ChildRegistry>,
}

impl ProcessRunner {
    pub fn new(registry: Arc<ChildRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ChildRegistry> {
        &self.registry
    }

    /// Run `spec` to completion.
    pub async fn run(&self, spec: &CommandSpec) -> Result<(), ProcessError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(spec.stdout.stdio())
            .stderr(spec.stderr.stdio())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let pid = child.id();
        let registered = pid.map(|pid| self.registry.register(pid));
        tracing::debug!(program = %spec.program.display(), pid, "collaborator started");

        let waited = child.wait().await;
        // Reaped: the pid may be reused from here on.
        drop(registered);
        let status = waited.map_err(|source| ProcessError::Wait {
            program: spec.program.clone(),
            source,
        })?;

        if status.success() {
            return Ok(());
        }

        Err(ProcessError::Exited {
            program: spec.program.clone(),
            report: ExitReport {
                code: status.code(),
                signal: signal_name(&status),
                pid,
            },
        })
    }
}

#[cfg(unix)]
fn signal_name(status: &ExitStatus) -> Option<String> {
    use nix::sys::signal::Signal;
    use std::os::unix::process::ExitStatusExt;

    let raw = status.signal()?;
    Some(match Signal::try_from(raw) {
        Ok(signal) => signal.as_str().to_string(),
        Err(_) => format!("SIG{}", raw),
    })
}

#[cfg(not(unix))]
fn signal_name(_status: &ExitStatus) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_report_display() {
        let report = ExitReport {
            code: Some(3),
            signal: None,
            pid: Some(4242),
        };
        assert_eq!(report.to_string(), "exit code 3, pid 4242");

        let report = ExitReport {
            code: None,
            signal: Some("SIGKILL".to_string()),
            pid: None,
        };
        assert_eq!(report.to_string(), "signal SIGKILL");
    }

    #[test]
    fn test_error_accessors() {
        let err = ProcessError::Exited {
            program: PathBuf::from("import.sh"),
            report: ExitReport {
                code: None,
                signal: Some("SIGTERM".to_string()),
                pid: Some(1),
            },
        };
        assert_eq!(err.exit_code(), None);
        assert_eq!(err.signal(), Some("SIGTERM"));
        assert_eq!(err.to_string(), "import.sh failed (signal SIGTERM, pid 1)");
    }

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("/bin/true")
            .arg("-x")
            .env("FEED_TMP_DIR", "/tmp/feed")
            .stdout(OutputMode::Discard);

        assert_eq!(spec.args, vec!["-x".to_string()]);
        assert_eq!(spec.env["FEED_TMP_DIR"], "/tmp/feed");
        assert_eq!(spec.stdout, OutputMode::Discard);
        assert_eq!(spec.stderr, OutputMode::Inherit);
    }

    #[test]
    fn test_output_mode_from_flag() {
        assert_eq!(OutputMode::from_flag(true), OutputMode::Inherit);
        assert_eq!(OutputMode::from_flag(false), OutputMode::Discard);
    }
}
