//! Registry of running collaborator processes.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Pids of collaborators that are currently running.
///
/// Shared between the [`super::ProcessRunner`] and the termination handler.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: Mutex<BTreeSet<u32>>,
}

impl ChildRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Track `pid` until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, pid: u32) -> RegisteredChild {
        if let Ok(mut pids) = self.pids.lock() {
            pids.insert(pid);
        }
        RegisteredChild {
            registry: Arc::clone(self),
            pid,
        }
    }

    fn unregister(&self, pid: u32) {
        if let Ok(mut pids) = self.pids.lock() {
            pids.remove(&pid);
        }
    }

    /// Pids currently tracked.
    pub fn running(&self) -> Vec<u32> {
        self.pids
            .lock()
            .map(|pids| pids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// SIGKILL every tracked child. Returns how many signals were delivered.
    pub fn kill_all(&self) -> usize {
        self.running().into_iter().filter(|pid| kill(*pid)).count()
    }
}

#[cfg(unix)]
fn kill(pid: u32) -> bool {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    signal::kill(Pid::from_raw(raw), Signal::SIGKILL).is_ok()
}

#[cfg(not(unix))]
fn kill(_pid: u32) -> bool {
    false
}

/// Keeps a pid registered for as long as it lives.
#[derive(Debug)]
pub struct RegisteredChild {
    registry: Arc<ChildRegistry>,
    pid: u32,
}

impl RegisteredChild {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for RegisteredChild {
    fn drop(&mut self) {
        self.registry.unregister(self.pid);
    }
}
