//! Change detection for files that may still be written.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLockState {
    /// Unchanged for at least one full check interval
    Stable,
    /// New, or its size/mtime moved since the last observation
    Changing,
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    size: u64,
    modified: SystemTime,
    unchanged_since: Instant,
}

/// Tracks `(size, mtime)` per path across polls
#[derive(Debug)]
pub struct ChangedReadLock {
    check_interval: Duration,
    observations: Mutex<HashMap<PathBuf, Observation>>,
}

impl ChangedReadLock {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            check_interval,
            observations: Mutex::new(HashMap::new()),
        }
    }

    pub fn observe(&self, path: &Path, size: u64, modified: SystemTime) -> ReadLockState {
        self.observe_at(path, size, modified, Instant::now())
    }

    pub fn observe_at(
        &self,
        path: &Path,
        size: u64,
        modified: SystemTime,
        now: Instant,
    ) -> ReadLockState {
        let mut observations = self.observations.lock();
        match observations.get_mut(path) {
            Some(seen) if seen.size == size && seen.modified == modified => {
                if now.saturating_duration_since(seen.unchanged_since) >= self.check_interval {
                    ReadLockState::Stable
                } else {
                    ReadLockState::Changing
                }
            }
            _ => {
                observations.insert(
                    path.to_path_buf(),
                    Observation {
                        size,
                        modified,
                        unchanged_since: now,
                    },
                );
                ReadLockState::Changing
            }
        }
    }

    /// Drop state for a path once it has been handed off
    pub fn forget(&self, path: &Path) {
        self.observations.lock().remove(path);
    }

    /// Drop state for paths no longer present in the watched directory
    pub fn prune(&self, present: &HashSet<PathBuf>) {
        self.observations
            .lock()
            .retain(|path, _| present.contains(path));
    }

    pub fn tracked(&self) -> usize {
        self.observations.lock().len()
    }
}
