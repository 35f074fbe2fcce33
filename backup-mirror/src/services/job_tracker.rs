//! Single-flight tracking for mirror destinations.
//!
//! A destination directory is a shared mutable resource; whoever holds its
//! claim is the only job allowed to write there. Claims key on the
//! canonicalized path, so two spellings of the same directory still collide.

use crate::utils::errors::{MirrorError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct JobTracker {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

/// Exclusive claim on one destination, released on drop.
pub struct DestinationClaim {
    tracker: JobTracker,
    key: PathBuf,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a destination for the duration of one job.
    ///
    /// Fails with `JobAlreadyRunning` while another claim on the same
    /// destination is alive.
    pub fn try_claim(&self, dest_dir: &Path) -> Result<DestinationClaim> {
        let key = dest_dir
            .canonicalize()
            .unwrap_or_else(|_| dest_dir.to_path_buf());

        let mut active = self.lock();
        if !active.insert(key.clone()) {
            return Err(MirrorError::JobAlreadyRunning);
        }

        Ok(DestinationClaim {
            tracker: self.clone(),
            key,
        })
    }

    /// Whether any job currently holds a claim.
    pub fn is_busy(&self) -> bool {
        !self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DestinationClaim {
    fn drop(&mut self) {
        self.tracker.lock().remove(&self.key);
    }
}
