//! Streamed single-file copy into a managed destination directory.
//!
//! State machine: Pending -> Scanning -> Clearing -> Copying -> Finalizing ->
//! Succeeded, with Failed reachable from any non-terminal state. The engine
//! owns Clearing onward; the runner emits the first two states around
//! candidate selection.
//!
//! The new artifact is streamed into a hidden `.<name>.part` file and renamed
//! over its final name only once every declared byte has arrived. Stale
//! entries are pruned after the rename, so an interrupted run leaves the
//! previous good backup untouched (plus at worst one stray temp file, which
//! the next run's Clearing phase removes).

use crate::fs::selector::BackupCandidate;
use crate::transfer::progress::{JobState, ProgressSender, ProgressSnapshot};
use crate::utils::errors::{MirrorError, Result};
use std::path::Path;
use std::sync::atomic::Ordering;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const PART_SUFFIX: &str = ".part";

/// Copies one selected artifact into the destination directory.
pub struct CopyEngine {
    chunk_size: usize,
    fallback_name: String,
}

impl CopyEngine {
    pub fn new(chunk_size: usize, fallback_name: String) -> Self {
        Self {
            chunk_size,
            fallback_name,
        }
    }

    /// Run one copy job to completion. Returns the bytes copied on success.
    ///
    /// Progress is published after every chunk; the final emission is either
    /// `Succeeded` with `bytes_copied == bytes_total` or `Failed`.
    pub async fn run(
        &self,
        job_id: Uuid,
        candidate: &BackupCandidate,
        dest_dir: &Path,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let total = candidate.size_bytes;
        // high-water mark keeps emissions non-decreasing even on the final
        // Failed snapshot
        let high_water = std::sync::atomic::AtomicU64::new(0);
        let emit = |state: JobState, copied: u64| {
            let copied = copied.max(high_water.fetch_max(copied, Ordering::Relaxed));
            let _ = progress.send(ProgressSnapshot::new(job_id, state, copied, total));
        };

        let result = self
            .run_inner(job_id, candidate, dest_dir, &emit, cancel)
            .await;

        match &result {
            Ok(copied) => emit(JobState::Succeeded, *copied),
            Err(_) => emit(JobState::Failed, high_water.load(Ordering::Relaxed)),
        }
        result
    }

    async fn run_inner<F: Fn(JobState, u64)>(
        &self,
        job_id: Uuid,
        candidate: &BackupCandidate,
        dest_dir: &Path,
        emit: &F,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        // Clearing runs only now, with a confirmed candidate in hand. Losing
        // the last good backup because the source went empty is not an option.
        emit(JobState::Clearing, 0);
        self.validate_destination(dest_dir).await?;
        self.remove_stale_parts(dest_dir).await?;

        let final_name = self.destination_name(&candidate.name);
        let final_path = dest_dir.join(&final_name);
        let part_path = dest_dir.join(format!(".{}{}", final_name, PART_SUFFIX));

        emit(JobState::Copying, 0);
        let copied = match self
            .stream_copy(candidate, &part_path, emit, cancel)
            .await
        {
            Ok(copied) => copied,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                tracing::warn!(job_id = %job_id, error = %e, "Copy failed, temp file rolled back");
                return Err(e);
            }
        };

        emit(JobState::Finalizing, copied);
        if let Err(e) = self.commit(dest_dir, &part_path, &final_path).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(e);
        }
        self.prune_stale_entries(dest_dir, &final_name).await?;

        tracing::info!(job_id = %job_id, file = %final_name, bytes = copied, "Artifact mirrored");
        Ok(copied)
    }

    async fn validate_destination(&self, dest_dir: &Path) -> Result<()> {
        match tokio::fs::metadata(dest_dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(MirrorError::InvalidDestination(dest_dir.to_path_buf())),
        }
    }

    /// Drop temp files left behind by a previously interrupted run.
    async fn remove_stale_parts(&self, dest_dir: &Path) -> Result<()> {
        let mut entries = tokio::fs::read_dir(dest_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') && name.ends_with(PART_SUFFIX) {
                tracing::debug!(file = %name, "Removing leftover temp file");
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    /// The candidate's own name, unless it cannot serve as a plain file name.
    fn destination_name(&self, candidate_name: &str) -> String {
        let usable = !candidate_name.is_empty()
            && candidate_name != "."
            && candidate_name != ".."
            && !candidate_name.contains(['/', '\\']);
        if usable {
            candidate_name.to_string()
        } else {
            self.fallback_name.clone()
        }
    }

    async fn stream_copy<F: Fn(JobState, u64)>(
        &self,
        candidate: &BackupCandidate,
        part_path: &Path,
        emit: &F,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut src = tokio::fs::File::open(&candidate.path).await.map_err(|e| {
            MirrorError::SourceOpenFailed {
                name: candidate.name.clone(),
                source: e,
            }
        })?;

        let mut dst = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(part_path)
            .await
            .map_err(|e| MirrorError::DestinationCreateFailed {
                name: part_path.to_string_lossy().into_owned(),
                source: e,
            })?;

        // Fixed-size chunks, constant memory regardless of artifact size.
        let mut buf = vec![0u8; self.chunk_size];
        let mut copied = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(MirrorError::Cancelled);
            }
            let n = src.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n]).await?;
            copied += n as u64;
            emit(JobState::Copying, copied);
        }

        dst.flush().await?;
        dst.sync_all().await?;

        // The artifact must arrive whole. A size change mid-copy means the
        // source was still being written; the job fails rather than present
        // a file of unexpected length as the backup.
        let total = candidate.size_bytes;
        if copied != total {
            return Err(MirrorError::Io(std::io::Error::other(format!(
                "expected {} bytes from \"{}\", copied {}",
                total, candidate.name, copied
            ))));
        }

        Ok(copied)
    }

    /// Atomically move the finished temp file over its final name.
    async fn commit(&self, dest_dir: &Path, part_path: &Path, final_path: &Path) -> Result<()> {
        tokio::fs::rename(part_path, final_path).await?;
        sync_dir(dest_dir)?;
        Ok(())
    }

    /// Remove every destination entry except the freshly committed artifact.
    async fn prune_stale_entries(&self, dest_dir: &Path, keep_name: &str) -> Result<()> {
        let mut entries = tokio::fs::read_dir(dest_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy() == keep_name {
                continue;
            }
            let path = entry.path();
            let removed = match entry.file_type().await {
                Ok(ft) if ft.is_dir() => tokio::fs::remove_dir_all(&path).await,
                _ => tokio::fs::remove_file(&path).await,
            };
            removed?;
            tracing::debug!(file = %path.display(), "Pruned stale destination entry");
        }
        Ok(())
    }
}

/// Persist the rename itself; without this a crash right after commit can
/// still lose the directory entry.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    let handle = std::fs::File::open(dir)
        .map_err(|e| MirrorError::DestinationOpenFailed { source: e })?;
    handle.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
