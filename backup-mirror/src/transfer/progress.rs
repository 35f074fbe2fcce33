//! Byte-level progress reporting for mirror jobs.
//!
//! The engine publishes [`ProgressSnapshot`] values over a `tokio::sync::watch`
//! channel: observers always see the latest state, and a consumer that polls
//! slower than the engine emits simply skips stale snapshots. Values are
//! monotonic in `bytes_copied` for a given job.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

/// Phase of a mirror job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Scanning,
    Clearing,
    Copying,
    Finalizing,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Latest-value projection of the active mirror job.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: Uuid,
    pub state: JobState,
    pub bytes_copied: u64,
    pub bytes_total: u64,
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn new(job_id: Uuid, state: JobState, bytes_copied: u64, bytes_total: u64) -> Self {
        Self {
            job_id,
            state,
            // never report more than the declared total
            bytes_copied: bytes_copied.min(bytes_total),
            bytes_total,
            timestamp: Utc::now(),
        }
    }

    /// Snapshot representing no job at all, used to initialise the channel.
    pub fn idle() -> Self {
        Self::new(Uuid::nil(), JobState::Pending, 0, 0)
    }

    pub fn percent_complete(&self) -> f64 {
        if self.bytes_total > 0 {
            (self.bytes_copied as f64 / self.bytes_total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Sending half of the progress channel, owned by the runner.
pub type ProgressSender = tokio::sync::watch::Sender<ProgressSnapshot>;

/// Receiving half, handed to observers.
pub type ProgressReceiver = tokio::sync::watch::Receiver<ProgressSnapshot>;

/// Progress observer helper with time-based speed calculation.
pub struct ProgressTracker {
    start_time: Instant,
    last_update_time: Instant,
    last_bytes: u64,
    bytes_per_second: u64,
    eta_seconds: u64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_update_time: now,
            last_bytes: 0,
            bytes_per_second: 0,
            eta_seconds: 0,
        }
    }

    /// Fold a new snapshot into the speed/ETA estimate.
    pub fn update(&mut self, snapshot: &ProgressSnapshot) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update_time).as_secs_f64();

        if elapsed > 0.0 {
            let bytes_diff = snapshot.bytes_copied.saturating_sub(self.last_bytes);
            self.bytes_per_second = (bytes_diff as f64 / elapsed) as u64;
        }

        if self.bytes_per_second > 0 {
            let remaining = snapshot.bytes_total.saturating_sub(snapshot.bytes_copied);
            self.eta_seconds = remaining / self.bytes_per_second;
        }

        self.last_update_time = now;
        self.last_bytes = snapshot.bytes_copied;
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second
    }

    pub fn eta_seconds(&self) -> u64 {
        self.eta_seconds
    }

    /// Average speed since the tracker was created.
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.last_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_snapshot_percent() {
        let snap = ProgressSnapshot::new(Uuid::new_v4(), JobState::Copying, 500, 1000);
        assert!((snap.percent_complete() - 50.0).abs() < 0.01);

        let empty = ProgressSnapshot::idle();
        assert_eq!(empty.percent_complete(), 0.0);
    }

    #[test]
    fn test_snapshot_never_exceeds_total() {
        let snap = ProgressSnapshot::new(Uuid::new_v4(), JobState::Copying, 2000, 1000);
        assert_eq!(snap.bytes_copied, 1000);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Copying.is_terminal());
    }

    #[test]
    fn test_tracker_speed() {
        let job_id = Uuid::new_v4();
        let mut tracker = ProgressTracker::new();

        tracker.update(&ProgressSnapshot::new(job_id, JobState::Copying, 100, 1000));
        thread::sleep(Duration::from_millis(100));
        tracker.update(&ProgressSnapshot::new(job_id, JobState::Copying, 500, 1000));

        assert!(tracker.bytes_per_second() > 0);
        assert!(tracker.average_speed() > 0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1024), "1.00 KB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
    }
}
