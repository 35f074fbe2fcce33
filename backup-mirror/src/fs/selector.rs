//! Candidate discovery and newest-artifact selection.
//!
//! The scan is a pure read: one non-recursive directory listing, filtered to
//! regular files whose name contains the marker token. Selection picks the
//! greatest modification time; ties go to the lexicographically greatest name,
//! so repeated scans of an unchanged directory always agree.

use crate::utils::errors::{MirrorError, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A backup artifact discovered in the source directory.
///
/// Produced fresh on every scan and never persisted.
#[derive(Debug, Clone)]
pub struct BackupCandidate {
    /// File name of the artifact
    pub name: String,

    /// Full path to the artifact
    pub path: PathBuf,

    /// Last modification time
    pub modified: SystemTime,

    /// Size in bytes at scan time
    pub size_bytes: u64,
}

/// List every matching artifact in `source_dir`.
///
/// Entries that disappear or turn unreadable between the listing and the
/// metadata read are skipped rather than failing the whole scan.
pub fn scan_candidates(source_dir: &Path, marker: &str) -> Result<Vec<BackupCandidate>> {
    let meta = std::fs::metadata(source_dir)
        .map_err(|_| MirrorError::InvalidSource(source_dir.to_path_buf()))?;
    if !meta.is_dir() {
        return Err(MirrorError::InvalidSource(source_dir.to_path_buf()));
    }

    let entries = std::fs::read_dir(source_dir)
        .map_err(|_| MirrorError::InvalidSource(source_dir.to_path_buf()))?;

    let mut candidates = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.contains(marker) {
            continue;
        }

        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }

        candidates.push(BackupCandidate {
            name,
            path: entry.path(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            size_bytes: meta.len(),
        });
    }

    Ok(candidates)
}

/// Pick the newest candidate; name breaks modification-time ties.
pub fn pick_latest(candidates: Vec<BackupCandidate>) -> Option<BackupCandidate> {
    candidates
        .into_iter()
        .max_by(|a, b| (a.modified, &a.name).cmp(&(b.modified, &b.name)))
}

/// Scan `source_dir` and return the newest matching artifact.
pub fn select_latest(source_dir: &Path, marker: &str) -> Result<BackupCandidate> {
    let candidates = scan_candidates(source_dir, marker)?;
    pick_latest(candidates).ok_or_else(|| MirrorError::NoCandidates(marker.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_with_mtime(dir: &Path, name: &str, content: &[u8], mtime_secs: u64) {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs))
            .unwrap();
    }

    fn candidate(name: &str, mtime_secs: u64) -> BackupCandidate {
        BackupCandidate {
            name: name.to_string(),
            path: PathBuf::from(name),
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs),
            size_bytes: 0,
        }
    }

    #[test]
    fn test_selects_newest_by_mtime() {
        let temp_dir = TempDir::new().unwrap();
        write_with_mtime(temp_dir.path(), "a.backup", b"old", 1);
        write_with_mtime(temp_dir.path(), "b.backup", b"newest", 3);
        write_with_mtime(temp_dir.path(), "c.backup", b"middle", 2);

        let latest = select_latest(temp_dir.path(), ".backup").unwrap();
        assert_eq!(latest.name, "b.backup");
        assert_eq!(latest.size_bytes, 6);
    }

    #[test]
    fn test_ignores_non_matching_and_directories() {
        let temp_dir = TempDir::new().unwrap();
        write_with_mtime(temp_dir.path(), "signal.backup", b"x", 10);
        write_with_mtime(temp_dir.path(), "notes.txt", b"y", 99);
        fs::create_dir(temp_dir.path().join("nested.backup")).unwrap();

        let candidates = scan_candidates(temp_dir.path(), ".backup").unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "signal.backup");
    }

    #[test]
    fn test_no_candidates() {
        let temp_dir = TempDir::new().unwrap();
        write_with_mtime(temp_dir.path(), "notes.txt", b"y", 1);

        let err = select_latest(temp_dir.path(), ".backup").unwrap_err();
        assert!(matches!(err, MirrorError::NoCandidates(_)));
    }

    #[test]
    fn test_invalid_source() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert!(matches!(
            select_latest(&missing, ".backup"),
            Err(MirrorError::InvalidSource(_))
        ));

        let file = temp_dir.path().join("afile");
        fs::write(&file, b"not a dir").unwrap();
        assert!(matches!(
            select_latest(&file, ".backup"),
            Err(MirrorError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_tie_break_on_name() {
        let picked = pick_latest(vec![
            candidate("signal-2024.backup", 5),
            candidate("signal-2025.backup", 5),
            candidate("signal-2023.backup", 5),
        ])
        .unwrap();
        assert_eq!(picked.name, "signal-2025.backup");
    }

    #[test]
    fn test_selection_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        write_with_mtime(temp_dir.path(), "a.backup", b"1", 7);
        write_with_mtime(temp_dir.path(), "b.backup", b"2", 7);

        let first = select_latest(temp_dir.path(), ".backup").unwrap();
        let second = select_latest(temp_dir.path(), ".backup").unwrap();
        assert_eq!(first.name, second.name);
        assert_eq!(first.name, "b.backup");
    }
}
