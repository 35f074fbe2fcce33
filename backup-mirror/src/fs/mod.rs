//! File system scanning for backup artifacts.

pub mod selector;

pub use selector::{select_latest, BackupCandidate};
