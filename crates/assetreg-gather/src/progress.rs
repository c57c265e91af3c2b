//! Gather progress reporting.

use std::path::PathBuf;
use std::time::Duration;

/// Progress information while gathering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatherProgress {
    /// Directories read so far.
    pub dirs_scanned: u64,
    /// Container files discovered so far.
    pub files_discovered: u64,
    /// Containers parsed into records.
    pub containers_gathered: u64,
    /// Containers skipped because the gather cache saw them unchanged.
    pub containers_unchanged: u64,
    /// Containers handed to the registry.
    pub containers_delivered: u64,
    /// Directories and files still queued.
    pub pending: u64,
    /// Number of warnings encountered.
    pub errors_count: u64,
    /// Last path processed.
    pub current_path: PathBuf,
    /// Time since the gatherer was created.
    pub elapsed: Duration,
}

impl GatherProgress {
    /// Create initial progress state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers parsed per second.
    pub fn containers_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.containers_gathered as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Total containers the gatherer finished with, parsed or skipped.
    pub fn containers_processed(&self) -> u64 {
        self.containers_gathered + self.containers_unchanged
    }
}
