//! Registry and gatherer configuration types.

use std::path::PathBuf;
use std::time::Duration;

use compact_str::CompactString;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Maps a local directory onto a namespace root such as `/Game`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    /// Directory on disk.
    pub local_path: PathBuf,
    /// Namespace root, always starting with `/`.
    pub namespace: CompactString,
}

impl MountPoint {
    /// Create a mount point.
    pub fn new(local_path: impl Into<PathBuf>, namespace: impl Into<CompactString>) -> Self {
        Self {
            local_path: local_path.into(),
            namespace: namespace.into(),
        }
    }
}

/// Configuration for the background gatherer.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct GatherConfig {
    /// Mount points scanned when gathering starts.
    #[builder(default)]
    #[serde(default)]
    pub mount_points: Vec<MountPoint>,

    /// Number of worker threads (0 = auto-detect).
    #[builder(default = "1")]
    #[serde(default = "default_workers")]
    pub worker_threads: usize,

    /// File extensions recognized as containers (without the dot).
    #[builder(default = "default_extensions()")]
    #[serde(default = "default_extensions")]
    pub container_extensions: Vec<String>,

    /// Glob patterns over namespace paths that are never scanned.
    #[builder(default)]
    #[serde(default)]
    pub deny_patterns: Vec<String>,

    /// Containers parsed per unit of background work.
    #[builder(default = "64")]
    #[serde(default = "default_files_per_unit")]
    pub files_per_unit: usize,

    /// Maximum directory depth below a mount point (None = unlimited).
    #[builder(default)]
    #[serde(default)]
    pub max_depth: Option<u32>,

    /// Cap on discovery iterations for a single scan request.
    #[builder(default = "1_000_000")]
    #[serde(default = "default_max_iterations")]
    pub max_scan_iterations: usize,

    /// Skip containers whose size and mtime are unchanged since the last gather.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub use_gather_cache: bool,
}

/// Configuration for the registry controller.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct RegistryConfig {
    /// Gatherer settings.
    #[builder(default)]
    #[serde(default)]
    pub gather: GatherConfig,

    /// Time budget per tick in milliseconds (None = unbounded).
    #[builder(default = "Some(16)")]
    #[serde(default = "default_tick_budget")]
    pub tick_budget_ms: Option<u64>,

    /// Items processed between clock/priority checks inside a tick.
    #[builder(default = "32")]
    #[serde(default = "default_check_interval")]
    pub check_interval: u32,

    /// Records taken from the gatherer per tick.
    #[builder(default = "1024")]
    #[serde(default = "default_batch_size")]
    pub max_batch_size: usize,

    /// Retries before a deferred record is force-accepted.
    #[builder(default = "1000")]
    #[serde(default = "default_max_retries")]
    pub max_deferred_retries: u32,
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    1
}

fn default_extensions() -> Vec<String> {
    vec!["asset".to_string()]
}

fn default_files_per_unit() -> usize {
    64
}

fn default_max_iterations() -> usize {
    1_000_000
}

fn default_tick_budget() -> Option<u64> {
    Some(16)
}

fn default_check_interval() -> u32 {
    32
}

fn default_batch_size() -> usize {
    1024
}

fn default_max_retries() -> u32 {
    1000
}

fn validate_mounts(mounts: &[MountPoint]) -> Result<(), String> {
    for mount in mounts {
        if !mount.namespace.starts_with('/') || mount.namespace.len() < 2 {
            return Err(format!(
                "Mount namespace must be rooted, got {:?}",
                mount.namespace
            ));
        }
        if mount.local_path.as_os_str().is_empty() {
            return Err("Mount local path cannot be empty".to_string());
        }
    }
    Ok(())
}

impl GatherConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref mounts) = self.mount_points {
            validate_mounts(mounts)?;
        }
        if let Some(ref exts) = self.container_extensions {
            if exts.is_empty() {
                return Err("At least one container extension is required".to_string());
            }
        }
        if self.files_per_unit == Some(0) {
            return Err("files_per_unit must be positive".to_string());
        }
        Ok(())
    }
}

impl RegistryConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.check_interval == Some(0) {
            return Err("check_interval must be positive".to_string());
        }
        if self.max_batch_size == Some(0) {
            return Err("max_batch_size must be positive".to_string());
        }
        Ok(())
    }
}

impl GatherConfig {
    /// Create a new gather config builder.
    pub fn builder() -> GatherConfigBuilder {
        GatherConfigBuilder::default()
    }

    /// Effective worker thread count.
    pub fn effective_workers(&self) -> usize {
        match self.worker_threads {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }

    /// Check whether a file name carries a container extension.
    pub fn is_container_file(&self, file_name: &str) -> bool {
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => self
                .container_extensions
                .iter()
                .any(|e| e.eq_ignore_ascii_case(ext)),
            _ => false,
        }
    }

    /// Re-check invariants on a config that bypassed the builder (e.g. TOML).
    pub fn check(&self) -> Result<(), RegistryError> {
        validate_mounts(&self.mount_points)
            .map_err(|message| RegistryError::InvalidConfig { message })?;
        if self.container_extensions.is_empty() || self.files_per_unit == 0 {
            return Err(RegistryError::InvalidConfig {
                message: "container extensions and files_per_unit must be non-empty".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            mount_points: Vec::new(),
            worker_threads: default_workers(),
            container_extensions: default_extensions(),
            deny_patterns: Vec::new(),
            files_per_unit: default_files_per_unit(),
            max_depth: None,
            max_scan_iterations: default_max_iterations(),
            use_gather_cache: true,
        }
    }
}

impl RegistryConfig {
    /// Create a new registry config builder.
    pub fn builder() -> RegistryConfigBuilder {
        RegistryConfigBuilder::default()
    }

    /// Tick budget as a duration.
    pub fn tick_budget(&self) -> Option<Duration> {
        self.tick_budget_ms.map(Duration::from_millis)
    }

    /// Re-check invariants on a config that bypassed the builder.
    pub fn check(&self) -> Result<(), RegistryError> {
        self.gather.check()?;
        if self.check_interval == 0 || self.max_batch_size == 0 {
            return Err(RegistryError::InvalidConfig {
                message: "check_interval and max_batch_size must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            gather: GatherConfig::default(),
            tick_budget_ms: default_tick_budget(),
            check_interval: default_check_interval(),
            max_batch_size: default_batch_size(),
            max_deferred_retries: default_max_retries(),
        }
    }
}
