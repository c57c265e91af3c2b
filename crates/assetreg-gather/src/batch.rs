//! Result batches handed from the gatherer to the registry.

use std::path::PathBuf;

use compact_str::CompactString;

use assetreg_core::{
    AssetIdentifier, AssetRecord, DependencyCategory, DependencyProperties, GatherWarning,
    PackageRecord,
};

/// Provisional dependency edge declared by a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatheredEdge {
    pub target: AssetIdentifier,
    pub category: DependencyCategory,
    pub properties: DependencyProperties,
}

/// Everything read from one container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatheredContainer {
    /// Package record; `source` names the local file.
    pub package: PackageRecord,
    /// Provisional asset records.
    pub assets: Vec<AssetRecord>,
    /// Outgoing edges of the container.
    pub dependencies: Vec<GatheredEdge>,
}

impl GatheredContainer {
    /// Identifier of the container itself.
    pub fn identifier(&self) -> AssetIdentifier {
        AssetIdentifier::package(self.package.package_name.clone())
    }
}

/// Output of one or more gather units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultBatch {
    /// Discovered directory paths in namespace form.
    pub paths: Vec<CompactString>,
    /// Containers with embedded metadata.
    pub containers: Vec<GatheredContainer>,
    /// Containers without embedded metadata; these need a full load.
    pub needs_load: Vec<(CompactString, PathBuf)>,
    /// Non-fatal diagnostics.
    pub warnings: Vec<GatherWarning>,
}

impl ResultBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the batch carries nothing.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
            && self.containers.is_empty()
            && self.needs_load.is_empty()
            && self.warnings.is_empty()
    }

    /// Number of items across every list.
    pub fn len(&self) -> usize {
        self.paths.len() + self.containers.len() + self.needs_load.len() + self.warnings.len()
    }

    /// Move everything from `other` onto the end of this batch.
    pub fn append(&mut self, mut other: ResultBatch) {
        self.paths.append(&mut other.paths);
        self.containers.append(&mut other.containers);
        self.needs_load.append(&mut other.needs_load);
        self.warnings.append(&mut other.warnings);
    }

    /// Split off at most `max` containers, together with every pending path,
    /// needs-load entry and warning.
    ///
    /// Paths always travel with the first batch taken so a directory is known
    /// before the containers inside it arrive.
    pub fn take_front(&mut self, max: usize) -> ResultBatch {
        let count = max.min(self.containers.len());
        ResultBatch {
            paths: std::mem::take(&mut self.paths),
            containers: self.containers.drain(..count).collect(),
            needs_load: std::mem::take(&mut self.needs_load),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    /// Keep only paths, containers and needs-load entries whose namespace
    /// path passes `keep`. Returns the number of entries dropped.
    pub fn retain_namespaces(&mut self, keep: impl Fn(&str) -> bool) -> usize {
        let before = self.paths.len() + self.containers.len() + self.needs_load.len();
        self.paths.retain(|p| keep(p));
        self.containers.retain(|c| keep(&c.package.package_name));
        self.needs_load.retain(|(package, _)| keep(package));
        before - (self.paths.len() + self.containers.len() + self.needs_load.len())
    }
}
