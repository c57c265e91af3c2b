//! Snapshot persistence for [`IndexStore`].
//!
//! Layout: a four byte magic, a little-endian `u32` format version, then a
//! bincode-encoded body.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;
use tracing::{debug, info};

use assetreg_core::{
    AssetIdentifier, AssetRecord, CategoryMask, DependencyCategory, DependencyProperties,
    DependencyQuery, PackageRecord,
};

use crate::store::IndexStore;

/// Leading bytes of every snapshot.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"ARSN";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Errors from snapshot encoding or decoding.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Underlying reader or writer failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input does not start with the snapshot magic.
    #[error("Not a registry snapshot")]
    BadMagic,

    /// Snapshot was written by an incompatible format version.
    #[error("Unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// Body could not be encoded or decoded.
    #[error("Snapshot body error: {0}")]
    Codec(#[from] bincode::Error),
}

/// What to include when saving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOptions {
    /// Write the dependency graph.
    pub include_dependencies: bool,
    /// Write package records.
    pub include_package_data: bool,
    /// Only write these tag names. `None` writes every tag.
    pub tag_filter: Option<HashSet<CompactString>>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            include_dependencies: true,
            include_package_data: true,
            tag_filter: None,
        }
    }
}

/// Metadata describing a loaded snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub saved_at: DateTime<Utc>,
    pub has_dependencies: bool,
    pub has_package_data: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotBody {
    saved_at: DateTime<Utc>,
    has_dependencies: bool,
    has_package_data: bool,
    assets: Vec<AssetRecord>,
    packages: Vec<PackageRecord>,
    paths: Vec<CompactString>,
    /// Identifier table referenced by `edges`.
    nodes: Vec<AssetIdentifier>,
    edges: Vec<(u32, u32, DependencyCategory, DependencyProperties)>,
}

/// How [`IndexStore::append`] merges another store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AppendMode {
    /// Add new records and overwrite existing ones.
    Append,
    /// Only add records that are not present yet.
    OnlyUpdateNew,
    /// Only overwrite records that are already present.
    OnlyUpdateExisting,
    /// Replace the whole index.
    Rebuild,
}

/// Identifiers touched by [`IndexStore::append`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub added: Vec<AssetIdentifier>,
    pub updated: Vec<AssetIdentifier>,
    pub removed: Vec<AssetIdentifier>,
    pub paths_added: Vec<CompactString>,
    pub paths_removed: Vec<CompactString>,
}

impl IndexStore {
    /// Write a snapshot.
    pub fn save<W: Write>(&self, mut writer: W, options: &SaveOptions) -> Result<(), SnapshotError> {
        let mut assets: Vec<AssetRecord> = self.records().cloned().collect();
        assets.sort_by_key(|r| r.identifier());
        if let Some(keep) = &options.tag_filter {
            for record in &mut assets {
                record.tags.retain(|key, _| keep.contains(key));
            }
        }

        let packages = if options.include_package_data {
            self.packages()
                .cloned()
                .sorted_by(|a, b| a.package_name.cmp(&b.package_name))
                .collect()
        } else {
            Vec::new()
        };

        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        if options.include_dependencies {
            let mut table: HashMap<AssetIdentifier, u32> = HashMap::new();
            let mut slot = |id: AssetIdentifier, nodes: &mut Vec<AssetIdentifier>| -> u32 {
                *table.entry(id.clone()).or_insert_with(|| {
                    nodes.push(id);
                    (nodes.len() - 1) as u32
                })
            };
            for (source, target, category, props) in self.edges() {
                let s = slot(source, &mut nodes);
                let t = slot(target, &mut nodes);
                edges.push((s, t, category, props));
            }
        }

        let body = SnapshotBody {
            saved_at: Utc::now(),
            has_dependencies: options.include_dependencies,
            has_package_data: options.include_package_data,
            assets,
            packages,
            paths: self.path_tree().paths(),
            nodes,
            edges,
        };

        writer.write_all(&SNAPSHOT_MAGIC)?;
        writer.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
        bincode::serialize_into(&mut writer, &body)?;
        writer.flush()?;
        debug!(
            assets = body.assets.len(),
            edges = body.edges.len(),
            "Saved snapshot"
        );
        Ok(())
    }

    /// Read a snapshot into a fresh store.
    pub fn load<R: Read>(mut reader: R) -> Result<(IndexStore, SnapshotInfo), SnapshotError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let mut version = [0u8; 4];
        reader.read_exact(&mut version)?;
        let version = u32::from_le_bytes(version);
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: version,
                expected: SNAPSHOT_VERSION,
            });
        }
        let body: SnapshotBody = bincode::deserialize_from(&mut reader)?;

        let mut store = IndexStore::new();
        for path in &body.paths {
            store.add_path(path);
        }
        for record in body.assets {
            store.add_asset_data(record);
        }
        for package in body.packages {
            let name = package.package_name.clone();
            *store.create_or_get_package_data(&name) = package;
        }

        let graph = store.graph_mut();
        for category in CategoryMask::all().categories() {
            graph.set_sorting_enabled(category, false);
        }
        graph.set_referencer_sorting_enabled(false);
        let ids: Vec<_> = body.nodes.iter().map(|id| graph.create_or_find(id)).collect();
        for (s, t, category, props) in body.edges {
            match (ids.get(s as usize), ids.get(t as usize)) {
                (Some(&s), Some(&t)) => {
                    graph.add_dependency(s, t, category, props);
                }
                _ => {
                    return Err(SnapshotError::Codec(Box::new(bincode::ErrorKind::Custom(
                        format!("edge references missing node {s} -> {t}"),
                    ))));
                }
            }
        }
        for category in CategoryMask::all().categories() {
            graph.set_sorting_enabled(category, true);
        }
        graph.set_referencer_sorting_enabled(true);

        let info = SnapshotInfo {
            saved_at: body.saved_at,
            has_dependencies: body.has_dependencies,
            has_package_data: body.has_package_data,
        };
        info!(assets = store.len(), saved_at = %info.saved_at, "Loaded snapshot");
        Ok((store, info))
    }

    /// Merge another store into this one.
    pub fn append(&mut self, other: IndexStore, mode: AppendMode) -> AppendOutcome {
        let mut outcome = AppendOutcome::default();

        if mode == AppendMode::Rebuild {
            let mut old: Vec<AssetIdentifier> = self
                .records()
                .map(|r| r.identifier())
                .filter(|id| other.asset(id).is_none())
                .collect();
            old.sort();
            outcome.removed = old;
            let before: BTreeSet<CompactString> = self.path_tree().paths().into_iter().collect();
            let after: BTreeSet<CompactString> = other.path_tree().paths().into_iter().collect();
            outcome.paths_removed = before.difference(&after).cloned().collect();
            outcome.paths_added = after.difference(&before).cloned().collect();
            let mut records: Vec<&AssetRecord> = other.records().collect();
            records.sort_by_key(|r| r.identifier());
            for record in records {
                let id = record.identifier();
                match self.asset(&id) {
                    None => outcome.added.push(id),
                    Some(existing) if existing != record => outcome.updated.push(id),
                    Some(_) => {}
                }
            }
            *self = other;
            return outcome;
        }

        if mode != AppendMode::OnlyUpdateExisting {
            for path in other.path_tree().paths() {
                if self.add_path(&path) {
                    outcome.paths_added.push(path);
                }
            }
        }

        let mut touched: BTreeSet<CompactString> = BTreeSet::new();
        let mut records: Vec<&AssetRecord> = other.records().collect();
        records.sort_by_key(|r| r.identifier());
        for record in records {
            let id = record.identifier();
            let exists = self.asset(&id).is_some();
            match (mode, exists) {
                (AppendMode::Append | AppendMode::OnlyUpdateNew, false) => {
                    self.add_asset_data(record.clone());
                    outcome.added.push(id);
                }
                (AppendMode::Append | AppendMode::OnlyUpdateExisting, true) => {
                    self.update_asset_data(&id, record.clone(), false);
                    outcome.updated.push(id);
                }
                _ => continue,
            }
            touched.insert(record.package_name.clone());
        }

        for name in &touched {
            if let Some(package) = other.package_data(name) {
                *self.create_or_get_package_data(name) = package.clone();
            }
            let source = AssetIdentifier::package(name.clone());
            let edges = other.dependencies(&source, &DependencyQuery::all());
            if !edges.is_empty() || other.graph().find(&source).is_some() {
                self.set_package_dependencies(&source, CategoryMask::all(), edges);
            }
        }

        debug!(
            %mode,
            added = outcome.added.len(),
            updated = outcome.updated.len(),
            "Appended store"
        );
        outcome
    }
}
