//! Mutable registry state and the logic that applies gathered results.
//!
//! Everything here runs under the interface write lock and reports what it
//! changed into an [`EventContext`].

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;

use compact_str::CompactString;
use tracing::{debug, error, warn};

use assetreg_core::{
    AssetFlags, AssetIdentifier, AssetRecord, CategoryMask, GatherWarning, TypeRegistry,
    TypeResolution, WarningKind,
};
use assetreg_gather::{GatheredContainer, ResultBatch};
use assetreg_index::{IndexStore, TypeHierarchy};

use crate::events::{EventContext, ProgressUpdate, RegistryEvent};

/// Tag naming a type declared by a record.
pub const GENERATED_TYPE_TAG: &str = "GeneratedType";
/// Tag naming the parent of a declared type.
pub const PARENT_TYPE_TAG: &str = "ParentType";

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum Phase {
    /// Nothing queued anywhere.
    #[default]
    Idle,
    /// The gatherer still has work.
    Gathering,
    /// The gatherer is idle; results or deferred containers remain.
    Draining,
}

/// Container waiting for a type to finish loading.
#[derive(Debug, Clone)]
pub(crate) struct DeferredContainer {
    pub container: GatheredContainer,
    pub retries: u32,
}

/// Counts of what one apply pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyCounts {
    pub containers: usize,
    pub assets_added: usize,
    pub assets_updated: usize,
    pub assets_removed: usize,
    pub paths_added: usize,
    pub deferred: usize,
    pub needs_load: usize,
    pub duplicates: usize,
}

impl ApplyCounts {
    pub(crate) fn add(&mut self, other: ApplyCounts) {
        self.containers += other.containers;
        self.assets_added += other.assets_added;
        self.assets_updated += other.assets_updated;
        self.assets_removed += other.assets_removed;
        self.paths_added += other.paths_added;
        self.deferred += other.deferred;
        self.needs_load += other.needs_load;
        self.duplicates += other.duplicates;
    }
}

/// How a container's records resolve against the type registry.
enum Resolution {
    Ready,
    Defer,
}

#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    pub store: IndexStore,
    pub hierarchy: TypeHierarchy,
    /// Gathered containers not yet applied.
    pub pending: VecDeque<GatheredContainer>,
    pub deferred: VecDeque<DeferredContainer>,
    pub needs_load: BTreeSet<CompactString>,
    pub warnings: Vec<GatherWarning>,
    pub phase: Phase,
    pub initial_search_in_progress: bool,
    /// Containers and needs-load entries received from the gatherer.
    pub found: u64,
    pub processed: u64,
    pub last_progress: Option<ProgressUpdate>,
    /// Sources of removed packages whose gather cache stamps must go.
    pub uncached: Vec<PathBuf>,
}

impl RegistryState {
    /// Record a directory path, emitting an event if it is new.
    pub fn add_path(&mut self, path: &str, ctx: &mut EventContext) -> bool {
        let added = self.store.add_path(path);
        if added {
            ctx.push(RegistryEvent::PathAdded(assetreg_core::normalize_path(path)));
        }
        added
    }

    /// Remove a container's records, package data and outgoing edges.
    pub fn remove_package(&mut self, name: &str, ctx: &mut EventContext) -> usize {
        if let Some(source) = self.store.package_data(name).and_then(|p| p.source.clone()) {
            self.uncached.push(source);
        }
        let removed = self.store.remove_package(name);
        let count = removed.len();
        for record in removed {
            ctx.push(RegistryEvent::AssetRemoved(record));
        }
        self.needs_load.remove(name);
        count
    }

    fn resolve(
        &self,
        container: &GatheredContainer,
        types: &dyn TypeRegistry,
        retries: u32,
        max_retries: u32,
        force: bool,
    ) -> Resolution {
        let loading = container
            .assets
            .iter()
            .find(|r| types.resolve(&r.asset_type) == TypeResolution::Loading);
        let Some(record) = loading else {
            return Resolution::Ready;
        };
        if force || types.is_startup_complete() {
            debug!(
                package = %container.package.package_name,
                asset_type = %record.asset_type,
                "Accepting container with a type that never finished loading"
            );
            return Resolution::Ready;
        }
        if retries >= max_retries {
            error!(
                package = %container.package.package_name,
                asset_type = %record.asset_type,
                retries,
                "Deferred retry cap reached, accepting without type processing"
            );
            return Resolution::Ready;
        }
        Resolution::Defer
    }

    /// Resolve types and either apply the container or defer it.
    pub fn ingest(
        &mut self,
        container: GatheredContainer,
        retries: u32,
        types: &dyn TypeRegistry,
        max_retries: u32,
        force: bool,
        ctx: &mut EventContext,
    ) -> ApplyCounts {
        match self.resolve(&container, types, retries, max_retries, force) {
            Resolution::Defer => {
                debug!(package = %container.package.package_name, retries, "Deferring container");
                self.deferred.push_back(DeferredContainer {
                    container,
                    retries: retries + 1,
                });
                ApplyCounts {
                    deferred: 1,
                    ..ApplyCounts::default()
                }
            }
            Resolution::Ready => self.apply_container(container, types, ctx),
        }
    }

    fn finish_record(&mut self, record: &mut AssetRecord, types: &dyn TypeRegistry) {
        record.flags.insert(AssetFlags::ON_DISK_ONLY);
        match types.resolve(&record.asset_type) {
            TypeResolution::Resolved => {
                record.flags.remove(AssetFlags::TYPE_UNRESOLVED);
                types.post_process(record);
            }
            TypeResolution::Loading | TypeResolution::Unknown => {
                debug!(asset = %record.identifier(), asset_type = %record.asset_type, "Type unresolved");
                record.flags.insert(AssetFlags::TYPE_UNRESOLVED);
            }
        }
        let declared = (
            record.tag(GENERATED_TYPE_TAG).and_then(|v| v.as_str()),
            record.tag(PARENT_TYPE_TAG).and_then(|v| v.as_str()),
        );
        if let (Some(name), Some(parent)) = declared {
            let (name, parent) = (name.to_string(), parent.to_string());
            self.hierarchy.record_dynamic_type(&name, &parent);
        }
    }

    /// Whether a container from `source` loses to the one already stored.
    fn loses_duplicate(&self, container: &GatheredContainer) -> bool {
        let Some(existing) = self.store.package_data(&container.package.package_name) else {
            return false;
        };
        match (&existing.source, &container.package.source) {
            (Some(old), Some(new)) if old != new && old.exists() => new > old,
            _ => false,
        }
    }

    /// Apply one resolved container: assets first, then dependencies.
    pub fn apply_container(
        &mut self,
        mut container: GatheredContainer,
        types: &dyn TypeRegistry,
        ctx: &mut EventContext,
    ) -> ApplyCounts {
        let mut counts = ApplyCounts {
            containers: 1,
            ..ApplyCounts::default()
        };
        let name = container.package.package_name.clone();

        if self.loses_duplicate(&container) {
            let existing = self
                .store
                .package_data(&name)
                .and_then(|p| p.source.clone())
                .unwrap_or_default();
            let source = container.package.source.clone().unwrap_or_default();
            warn!(
                package = %name,
                kept = %existing.display(),
                skipped = %source.display(),
                "Duplicate package, keeping lexically smallest source"
            );
            self.warnings.push(GatherWarning::new(
                source,
                format!("duplicate of {} for {name}", existing.display()),
                WarningKind::DuplicatePackage,
            ));
            counts.duplicates = 1;
            self.processed += 1;
            return counts;
        }

        if let Some(dir) = assetreg_core::parent_path(&name) {
            if self.add_path(dir, ctx) {
                counts.paths_added += 1;
            }
        }
        self.needs_load.remove(&name);

        // Records that vanished from the container.
        let incoming: BTreeSet<AssetIdentifier> =
            container.assets.iter().map(|r| r.identifier()).collect();
        let mut stale = Vec::new();
        self.store.enumerate_by_package(&name, |r| {
            let id = r.identifier();
            if !incoming.contains(&id) && !r.flags.contains(AssetFlags::IN_MEMORY) {
                stale.push(id);
            }
            true
        });
        for id in stale {
            if let Some(record) = self.store.remove_asset_data(&id) {
                ctx.push(RegistryEvent::AssetRemoved(record));
                counts.assets_removed += 1;
            }
        }

        for mut record in std::mem::take(&mut container.assets) {
            self.finish_record(&mut record, types);
            let id = record.identifier();
            let existing = self
                .store
                .asset(&id)
                .map(|e| (e.flags.contains(AssetFlags::IN_MEMORY), *e == record));
            match existing {
                None => {
                    self.store.add_asset_data(record.clone());
                    ctx.push(RegistryEvent::AssetAdded(record));
                    counts.assets_added += 1;
                }
                Some((true, _)) => ctx.push(RegistryEvent::AssetUpdatedOnDisk(record)),
                Some((false, false)) => {
                    self.store.update_asset_data(&id, record.clone(), false);
                    ctx.push(RegistryEvent::AssetUpdated(record));
                    counts.assets_updated += 1;
                }
                Some((false, true)) => {}
            }
        }

        let package_id = container.identifier();
        *self.store.create_or_get_package_data(&name) = container.package;

        // The container on disk is authoritative for every category.
        let changed = self.store.set_package_dependencies(
            &package_id,
            CategoryMask::all(),
            container
                .dependencies
                .into_iter()
                .map(|e| (e.target, e.category, e.properties)),
        );
        if changed {
            ctx.push(RegistryEvent::DependenciesChanged(package_id));
        }

        self.processed += 1;
        counts
    }

    /// Apply the non-container parts of a batch: paths, needs-load entries
    /// and warnings.
    pub fn apply_batch_metadata(&mut self, batch: &mut ResultBatch, ctx: &mut EventContext) -> ApplyCounts {
        let mut counts = ApplyCounts::default();
        self.found += (batch.containers.len() + batch.needs_load.len()) as u64;
        for path in std::mem::take(&mut batch.paths) {
            if self.add_path(&path, ctx) {
                counts.paths_added += 1;
            }
        }
        for (package, local) in std::mem::take(&mut batch.needs_load) {
            if self.needs_load.insert(package.clone()) {
                ctx.push(RegistryEvent::NeedsLoad { package, local });
                counts.needs_load += 1;
            }
        }
        for warning in std::mem::take(&mut batch.warnings) {
            debug!(path = %warning.path.display(), message = %warning.message, "Gather warning");
            self.warnings.push(warning);
        }
        counts
    }

    /// Current progress counters.
    pub fn progress(&self) -> ProgressUpdate {
        ProgressUpdate {
            total_found: self.found,
            processed: self.processed,
            pending_load: (self.deferred.len() + self.needs_load.len()) as u64,
        }
    }

    /// Re-declare dynamic types from every stored record, e.g. after a load.
    pub fn rebuild_dynamic_types(&mut self) {
        self.hierarchy.clear_dynamic_types();
        let declared: Vec<(String, String)> = self
            .store
            .records()
            .filter_map(|r| {
                let name = r.tag(GENERATED_TYPE_TAG)?.as_str()?;
                let parent = r.tag(PARENT_TYPE_TAG)?.as_str()?;
                Some((name.to_string(), parent.to_string()))
            })
            .collect();
        for (name, parent) in declared {
            self.hierarchy.record_dynamic_type(&name, &parent);
        }
    }

    /// Toggle sorted edge storage on every category.
    pub fn set_sorting(&mut self, enabled: bool) {
        let graph = self.store.graph_mut();
        for category in CategoryMask::all().categories() {
            graph.set_sorting_enabled(category, enabled);
        }
        graph.set_referencer_sorting_enabled(enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetreg_core::{DependencyCategory, DependencyProperties, PackageRecord, StaticTypeRegistry};
    use assetreg_gather::GatheredEdge;

    fn container(name: &str, asset_type: &str, source: &str) -> GatheredContainer {
        let mut package = PackageRecord::new(name);
        package.source = Some(PathBuf::from(source));
        let object = name.rsplit('/').next().unwrap();
        GatheredContainer {
            package,
            assets: vec![AssetRecord::new(name, object, asset_type)],
            dependencies: vec![GatheredEdge {
                target: AssetIdentifier::package("/Game/Shared"),
                category: DependencyCategory::Content,
                properties: DependencyProperties::HARD,
            }],
        }
    }

    #[test]
    fn test_apply_emits_assets_before_dependencies() {
        let types = StaticTypeRegistry::with_types([("Mesh", None)]);
        let mut state = RegistryState::default();
        let mut ctx = EventContext::new();

        let counts = state.apply_container(container("/Game/A", "Mesh", "/data/A.asset"), &types, &mut ctx);
        assert_eq!(counts.assets_added, 1);

        let names: Vec<_> = ctx.events().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["PathAdded", "AssetAdded", "DependenciesChanged"]);
        let record = state.store.asset(&AssetIdentifier::object("/Game/A", "A")).unwrap();
        assert!(record.flags.contains(AssetFlags::ON_DISK_ONLY));
        assert!(!record.flags.contains(AssetFlags::TYPE_UNRESOLVED));
    }

    #[test]
    fn test_reapply_identical_is_silent() {
        let types = StaticTypeRegistry::with_types([("Mesh", None)]);
        let mut state = RegistryState::default();
        let mut ctx = EventContext::new();
        state.apply_container(container("/Game/A", "Mesh", "/data/A.asset"), &types, &mut ctx);

        let mut again = EventContext::new();
        state.apply_container(container("/Game/A", "Mesh", "/data/A.asset"), &types, &mut again);
        assert!(again.is_empty());
    }

    #[test]
    fn test_loading_type_deferred_until_startup() {
        let types = StaticTypeRegistry::new();
        types.mark_loading("Cloth");
        let mut state = RegistryState::default();
        let mut ctx = EventContext::new();

        let counts = state.ingest(container("/Game/A", "Cloth", "/data/A.asset"), 0, &types, 10, false, &mut ctx);
        assert_eq!(counts.deferred, 1);
        assert!(ctx.is_empty());
        assert_eq!(state.deferred.len(), 1);

        types.set_startup_complete(true);
        let deferred = state.deferred.pop_front().unwrap();
        let counts = state.ingest(deferred.container, deferred.retries, &types, 10, false, &mut ctx);
        assert_eq!(counts.assets_added, 1);
        let record = state.store.asset(&AssetIdentifier::object("/Game/A", "A")).unwrap();
        assert!(record.flags.contains(AssetFlags::TYPE_UNRESOLVED));
    }

    #[test]
    fn test_retry_cap_forces_accept() {
        let types = StaticTypeRegistry::new();
        types.mark_loading("Cloth");
        let mut state = RegistryState::default();
        let mut ctx = EventContext::new();

        let counts = state.ingest(container("/Game/A", "Cloth", "/data/A.asset"), 3, &types, 3, false, &mut ctx);
        assert_eq!(counts.deferred, 0);
        assert_eq!(counts.assets_added, 1);
    }

    #[test]
    fn test_rescan_replaces_manage_edges() {
        let types = StaticTypeRegistry::with_types([("Mesh", None)]);
        let mut state = RegistryState::default();
        let mut ctx = EventContext::new();
        let mut first = container("/Game/A", "Mesh", "/data/A.asset");
        first.dependencies.push(GatheredEdge {
            target: AssetIdentifier::package("/Game/X"),
            category: DependencyCategory::Manage,
            properties: DependencyProperties::empty(),
        });
        state.apply_container(first, &types, &mut ctx);
        let id = AssetIdentifier::package("/Game/A");
        assert_eq!(state.store.dependencies(&id, &assetreg_core::DependencyQuery::all()).len(), 2);

        let mut again = EventContext::new();
        state.apply_container(container("/Game/A", "Mesh", "/data/A.asset"), &types, &mut again);
        let manage = assetreg_core::DependencyQuery::category(DependencyCategory::Manage);
        assert!(state.store.dependencies(&id, &manage).is_empty());
        let names: Vec<_> = again.events().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["DependenciesChanged"]);
    }

    #[test]
    fn test_duplicate_counts_as_processed() {
        let temp = tempfile::TempDir::new().unwrap();
        let (a, b) = (temp.path().join("a.asset"), temp.path().join("b.asset"));
        std::fs::write(&a, "{}").unwrap();
        std::fs::write(&b, "{}").unwrap();
        let types = StaticTypeRegistry::with_types([("Mesh", None)]);
        let mut state = RegistryState::default();
        let mut ctx = EventContext::new();

        let mut batch = ResultBatch::new();
        batch.containers.push(container("/Game/A", "Mesh", &a.to_string_lossy()));
        batch.containers.push(container("/Game/A", "Mesh", &b.to_string_lossy()));
        state.apply_batch_metadata(&mut batch, &mut ctx);
        let mut counts = ApplyCounts::default();
        for c in batch.containers.drain(..) {
            counts.add(state.ingest(c, 0, &types, 10, false, &mut ctx));
        }

        assert_eq!(counts.duplicates, 1);
        let progress = state.progress();
        assert_eq!(progress.total_found, 2);
        assert_eq!(progress.processed, progress.total_found);
        assert_eq!(state.warnings[0].kind, WarningKind::DuplicatePackage);
    }

    #[test]
    fn test_remove_package_marks_source_uncached() {
        let types = StaticTypeRegistry::with_types([("Mesh", None)]);
        let mut state = RegistryState::default();
        let mut ctx = EventContext::new();
        state.apply_container(container("/Game/A", "Mesh", "/data/A.asset"), &types, &mut ctx);

        assert_eq!(state.remove_package("/Game/A", &mut ctx), 1);
        assert_eq!(state.uncached, vec![PathBuf::from("/data/A.asset")]);
    }

    #[test]
    fn test_dynamic_type_recorded() {
        let types = StaticTypeRegistry::with_types([("Blueprint", None), ("Actor", None)]);
        let mut state = RegistryState::default();
        let mut ctx = EventContext::new();
        let mut c = container("/Game/Door", "Blueprint", "/data/Door.asset");
        c.assets[0] = c.assets[0]
            .clone()
            .with_tag(GENERATED_TYPE_TAG, "Door_C")
            .with_tag(PARENT_TYPE_TAG, "Actor");
        state.apply_container(c, &types, &mut ctx);

        state.hierarchy.ensure_current(&types);
        assert_eq!(state.hierarchy.parent("Door_C"), Some("Actor"));
    }
}
