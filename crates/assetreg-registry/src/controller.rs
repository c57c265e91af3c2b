//! The registry controller: owns the gatherer, the index and the event flow.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use compact_str::CompactString;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use assetreg_core::{
    AssetFilter, AssetFlags, AssetIdentifier, AssetRecord, CategoryMask, DependencyCategory,
    DependencyProperties, DependencyQuery, GatherWarning, MountPoint, PackageRecord,
    RegistryConfig, RegistryError, TypeRegistry,
};
use assetreg_gather::{ContainerReader, GatherFlags, GatherProgress, Gatherer};
use assetreg_index::{
    AppendMode, AppendOutcome, CompiledFilter, Dependency, IndexStore, SaveOptions, SnapshotError,
};

use crate::events::{Broadcaster, DeferredEvents, EventContext, ListenerId, ProgressUpdate, RegistryEvent};
use crate::lock::InterfaceLock;
use crate::state::{ApplyCounts, Phase, RegistryState};
use crate::tick::{EarlyExit, TickBudget};

/// Options for [`RegistryController::scan_paths`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanFlags {
    /// Re-read every container and purge entries that no longer exist.
    pub force_rescan: bool,
    /// Gather paths matching the deny list.
    pub ignore_deny_list: bool,
    /// Accept records whose type is still loading instead of deferring them.
    pub wait_for_in_memory: bool,
    /// Drop unmounted or missing paths instead of failing.
    pub ignore_invalid_path_warning: bool,
}

/// Result of a synchronous scan.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub counts: ApplyCounts,
    /// Packages purged by a forced rescan.
    pub packages_purged: usize,
    pub warnings: Vec<GatherWarning>,
    pub elapsed: Duration,
}

/// Outcome of one [`RegistryController::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickStatus {
    pub phase: Phase,
    /// Set when the tick yielded before running out of work.
    pub exited_early: Option<EarlyExit>,
    /// Containers applied or deferred during the tick.
    pub processed: usize,
    /// Containers still pending or deferred.
    pub remaining: usize,
}

/// Edge offered to the decision callback of
/// [`RegistryController::set_manage_references`].
#[derive(Debug, Clone, Copy)]
pub struct ManageContext<'a> {
    pub manager: &'a AssetIdentifier,
    /// Asset whose content edge reached `target`.
    pub source: &'a AssetIdentifier,
    pub target: &'a AssetIdentifier,
    /// Properties of the content edge.
    pub properties: DependencyProperties,
    /// Whether `source` is the manager itself.
    pub direct: bool,
}

/// What to do with a candidate manage edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManageDecision {
    Skip,
    /// Add the edge but do not walk the target's dependencies.
    SetOnly,
    SetAndRecurse,
}

/// Coordinates gathering, the in-memory index and event delivery.
///
/// All mutable state sits behind one [`InterfaceLock`]. Events are only
/// delivered on the designated thread; mutations made on other threads queue
/// their events until [`process_deferred_events`](Self::process_deferred_events)
/// runs there.
pub struct RegistryController {
    config: RegistryConfig,
    types: Arc<dyn TypeRegistry>,
    gatherer: Gatherer,
    state: InterfaceLock<RegistryState>,
    broadcaster: Broadcaster,
    deferred_events: DeferredEvents,
    designated: Mutex<ThreadId>,
}

impl RegistryController {
    /// Create a controller that reads JSON manifests. The calling thread
    /// becomes the designated thread.
    pub fn new(config: RegistryConfig, types: Arc<dyn TypeRegistry>) -> Result<Self, RegistryError> {
        config.check()?;
        let gatherer = Gatherer::new(config.gather.clone())?;
        Ok(Self::assemble(config, types, gatherer))
    }

    /// Create a controller with a custom container reader.
    pub fn with_reader(
        config: RegistryConfig,
        types: Arc<dyn TypeRegistry>,
        reader: Arc<dyn ContainerReader>,
    ) -> Result<Self, RegistryError> {
        config.check()?;
        let gatherer = Gatherer::with_reader(config.gather.clone(), reader)?;
        Ok(Self::assemble(config, types, gatherer))
    }

    fn assemble(config: RegistryConfig, types: Arc<dyn TypeRegistry>, gatherer: Gatherer) -> Self {
        let capacity = config.max_batch_size.max(64) * 4;
        Self {
            config,
            types,
            gatherer,
            state: InterfaceLock::new(RegistryState::default()),
            broadcaster: Broadcaster::new(capacity),
            deferred_events: DeferredEvents::new(),
            designated: Mutex::new(thread::current().id()),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Make the calling thread the designated thread.
    pub fn set_designated_thread(&self) {
        *self.designated.lock() = thread::current().id();
    }

    /// Whether the calling thread is the designated thread.
    pub fn is_designated_thread(&self) -> bool {
        *self.designated.lock() == thread::current().id()
    }

    /// Start background gathering of every mount point.
    ///
    /// Edge sorting is suspended until the initial search completes.
    pub fn start(&self) -> Result<(), RegistryError> {
        let mounts = self.gatherer.mount_points();
        self.mutate(|state, ctx| {
            state.initial_search_in_progress = true;
            state.set_sorting(false);
            for mount in &mounts {
                state.add_path(&mount.namespace, ctx);
            }
        });
        self.gatherer.start()?;
        info!(mounts = mounts.len(), "Registry started");
        Ok(())
    }

    /// Stop the gatherer and deliver queued events.
    pub fn shutdown(&self) {
        self.gatherer.stop();
        if self.is_designated_thread() {
            self.flush_events();
        }
        info!("Registry shut down");
    }

    /// Receive events through a broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.broadcaster.subscribe()
    }

    /// Register a synchronous listener, called on the designated thread.
    pub fn add_listener(&self, listener: impl Fn(&RegistryEvent) + Send + Sync + 'static) -> ListenerId {
        self.broadcaster.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.broadcaster.remove_listener(id)
    }

    /// Receive gatherer progress updates.
    pub fn subscribe_gather_progress(&self) -> broadcast::Receiver<GatherProgress> {
        self.gatherer.subscribe()
    }

    /// Deliver events queued by any thread, in the order they were produced.
    ///
    /// Returns the number of events delivered.
    pub fn process_deferred_events(&self) -> Result<usize, RegistryError> {
        if !self.is_designated_thread() {
            return Err(RegistryError::WrongThread {
                operation: "process_deferred_events",
            });
        }
        Ok(self.flush_events())
    }

    /// Number of event batches waiting for the designated thread.
    pub fn deferred_event_count(&self) -> usize {
        self.deferred_events.len()
    }

    fn flush_events(&self) -> usize {
        self.deferred_events
            .take()
            .into_iter()
            .map(|ctx| self.broadcaster.broadcast(ctx))
            .sum()
    }

    /// Run `f` under the write lock. Its events are queued before the lock
    /// is released, then delivered if this is the designated thread.
    fn mutate<R>(&self, f: impl FnOnce(&mut RegistryState, &mut EventContext) -> R) -> R {
        let result = {
            let mut state = self.state.write();
            let mut ctx = EventContext::new();
            let result = f(&mut state, &mut ctx);
            for source in state.uncached.drain(..) {
                self.gatherer.invalidate_cached(&source);
            }
            self.deferred_events.push(ctx);
            result
        };
        if self.is_designated_thread() {
            self.flush_events();
        }
        result
    }

    /// Mount `local` under `namespace`; queues it when gathering is running.
    pub fn add_mount_point(&self, local: &Path, namespace: &str) -> Result<bool, RegistryError> {
        let added = self.gatherer.add_mount_point(local, namespace)?;
        if added {
            self.mutate(|state, ctx| state.add_path(namespace, ctx));
            if self.gatherer.is_running() {
                self.gatherer
                    .queue_paths(&[local.to_path_buf()], GatherFlags::default())?;
            }
        }
        Ok(added)
    }

    /// Unmount `local`, dropping every package and path beneath it.
    pub fn remove_mount_point(&self, local: &Path) -> Option<MountPoint> {
        let mount = self.gatherer.remove_mount_point(local)?;
        let namespace = mount.namespace.clone();
        self.mutate(|state, ctx| {
            let removed = purge_packages(state, &namespace, |_| true, ctx);
            state
                .store
                .remove_path_with(&namespace, true, |p| ctx.push(RegistryEvent::PathRemoved(p.into())));
            state.pending.retain(|c| !is_under(&c.package.package_name, &namespace));
            state
                .deferred
                .retain(|d| !is_under(&d.container.package.package_name, &namespace));
            debug!(namespace = %namespace, packages = removed, "Purged unmounted namespace");
        });
        Some(mount)
    }

    /// Registered mount points.
    pub fn mount_points(&self) -> Vec<MountPoint> {
        self.gatherer.mount_points()
    }

    /// Gather `local` ahead of other queued work.
    pub fn prioritize(&self, local: &Path) {
        self.gatherer.prioritize(local);
    }

    pub fn pause_gathering(&self) {
        self.gatherer.pause_processing();
    }

    pub fn resume_gathering(&self) {
        self.gatherer.resume_processing();
    }

    /// Block until the gatherer has no queued or in-flight work.
    pub fn wait_for_gather_idle(&self, timeout: Option<Duration>) -> bool {
        self.gatherer.wait_for_idle(timeout)
    }

    /// Number of priority callers blocked on the interface lock.
    pub fn priority_waiters(&self) -> usize {
        self.state.priority_waiters()
    }

    /// Whether a namespace path is on the deny list.
    pub fn is_on_deny_list(&self, namespace: &str) -> bool {
        self.gatherer.is_on_deny_list(namespace)
    }

    /// Tick with the configured time budget.
    pub fn tick(&self) -> TickStatus {
        self.tick_with_budget(self.config.tick_budget())
    }

    /// Drain gathered results into the index until the work runs out, the
    /// budget expires, or a priority caller is waiting on the lock.
    pub fn tick_with_budget(&self, budget: Option<Duration>) -> TickStatus {
        let types = self.types.as_ref();
        let max_retries = self.config.max_deferred_retries;
        let mut budget = TickBudget::new(budget, self.config.check_interval);
        let mut processed = 0usize;

        let status = {
            let mut state = self.state.write();
            let mut ctx = EventContext::new();
            let before = state.progress();

            if state.phase == Phase::Idle && self.has_gather_work(&state) {
                begin_scan(&mut state, &mut ctx);
            }

            // Retry deferred containers first.
            let mut retry = std::mem::take(&mut state.deferred);
            while let Some(entry) = retry.pop_front() {
                state.ingest(entry.container, entry.retries, types, max_retries, false, &mut ctx);
                processed += 1;
                if budget.should_exit_early(&self.state) {
                    break;
                }
            }
            let newly_deferred = std::mem::replace(&mut state.deferred, retry);
            state.deferred.extend(newly_deferred);

            while budget.exit_reason().is_none() {
                if state.pending.is_empty() {
                    let mut batch = self.gatherer.get_and_trim_results(self.config.max_batch_size);
                    if batch.is_empty() {
                        break;
                    }
                    let dropped = batch.retain_namespaces(|ns| self.gatherer.to_local(ns).is_some());
                    if dropped > 0 {
                        debug!(dropped, "Dropped results of an unmounted namespace");
                    }
                    if state.phase == Phase::Idle {
                        begin_scan(&mut state, &mut ctx);
                    }
                    state.apply_batch_metadata(&mut batch, &mut ctx);
                    state.pending.extend(batch.containers);
                    continue;
                }
                let Some(container) = state.pending.pop_front() else {
                    break;
                };
                state.ingest(container, 0, types, max_retries, false, &mut ctx);
                processed += 1;
                if budget.should_exit_early(&self.state) {
                    break;
                }
            }

            let remaining = state.pending.len() + state.deferred.len();
            let next = if !self.gatherer.is_idle() {
                Phase::Gathering
            } else if remaining > 0 || self.gatherer.pending_results() > 0 {
                Phase::Draining
            } else {
                Phase::Idle
            };
            if state.phase != Phase::Idle && next == Phase::Idle {
                ctx.push(RegistryEvent::ScanEnded);
            }
            state.phase = next;

            let progress = state.progress();
            if progress != before || (state.last_progress.is_none() && processed > 0) {
                state.last_progress = Some(progress);
                ctx.set_progress(progress);
            }

            if state.initial_search_in_progress
                && next == Phase::Idle
                && state.deferred.is_empty()
                && types.is_startup_complete()
            {
                state.initial_search_in_progress = false;
                state.set_sorting(true);
                ctx.set_search_completed();
                info!(
                    assets = state.store.len(),
                    packages = state.store.package_count(),
                    "Initial search completed"
                );
            }

            self.deferred_events.push(ctx);
            TickStatus {
                phase: next,
                exited_early: budget.exit_reason(),
                processed,
                remaining,
            }
        };

        if let Some(reason) = status.exited_early {
            debug!(?reason, processed, remaining = status.remaining, "Tick yielded");
        }
        if self.is_designated_thread() {
            self.flush_events();
        }
        status
    }

    fn has_gather_work(&self, state: &RegistryState) -> bool {
        !self.gatherer.is_idle()
            || self.gatherer.pending_results() > 0
            || !state.pending.is_empty()
            || !state.deferred.is_empty()
    }

    /// Tick until the controller goes idle. Returns `false` on timeout.
    pub fn run_until_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let status = self.tick();
            if status.phase == Phase::Idle {
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            if status.exited_early.is_none() {
                if status.phase == Phase::Gathering {
                    self.gatherer.wait_for_idle(Some(Duration::from_millis(10)));
                } else {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.state.read_priority().phase
    }

    /// Whether the initial search has yet to complete.
    pub fn is_initial_search_in_progress(&self) -> bool {
        self.state.read_priority().initial_search_in_progress
    }

    /// Current progress counters.
    pub fn progress(&self) -> ProgressUpdate {
        self.state.read_priority().progress()
    }

    /// Diagnostics accumulated so far.
    pub fn warnings(&self) -> Vec<GatherWarning> {
        self.state.read_priority().warnings.clone()
    }

    /// Gather `dirs` and `files` on the calling thread and apply the results
    /// immediately.
    ///
    /// Fails without mutating anything when a path is unmounted or missing,
    /// unless `ignore_invalid_path_warning` is set.
    pub fn scan_paths(
        &self,
        dirs: &[PathBuf],
        files: &[PathBuf],
        flags: ScanFlags,
    ) -> Result<ScanSummary, RegistryError> {
        let started = Instant::now();
        let valid = |p: &PathBuf| self.gatherer.to_namespace(p).is_some() && p.exists();
        let mut dirs = dirs.to_vec();
        let mut files = files.to_vec();
        if flags.ignore_invalid_path_warning {
            dirs.retain(valid);
            files.retain(valid);
        }
        let paths: Vec<PathBuf> = dirs.iter().chain(&files).cloned().collect();
        let gather_flags = GatherFlags {
            force_rescan: flags.force_rescan,
            ignore_deny_list: flags.ignore_deny_list,
        };
        let mut batch = self.gatherer.scan_paths_synchronous(&paths, gather_flags)?;

        let scanned: Vec<CompactString> = dirs
            .iter()
            .filter_map(|d| self.gatherer.to_namespace(d))
            .collect();
        let types = self.types.as_ref();
        let max_retries = self.config.max_deferred_retries;

        let mut summary = ScanSummary {
            warnings: batch.warnings.clone(),
            ..ScanSummary::default()
        };
        self.mutate(|state, ctx| {
            ctx.push(RegistryEvent::ScanStarted);
            if flags.force_rescan {
                let found: HashSet<CompactString> = batch
                    .containers
                    .iter()
                    .map(|c| c.package.package_name.clone())
                    .chain(batch.needs_load.iter().map(|(p, _)| p.clone()))
                    .collect();
                for namespace in &scanned {
                    summary.packages_purged +=
                        purge_packages(state, namespace, |name| !found.contains(name), ctx);
                }
            }
            summary.counts.add(state.apply_batch_metadata(&mut batch, ctx));
            for container in batch.containers.drain(..) {
                let counts = state.ingest(container, 0, types, max_retries, flags.wait_for_in_memory, ctx);
                summary.counts.add(counts);
            }
            if flags.wait_for_in_memory {
                while let Some(entry) = state.deferred.pop_front() {
                    let counts = state.ingest(entry.container, entry.retries, types, max_retries, true, ctx);
                    summary.counts.add(counts);
                }
            }
            let progress = state.progress();
            state.last_progress = Some(progress);
            ctx.set_progress(progress);
            ctx.push(RegistryEvent::ScanEnded);
        });

        summary.elapsed = started.elapsed();
        info!(
            containers = summary.counts.containers,
            added = summary.counts.assets_added,
            purged = summary.packages_purged,
            warnings = summary.warnings.len(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Scan complete"
        );
        Ok(summary)
    }

    /// Bring the merged type view up to date.
    fn refresh_hierarchy(&self) {
        let types = self.types.as_ref();
        if self.state.read_priority().hierarchy.needs_rebuild(types) {
            self.state.write_priority().hierarchy.ensure_current(types);
        }
    }

    /// Records matching `filter`, sorted by identifier.
    pub fn get_assets(&self, filter: &AssetFilter) -> Result<Vec<AssetRecord>, RegistryError> {
        filter.validate()?;
        self.refresh_hierarchy();
        let state = self.state.read_priority();
        let compiled = CompiledFilter::compile(filter, &state.hierarchy)?;
        Ok(state.store.collect_by_filter(&compiled))
    }

    pub fn get_asset(&self, id: &AssetIdentifier) -> Option<AssetRecord> {
        self.state.read_priority().store.asset(id).cloned()
    }

    pub fn get_package_data(&self, name: &str) -> Option<PackageRecord> {
        self.state.read_priority().store.package_data(name).cloned()
    }

    pub fn get_dependencies(&self, id: &AssetIdentifier, query: &DependencyQuery) -> Vec<Dependency> {
        self.state.read_priority().store.dependencies(id, query)
    }

    pub fn get_referencers(&self, id: &AssetIdentifier, query: &DependencyQuery) -> Vec<AssetIdentifier> {
        self.state.read_priority().store.referencers(id, query)
    }

    pub fn get_subpaths(&self, path: &str, recursive: bool) -> Vec<CompactString> {
        self.state.read_priority().store.subpaths(path, recursive)
    }

    pub fn path_exists(&self, path: &str) -> bool {
        self.state.read_priority().store.path_exists(path)
    }

    /// Ancestors of a type, nearest first. `None` for unknown or cyclic types.
    pub fn get_ancestor_types(&self, type_name: &str) -> Option<Vec<CompactString>> {
        self.refresh_hierarchy();
        self.state.read_priority().hierarchy.ancestor_chain(type_name)
    }

    /// `types` plus all subclasses, minus `excluded` subtrees, sorted.
    pub fn get_subclasses(&self, types: &[&str], excluded: &[&str]) -> Vec<CompactString> {
        self.refresh_hierarchy();
        let excluded: HashSet<CompactString> = excluded.iter().map(|t| CompactString::from(*t)).collect();
        let mut out: Vec<CompactString> = self
            .state
            .read_priority()
            .hierarchy
            .subclasses(types.iter().copied(), &excluded)
            .into_iter()
            .collect();
        out.sort();
        out
    }

    /// Number of stored records.
    pub fn asset_count(&self) -> usize {
        self.state.read_priority().store.len()
    }

    /// Number of stored package records.
    pub fn package_count(&self) -> usize {
        self.state.read_priority().store.package_count()
    }

    /// Add a directory path. Returns `false` if it already existed.
    pub fn add_path(&self, path: &str) -> bool {
        self.mutate(|state, ctx| state.add_path(path, ctx))
    }

    /// Remove a directory path and, with `force`, everything below it.
    ///
    /// Without `force`, fails while subpaths or records remain under the
    /// path. Records are never removed.
    pub fn remove_path(&self, path: &str, force: bool) -> bool {
        self.mutate(|state, ctx| {
            state
                .store
                .remove_path_with(path, force, |p| ctx.push(RegistryEvent::PathRemoved(p.into())))
        })
    }

    /// Store a record produced in memory.
    ///
    /// Tags missing from `record` are kept from the stored version. Returns
    /// `true` if the record was new.
    pub fn update_asset_in_memory(&self, mut record: AssetRecord) -> bool {
        record.flags.insert(AssetFlags::IN_MEMORY);
        record.flags.remove(AssetFlags::ON_DISK_ONLY);
        self.mutate(|state, ctx| {
            let id = record.identifier();
            if state.store.asset(&id).is_some() {
                state.store.update_asset_data(&id, record, true);
                if let Some(stored) = state.store.asset(&id) {
                    ctx.push(RegistryEvent::AssetUpdated(stored.clone()));
                }
                return false;
            }
            state.add_path(record.package_path(), ctx);
            state.store.create_or_get_package_data(&record.package_name);
            state.store.add_asset_data(record.clone());
            ctx.push(RegistryEvent::AssetAdded(record));
            true
        })
    }

    /// Remove one record; the package goes with its last record.
    pub fn remove_asset(&self, id: &AssetIdentifier) -> Option<AssetRecord> {
        self.mutate(|state, ctx| {
            let record = state.store.remove_asset_data(id)?;
            ctx.push(RegistryEvent::AssetRemoved(record.clone()));
            let mut remaining = 0usize;
            state.store.enumerate_by_package(&record.package_name, |_| {
                remaining += 1;
                false
            });
            if remaining == 0 {
                state.remove_package(&record.package_name, ctx);
            }
            Some(record)
        })
    }

    /// Add manage edges from each manager to the assets its content edges
    /// reach, as chosen by `decide`.
    ///
    /// A later rescan of a manager's container replaces these edges with the
    /// ones declared on disk.
    ///
    /// `decide` runs under the write lock and must not call back into the
    /// controller. Returns the number of edges added or changed.
    pub fn set_manage_references(
        &self,
        managers: &[AssetIdentifier],
        clear_existing: bool,
        mut decide: impl FnMut(&ManageContext<'_>) -> ManageDecision,
    ) -> Result<usize, RegistryError> {
        if !self.is_designated_thread() {
            return Err(RegistryError::WrongThread {
                operation: "set_manage_references",
            });
        }
        let added = self.mutate(|state, ctx| {
            let mut changed: BTreeSet<AssetIdentifier> = BTreeSet::new();
            if clear_existing {
                let sources: BTreeSet<AssetIdentifier> = state
                    .store
                    .edges()
                    .into_iter()
                    .filter(|(_, _, category, _)| *category == DependencyCategory::Manage)
                    .map(|(source, ..)| source)
                    .collect();
                for source in sources {
                    state
                        .store
                        .set_package_dependencies(&source, CategoryMask::MANAGE, Vec::new());
                    changed.insert(source);
                }
            }

            let mut added = 0usize;
            let content = DependencyQuery::category(DependencyCategory::Content);
            for manager in managers {
                let mut visited: HashSet<AssetIdentifier> = HashSet::from([manager.clone()]);
                let mut queue = VecDeque::from([manager.clone()]);
                while let Some(source) = queue.pop_front() {
                    for (target, _, properties) in state.store.dependencies(&source, &content) {
                        if !visited.insert(target.clone()) {
                            continue;
                        }
                        let direct = source == *manager;
                        let decision = decide(&ManageContext {
                            manager,
                            source: &source,
                            target: &target,
                            properties,
                            direct,
                        });
                        if decision == ManageDecision::Skip {
                            continue;
                        }
                        let flags = if direct {
                            DependencyProperties::DIRECT
                        } else {
                            DependencyProperties::empty()
                        };
                        if state
                            .store
                            .add_dependency(manager, &target, DependencyCategory::Manage, flags)
                        {
                            added += 1;
                            changed.insert(manager.clone());
                        }
                        if decision == ManageDecision::SetAndRecurse {
                            queue.push_back(target);
                        }
                    }
                }
            }
            for id in changed {
                ctx.push(RegistryEvent::DependenciesChanged(id));
            }
            added
        });
        debug!(managers = managers.len(), added, "Set manage references");
        Ok(added)
    }

    /// Write a snapshot of the index.
    pub fn save<W: Write>(&self, writer: W, options: &SaveOptions) -> Result<(), SnapshotError> {
        self.state.read_priority().store.save(writer, options)
    }

    /// Replace the index with a snapshot.
    pub fn load<R: Read>(&self, reader: R) -> Result<AppendOutcome, SnapshotError> {
        self.append(reader, AppendMode::Rebuild)
    }

    /// Merge a snapshot into the index.
    pub fn append<R: Read>(&self, reader: R, mode: AppendMode) -> Result<AppendOutcome, SnapshotError> {
        let (other, info) = IndexStore::load(reader)?;
        debug!(saved_at = %info.saved_at, %mode, "Appending snapshot");
        let outcome = self.mutate(|state, ctx| {
            let removed: Vec<AssetRecord> = if mode == AppendMode::Rebuild {
                state
                    .store
                    .records()
                    .filter(|r| other.asset(&r.identifier()).is_none())
                    .cloned()
                    .collect()
            } else {
                Vec::new()
            };
            let sorting = !state.initial_search_in_progress;
            let outcome = state.store.append(other, mode);
            if mode == AppendMode::Rebuild {
                state.set_sorting(sorting);
            }

            for path in &outcome.paths_removed {
                ctx.push(RegistryEvent::PathRemoved(path.clone()));
            }
            for path in &outcome.paths_added {
                ctx.push(RegistryEvent::PathAdded(path.clone()));
            }
            for record in removed {
                ctx.push(RegistryEvent::AssetRemoved(record));
            }
            for id in &outcome.added {
                if let Some(record) = state.store.asset(id) {
                    ctx.push(RegistryEvent::AssetAdded(record.clone()));
                }
            }
            for id in &outcome.updated {
                if let Some(record) = state.store.asset(id) {
                    ctx.push(RegistryEvent::AssetUpdated(record.clone()));
                }
            }
            state.rebuild_dynamic_types();
            outcome
        });
        if mode == AppendMode::Rebuild {
            self.gatherer.clear_cache();
        }
        if !outcome.removed.is_empty() {
            warn!(removed = outcome.removed.len(), "Snapshot load dropped records");
        }
        Ok(outcome)
    }
}

fn begin_scan(state: &mut RegistryState, ctx: &mut EventContext) {
    state.phase = Phase::Gathering;
    ctx.push(RegistryEvent::ScanStarted);
}

/// Whether a namespace path equals or lies below `root`.
fn is_under(path: &str, root: &str) -> bool {
    let root = root.trim_end_matches('/');
    path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Remove packages under `root` accepted by `select`, skipping packages that
/// hold in-memory records. Returns the number removed.
fn purge_packages(
    state: &mut RegistryState,
    root: &str,
    select: impl Fn(&str) -> bool,
    ctx: &mut EventContext,
) -> usize {
    let candidates: Vec<CompactString> = state
        .store
        .package_names()
        .into_iter()
        .filter(|name| is_under(name, root) && select(name))
        .collect();
    let mut purged = 0;
    for name in candidates {
        let mut in_memory = false;
        state.store.enumerate_by_package(&name, |r| {
            in_memory |= r.flags.contains(AssetFlags::IN_MEMORY);
            !in_memory
        });
        if in_memory {
            continue;
        }
        state.remove_package(&name, ctx);
        purged += 1;
    }
    if purged > 0 {
        debug!(root, purged, "Purged packages");
    }
    purged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_under() {
        assert!(is_under("/Game/Maps/L1", "/Game"));
        assert!(is_under("/Game", "/Game"));
        assert!(is_under("/Game/A", "/"));
        assert!(!is_under("/GameData/A", "/Game"));
    }
}
