//! Background discovery and gathering of container files.
//!
//! Worker threads pull directory and file units from a shared queue under a
//! mutex. Directory units list one directory and enqueue what they find;
//! file units parse up to `files_per_unit` containers in parallel with rayon.
//! Results accumulate until the registry drains them with
//! [`Gatherer::get_and_trim_results`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use compact_str::CompactString;
use jwalk::{Parallelism, WalkDir};
use parking_lot::{Condvar, Mutex, RwLock};
use rayon::prelude::*;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use assetreg_core::{GatherConfig, GatherWarning, MountPoint, RegistryError, WarningKind};

use crate::batch::{GatheredContainer, ResultBatch};
use crate::cache::GatherCache;
use crate::mount::MountTable;
use crate::progress::GatherProgress;
use crate::reader::{ContainerReader, ManifestReader, ReadError, ReadOutcome};

/// Per-request gather options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatherFlags {
    /// Re-read containers even if the gather cache has them.
    pub force_rescan: bool,
    /// Gather paths that match the deny list.
    pub ignore_deny_list: bool,
}

#[derive(Debug, Clone)]
struct DirTask {
    local: PathBuf,
    depth: u32,
    flags: GatherFlags,
}

#[derive(Debug, Clone)]
struct FileTask {
    local: PathBuf,
    package: CompactString,
    flags: GatherFlags,
}

enum Job {
    Dir(DirTask),
    Files(Vec<FileTask>),
}

enum FileResult {
    Gathered(Box<GatheredContainer>),
    NeedsLoad(CompactString, PathBuf),
    Unchanged,
    Failed(GatherWarning),
}

#[derive(Default)]
struct WorkState {
    dirs: VecDeque<DirTask>,
    files: VecDeque<FileTask>,
    results: ResultBatch,
    in_flight: usize,
    /// Directory units since the queue was last empty.
    iterations: usize,
    priority: Vec<PathBuf>,
    progress: GatherProgress,
}

impl WorkState {
    fn is_idle(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty() && self.in_flight == 0
    }

    fn is_prioritized(&self, local: &Path) -> bool {
        self.priority.iter().any(|p| local.starts_with(p))
    }

    fn push_dir(&mut self, task: DirTask) {
        if self.is_prioritized(&task.local) {
            self.dirs.push_front(task);
        } else {
            self.dirs.push_back(task);
        }
    }

    fn push_file(&mut self, task: FileTask) {
        self.progress.files_discovered += 1;
        if self.is_prioritized(&task.local) {
            self.files.push_front(task);
        } else {
            self.files.push_back(task);
        }
    }

    fn next_job(&mut self, files_per_unit: usize, max_iterations: usize) -> Option<Job> {
        let front_prioritized = self
            .files
            .front()
            .is_some_and(|f| self.is_prioritized(&f.local));
        if !self.files.is_empty()
            && (front_prioritized || self.files.len() >= files_per_unit || self.dirs.is_empty())
        {
            let count = files_per_unit.min(self.files.len());
            return Some(Job::Files(self.files.drain(..count).collect()));
        }

        let task = self.dirs.pop_front()?;
        self.iterations += 1;
        if self.iterations > max_iterations {
            error!(
                path = %task.local.display(),
                limit = max_iterations,
                "Discovery exceeded iteration cap, aborting"
            );
            self.results.warnings.push(GatherWarning::new(
                &task.local,
                format!("discovery aborted after {max_iterations} directories"),
                WarningKind::IterationLimit,
            ));
            self.progress.errors_count += 1;
            self.dirs.clear();
            return None;
        }
        Some(Job::Dir(task))
    }

    fn snapshot(&self, started_at: Instant) -> GatherProgress {
        GatherProgress {
            pending: (self.dirs.len() + self.files.len()) as u64,
            elapsed: started_at.elapsed(),
            ..self.progress.clone()
        }
    }
}

struct Shared {
    config: GatherConfig,
    mounts: RwLock<MountTable>,
    reader: Arc<dyn ContainerReader>,
    cache: GatherCache,
    state: Mutex<WorkState>,
    work_ready: Condvar,
    idle: Condvar,
    stop: AtomicBool,
    running: AtomicBool,
    pause_count: AtomicUsize,
    progress_tx: broadcast::Sender<GatherProgress>,
    started_at: Instant,
}

/// Discovers container files under mount points and parses them.
pub struct Gatherer {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Gatherer {
    /// Create a gatherer that reads JSON manifests.
    pub fn new(config: GatherConfig) -> Result<Self, RegistryError> {
        Self::with_reader(config, Arc::new(ManifestReader::new()))
    }

    /// Create a gatherer with a custom container reader.
    ///
    /// Mount points from the config that cannot be used are skipped with a
    /// warning.
    pub fn with_reader(
        config: GatherConfig,
        reader: Arc<dyn ContainerReader>,
    ) -> Result<Self, RegistryError> {
        config.check()?;
        let mut mounts = MountTable::new(&config.deny_patterns)?;
        for mount in &config.mount_points {
            if let Err(e) = mounts.add(&mount.local_path, &mount.namespace) {
                warn!(error = %e, "Skipping mount point");
            }
        }
        let (progress_tx, _) = broadcast::channel(100);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                mounts: RwLock::new(mounts),
                reader,
                cache: GatherCache::new(),
                state: Mutex::new(WorkState::default()),
                work_ready: Condvar::new(),
                idle: Condvar::new(),
                stop: AtomicBool::new(false),
                running: AtomicBool::new(false),
                pause_count: AtomicUsize::new(0),
                progress_tx,
                started_at: Instant::now(),
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<GatherProgress> {
        self.shared.progress_tx.subscribe()
    }

    /// Register a mount point. Returns `false` if it was already mounted.
    pub fn add_mount_point(&self, local: &Path, namespace: &str) -> Result<bool, RegistryError> {
        let added = self.shared.mounts.write().add(local, namespace)?;
        if added {
            info!(local = %local.display(), namespace, "Mounted");
        }
        Ok(added)
    }

    /// Unregister a mount point and drop queued work and undelivered results
    /// beneath it.
    pub fn remove_mount_point(&self, local: &Path) -> Option<MountPoint> {
        let removed = self.shared.mounts.write().remove(local)?;
        let root = &removed.local_path;
        let dropped = {
            let mounts = self.shared.mounts.read();
            let mut state = self.shared.state.lock();
            state.dirs.retain(|t| !t.local.starts_with(root));
            state.files.retain(|t| !t.local.starts_with(root));
            state
                .results
                .retain_namespaces(|ns| mounts.to_local(ns).is_some())
        };
        self.shared.cache.invalidate_prefix(root);
        info!(local = %root.display(), dropped, "Unmounted");
        Some(removed)
    }

    /// Forget the cache stamp of one container so it is read again.
    pub fn invalidate_cached(&self, local: &Path) {
        self.shared.cache.invalidate(local);
    }

    /// Forget every cache stamp.
    pub fn clear_cache(&self) {
        self.shared.cache.clear();
    }

    /// Registered mount points.
    pub fn mount_points(&self) -> Vec<MountPoint> {
        self.shared.mounts.read().mounts().to_vec()
    }

    /// Namespace path for a local path under a mount point.
    pub fn to_namespace(&self, local: &Path) -> Option<CompactString> {
        self.shared.mounts.read().to_namespace(local)
    }

    /// Local directory for a namespace path.
    pub fn to_local(&self, namespace: &str) -> Option<PathBuf> {
        self.shared.mounts.read().to_local(namespace)
    }

    /// Whether a namespace path is on the deny list.
    pub fn is_on_deny_list(&self, namespace: &str) -> bool {
        self.shared.mounts.read().is_denied(namespace)
    }

    /// Spawn worker threads and queue every mount root.
    pub fn start(&self) -> Result<(), RegistryError> {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Ok(());
        }
        self.shared.stop.store(false, Ordering::SeqCst);

        let roots: Vec<PathBuf> = self
            .mount_points()
            .into_iter()
            .map(|m| m.local_path)
            .collect();
        self.queue_paths(&roots, GatherFlags::default())?;

        let count = self.shared.config.effective_workers();
        for i in 0..count {
            let shared = Arc::clone(&self.shared);
            let handle = std::thread::Builder::new()
                .name(format!("assetreg-gather-{i}"))
                .spawn(move || worker_loop(shared))
                .map_err(|e| RegistryError::io("<gather worker>", e))?;
            workers.push(handle);
        }
        self.shared.running.store(true, Ordering::SeqCst);
        info!(workers = count, mounts = roots.len(), "Gatherer started");
        Ok(())
    }

    /// Whether worker threads are running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Signal workers to exit at their next checkpoint and join them.
    ///
    /// Results already produced stay available.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        {
            let _state = self.shared.state.lock();
            self.shared.work_ready.notify_all();
            self.shared.idle.notify_all();
        }
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("Gather worker panicked");
            }
        }
        if self.shared.running.swap(false, Ordering::SeqCst) {
            info!("Gatherer stopped");
        }
    }

    fn validate(&self, paths: &[PathBuf]) -> Result<(), RegistryError> {
        let mounts = self.shared.mounts.read();
        for path in paths {
            if !mounts.is_mounted(path) {
                return Err(RegistryError::NotMounted { path: path.clone() });
            }
            if !path.exists() {
                return Err(RegistryError::io(
                    path,
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ));
            }
        }
        Ok(())
    }

    /// Queue directories or container files for background gathering.
    ///
    /// Every path is validated before anything is queued.
    pub fn queue_paths(&self, paths: &[PathBuf], flags: GatherFlags) -> Result<(), RegistryError> {
        self.validate(paths)?;
        let mounts = self.shared.mounts.read();
        let mut state = self.shared.state.lock();
        for path in paths {
            if flags.force_rescan {
                self.shared.cache.invalidate_prefix(path);
            }
            if path.is_dir() {
                state.push_dir(DirTask {
                    local: path.clone(),
                    depth: 0,
                    flags,
                });
            } else if let Some(package) = mounts.to_namespace(path) {
                state.push_file(FileTask {
                    local: path.clone(),
                    package,
                    flags,
                });
            }
        }
        self.shared.work_ready.notify_all();
        debug!(count = paths.len(), "Queued paths");
        Ok(())
    }

    /// Move queued work under `local` to the front of the queue.
    pub fn prioritize(&self, local: &Path) {
        let mut state = self.shared.state.lock();
        let local = local.to_path_buf();
        let (mut dirs, rest): (VecDeque<_>, VecDeque<_>) =
            state.dirs.drain(..).partition(|t| t.local.starts_with(&local));
        dirs.extend(rest);
        state.dirs = dirs;
        let (mut files, rest): (VecDeque<_>, VecDeque<_>) =
            state.files.drain(..).partition(|t| t.local.starts_with(&local));
        files.extend(rest);
        state.files = files;
        if !state.priority.contains(&local) {
            state.priority.push(local);
        }
    }

    /// Take up to `max` gathered containers plus all pending paths,
    /// needs-load entries and warnings.
    pub fn get_and_trim_results(&self, max: usize) -> ResultBatch {
        let mut state = self.shared.state.lock();
        let batch = state.results.take_front(max);
        state.progress.containers_delivered += batch.containers.len() as u64;
        batch
    }

    /// Number of gathered containers waiting to be taken.
    pub fn pending_results(&self) -> usize {
        self.shared.state.lock().results.containers.len()
    }

    /// Whether the queue is empty and no unit is in flight.
    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().is_idle()
    }

    /// Block until idle. Returns `false` on timeout, or when work is queued
    /// but no worker is running to process it.
    pub fn wait_for_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();
        while !state.is_idle() {
            if !self.is_running() {
                return false;
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                        return state.is_idle();
                    }
                }
                None => self.shared.idle.wait(&mut state),
            }
        }
        true
    }

    /// Suspend processing. Calls nest; each needs a matching resume.
    pub fn pause_processing(&self) {
        self.shared.pause_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Undo one [`pause_processing`](Self::pause_processing).
    pub fn resume_processing(&self) {
        let previous = self
            .shared
            .pause_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous == Ok(1) {
            let _state = self.shared.state.lock();
            self.shared.work_ready.notify_all();
        }
    }

    /// Whether processing is paused.
    pub fn is_paused(&self) -> bool {
        self.shared.pause_count.load(Ordering::SeqCst) > 0
    }

    /// Current progress.
    pub fn progress(&self) -> GatherProgress {
        self.shared.state.lock().snapshot(self.shared.started_at)
    }

    /// Gather `paths` on the calling thread and return the results directly.
    ///
    /// Directories are walked with jwalk; containers are parsed in parallel.
    /// Fails without gathering anything when a path is unmounted, and aborts
    /// when discovery exceeds the configured iteration cap.
    pub fn scan_paths_synchronous(
        &self,
        paths: &[PathBuf],
        flags: GatherFlags,
    ) -> Result<ResultBatch, RegistryError> {
        self.validate(paths)?;
        let config = &self.shared.config;
        let mut batch = ResultBatch::new();
        let mut tasks = Vec::new();
        let mut iterations = 0usize;

        {
            let mounts = self.shared.mounts.read();
            for path in paths {
                if flags.force_rescan {
                    self.shared.cache.invalidate_prefix(path);
                }
                if !path.is_dir() {
                    if let Some(package) = mounts.to_namespace(path) {
                        tasks.push(FileTask {
                            local: path.clone(),
                            package,
                            flags,
                        });
                    }
                    continue;
                }

                let walker = WalkDir::new(path)
                    .parallelism(Parallelism::RayonDefaultPool {
                        busy_timeout: Duration::from_millis(100),
                    })
                    .sort(true)
                    .skip_hidden(false)
                    .max_depth(config.max_depth.map(|d| d as usize + 1).unwrap_or(usize::MAX));

                for entry in walker {
                    iterations += 1;
                    if iterations > config.max_scan_iterations {
                        error!(
                            path = %path.display(),
                            limit = config.max_scan_iterations,
                            "Discovery exceeded iteration cap, aborting"
                        );
                        return Err(RegistryError::IterationLimit {
                            path: path.clone(),
                            limit: config.max_scan_iterations,
                        });
                    }
                    let entry = match entry {
                        Ok(e) => e,
                        Err(err) => {
                            let at = err.path().map(Path::to_path_buf).unwrap_or_default();
                            batch.warnings.push(GatherWarning::new(
                                at,
                                err.to_string(),
                                WarningKind::ReadError,
                            ));
                            continue;
                        }
                    };
                    let local = entry.path();
                    let file_type = entry.file_type();
                    if file_type.is_dir() {
                        if let Some(namespace) = mounts.to_namespace(&local) {
                            if flags.ignore_deny_list || !mounts.is_denied(&namespace) {
                                batch.paths.push(namespace);
                            }
                        }
                    } else if file_type.is_file()
                        && config.is_container_file(&entry.file_name().to_string_lossy())
                    {
                        if let Some(package) = mounts.to_namespace(&local) {
                            if flags.ignore_deny_list || !mounts.is_denied(&package) {
                                tasks.push(FileTask {
                                    local,
                                    package,
                                    flags,
                                });
                            }
                        }
                    }
                }
            }
        }

        let discovered = tasks.len() as u64;
        let results = self.shared.gather_files(tasks);
        let mut state = self.shared.state.lock();
        state.progress.files_discovered += discovered;
        state.progress.dirs_scanned += batch.paths.len() as u64;
        self.shared.apply_file_results(&mut state, &mut batch, results);
        state.progress.containers_delivered += batch.containers.len() as u64;
        Ok(batch)
    }
}

impl Drop for Gatherer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn gather_one(&self, task: &FileTask) -> FileResult {
        let metadata = match std::fs::metadata(&task.local) {
            Ok(m) => m,
            Err(e) => return FileResult::Failed(GatherWarning::read_error(&task.local, &e)),
        };
        if !task.flags.force_rescan
            && self.config.use_gather_cache
            && self.cache.is_unchanged(&task.local, &metadata)
        {
            return FileResult::Unchanged;
        }
        match self.reader.read(&task.local, &task.package) {
            Ok(ReadOutcome::Gathered(container)) => {
                self.cache.record(&task.local, &metadata);
                FileResult::Gathered(Box::new(container))
            }
            Ok(ReadOutcome::NeedsLoad) => {
                FileResult::NeedsLoad(task.package.clone(), task.local.clone())
            }
            Err(err) => {
                warn!(error = %err, "Skipping container");
                match err {
                    ReadError::Io { path, source } => {
                        FileResult::Failed(GatherWarning::read_error(path, &source))
                    }
                    ReadError::Malformed { path, message } => {
                        FileResult::Failed(GatherWarning::malformed(path, message))
                    }
                }
            }
        }
    }

    fn gather_files(&self, tasks: Vec<FileTask>) -> Vec<FileResult> {
        tasks.par_iter().map(|task| self.gather_one(task)).collect()
    }

    fn apply_file_results(
        &self,
        state: &mut WorkState,
        batch: &mut ResultBatch,
        results: Vec<FileResult>,
    ) {
        for result in results {
            match result {
                FileResult::Gathered(container) => {
                    state.progress.containers_gathered += 1;
                    batch.containers.push(*container);
                }
                FileResult::NeedsLoad(package, local) => {
                    state.progress.containers_gathered += 1;
                    batch.needs_load.push((package, local));
                }
                FileResult::Unchanged => state.progress.containers_unchanged += 1,
                FileResult::Failed(warning) => {
                    state.progress.errors_count += 1;
                    batch.warnings.push(warning);
                }
            }
        }
    }

    /// List one directory. Returns discovered subdirectories and files.
    fn read_directory(&self, task: &DirTask, batch: &mut ResultBatch) -> (Vec<DirTask>, Vec<FileTask>) {
        let mounts = self.mounts.read();
        let Some(namespace) = mounts.to_namespace(&task.local) else {
            // Unmounted since it was queued.
            return (Vec::new(), Vec::new());
        };
        if !task.flags.ignore_deny_list && mounts.is_denied(&namespace) {
            debug!(path = %namespace, "Skipping denied directory");
            return (Vec::new(), Vec::new());
        }

        let entries = match std::fs::read_dir(&task.local) {
            Ok(entries) => entries,
            Err(e) => {
                batch.warnings.push(GatherWarning::read_error(&task.local, &e));
                return (Vec::new(), Vec::new());
            }
        };
        batch.paths.push(namespace.clone());

        let mut entries: Vec<_> = entries.filter_map(Result::ok).collect();
        entries.sort_by_key(|e| e.file_name());

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in entries {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if file_type.is_dir() {
                let within_depth = self.config.max_depth.is_none_or(|max| task.depth < max);
                if within_depth {
                    dirs.push(DirTask {
                        local: entry.path(),
                        depth: task.depth + 1,
                        flags: task.flags,
                    });
                }
            } else if file_type.is_file() && self.config.is_container_file(&name) {
                let stem = Path::new(&name)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or(name);
                let mut package = namespace.clone();
                package.push('/');
                package.push_str(&stem);
                if task.flags.ignore_deny_list || !mounts.is_denied(&package) {
                    files.push(FileTask {
                        local: entry.path(),
                        package,
                        flags: task.flags,
                    });
                }
            }
        }
        (dirs, files)
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if shared.stop.load(Ordering::SeqCst) {
                    return;
                }
                if shared.pause_count.load(Ordering::SeqCst) == 0 {
                    let job = state.next_job(
                        shared.config.files_per_unit,
                        shared.config.max_scan_iterations,
                    );
                    if let Some(job) = job {
                        state.in_flight += 1;
                        break job;
                    }
                }
                if state.is_idle() {
                    state.iterations = 0;
                    shared.idle.notify_all();
                }
                shared.work_ready.wait(&mut state);
            }
        };

        let mut batch = ResultBatch::new();
        let mut new_dirs = Vec::new();
        let mut new_files = Vec::new();
        let mut file_results = Vec::new();
        let mut current = PathBuf::new();
        match job {
            Job::Dir(task) => {
                (new_dirs, new_files) = shared.read_directory(&task, &mut batch);
                current = task.local;
            }
            Job::Files(tasks) => {
                if let Some(last) = tasks.last() {
                    current = last.local.clone();
                }
                file_results = shared.gather_files(tasks);
            }
        }

        // Drop output of a mount removed while the unit was in flight.
        {
            let mounts = shared.mounts.read();
            file_results.retain(|r| match r {
                FileResult::Gathered(c) => mounts.to_local(&c.package.package_name).is_some(),
                FileResult::NeedsLoad(package, _) => mounts.to_local(package).is_some(),
                FileResult::Unchanged | FileResult::Failed(_) => true,
            });
            batch.retain_namespaces(|ns| mounts.to_local(ns).is_some());
        }

        let snapshot = {
            let mut state = shared.state.lock();
            state.progress.dirs_scanned += batch.paths.len() as u64;
            state.progress.errors_count += batch.warnings.len() as u64;
            shared.apply_file_results(&mut state, &mut batch, file_results);
            state.results.append(batch);
            for dir in new_dirs {
                state.push_dir(dir);
            }
            for file in new_files {
                state.push_file(file);
            }
            state.in_flight -= 1;
            state.progress.current_path = current;
            shared.work_ready.notify_all();
            if state.is_idle() {
                state.iterations = 0;
                shared.idle.notify_all();
            }
            state.snapshot(shared.started_at)
        };
        // No receivers is fine.
        let _ = shared.progress_tx.send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_container(root: &Path, rel: &str, asset: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            path,
            format!(r#"{{ "assets": [ {{ "name": "{asset}", "type": "Mesh" }} ] }}"#),
        )
        .unwrap();
    }

    fn fixture() -> TempDir {
        let temp = TempDir::new().unwrap();
        write_container(temp.path(), "Props/Chair.asset", "Chair");
        write_container(temp.path(), "Props/Table.asset", "Table");
        write_container(temp.path(), "Maps/L1.asset", "L1");
        fs::write(temp.path().join("Maps/readme.txt"), "ignored").unwrap();
        temp
    }

    fn gatherer(root: &Path) -> Gatherer {
        let config = GatherConfig::builder()
            .mount_points(vec![MountPoint::new(root, "/Game")])
            .worker_threads(2usize)
            .build()
            .unwrap();
        Gatherer::new(config).unwrap()
    }

    #[test]
    fn test_synchronous_scan() {
        let temp = fixture();
        let gatherer = gatherer(temp.path());
        let batch = gatherer
            .scan_paths_synchronous(&[temp.path().to_path_buf()], GatherFlags::default())
            .unwrap();

        let mut names: Vec<_> = batch
            .containers
            .iter()
            .map(|c| c.package.package_name.to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["/Game/Maps/L1", "/Game/Props/Chair", "/Game/Props/Table"]);
        assert!(batch.paths.contains(&CompactString::new("/Game/Props")));
        assert!(batch.warnings.is_empty());
    }

    #[test]
    fn test_cache_skips_unchanged() {
        let temp = fixture();
        let gatherer = gatherer(temp.path());
        let roots = [temp.path().to_path_buf()];

        let first = gatherer.scan_paths_synchronous(&roots, GatherFlags::default()).unwrap();
        assert_eq!(first.containers.len(), 3);
        let second = gatherer.scan_paths_synchronous(&roots, GatherFlags::default()).unwrap();
        assert!(second.containers.is_empty());

        let forced = GatherFlags {
            force_rescan: true,
            ..GatherFlags::default()
        };
        let third = gatherer.scan_paths_synchronous(&roots, forced).unwrap();
        assert_eq!(third.containers.len(), 3);
    }

    #[test]
    fn test_unmounted_path_rejected() {
        let temp = fixture();
        let other = TempDir::new().unwrap();
        let gatherer = gatherer(temp.path());

        let err = gatherer
            .scan_paths_synchronous(&[other.path().to_path_buf()], GatherFlags::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotMounted { .. }));
    }

    #[test]
    fn test_background_gather() {
        let temp = fixture();
        let gatherer = gatherer(temp.path());
        gatherer.start().unwrap();
        assert!(gatherer.wait_for_idle(Some(Duration::from_secs(10))));

        let batch = gatherer.get_and_trim_results(2);
        assert_eq!(batch.containers.len(), 2);
        assert!(!batch.paths.is_empty());
        let rest = gatherer.get_and_trim_results(100);
        assert_eq!(rest.containers.len(), 1);
        assert!(rest.paths.is_empty());

        let progress = gatherer.progress();
        assert_eq!(progress.containers_delivered, 3);
        assert_eq!(progress.pending, 0);
        gatherer.stop();
        assert!(!gatherer.is_running());
    }

    #[test]
    fn test_unmount_drops_undelivered_results() {
        let temp = fixture();
        let plugin = TempDir::new().unwrap();
        write_container(plugin.path(), "A.asset", "A");
        let gatherer = gatherer(temp.path());
        gatherer.add_mount_point(plugin.path(), "/Plugin").unwrap();
        gatherer.start().unwrap();
        assert!(gatherer.wait_for_idle(Some(Duration::from_secs(10))));
        assert_eq!(gatherer.pending_results(), 4);

        assert!(gatherer.remove_mount_point(plugin.path()).is_some());
        let batch = gatherer.get_and_trim_results(100);
        assert_eq!(batch.containers.len(), 3);
        assert!(batch.containers.iter().all(|c| c.package.package_name.starts_with("/Game/")));
        assert!(batch.paths.iter().all(|p| !p.starts_with("/Plugin")));
        gatherer.stop();
    }

    #[test]
    fn test_invalidate_cached_rereads_container() {
        let temp = fixture();
        let gatherer = gatherer(temp.path());
        let roots = [temp.path().to_path_buf()];
        let first = gatherer.scan_paths_synchronous(&roots, GatherFlags::default()).unwrap();
        let chair = first
            .containers
            .iter()
            .find(|c| c.package.package_name == "/Game/Props/Chair")
            .and_then(|c| c.package.source.clone())
            .unwrap();

        gatherer.invalidate_cached(&chair);
        let second = gatherer.scan_paths_synchronous(&roots, GatherFlags::default()).unwrap();
        assert_eq!(second.containers.len(), 1);
        assert_eq!(second.containers[0].package.package_name, "/Game/Props/Chair");

        gatherer.clear_cache();
        let third = gatherer.scan_paths_synchronous(&roots, GatherFlags::default()).unwrap();
        assert_eq!(third.containers.len(), 3);
    }

    #[test]
    fn test_pause_nesting() {
        let temp = fixture();
        let gatherer = gatherer(temp.path());
        gatherer.pause_processing();
        gatherer.pause_processing();
        gatherer.start().unwrap();

        assert!(!gatherer.wait_for_idle(Some(Duration::from_millis(50))));
        gatherer.resume_processing();
        assert!(gatherer.is_paused());
        gatherer.resume_processing();
        assert!(!gatherer.is_paused());
        assert!(gatherer.wait_for_idle(Some(Duration::from_secs(10))));
        assert_eq!(gatherer.pending_results(), 3);
    }

    #[test]
    fn test_deny_list_skips_directory() {
        let temp = fixture();
        let config = GatherConfig::builder()
            .mount_points(vec![MountPoint::new(temp.path(), "/Game")])
            .deny_patterns(vec!["/Game/Maps/**".to_string()])
            .build()
            .unwrap();
        let gatherer = Gatherer::new(config).unwrap();
        assert!(gatherer.is_on_deny_list("/Game/Maps/L1"));

        let batch = gatherer
            .scan_paths_synchronous(&[temp.path().to_path_buf()], GatherFlags::default())
            .unwrap();
        assert_eq!(batch.containers.len(), 2);

        let all = GatherFlags {
            ignore_deny_list: true,
            force_rescan: true,
        };
        let batch = gatherer
            .scan_paths_synchronous(&[temp.path().to_path_buf()], all)
            .unwrap();
        assert_eq!(batch.containers.len(), 3);
    }

    #[test]
    fn test_iteration_cap() {
        let temp = fixture();
        let config = GatherConfig::builder()
            .mount_points(vec![MountPoint::new(temp.path(), "/Game")])
            .max_scan_iterations(2usize)
            .build()
            .unwrap();
        let gatherer = Gatherer::new(config).unwrap();
        let err = gatherer
            .scan_paths_synchronous(&[temp.path().to_path_buf()], GatherFlags::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::IterationLimit { limit: 2, .. }));
    }
}
