use assetreg_core::{GatherConfig, MountPoint, WarningKind};
use assetreg_gather::{
    ContainerReader, GatherFlags, Gatherer, ReadError, ReadOutcome, ResultBatch,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn config(root: &Path) -> GatherConfig {
    GatherConfig::builder()
        .mount_points(vec![MountPoint::new(root, "/Game")])
        .worker_threads(2usize)
        .files_per_unit(2usize)
        .build()
        .unwrap()
}

fn drain(gatherer: &Gatherer) -> ResultBatch {
    assert!(gatherer.wait_for_idle(Some(Duration::from_secs(10))));
    gatherer.get_and_trim_results(usize::MAX)
}

#[test]
fn test_malformed_and_needs_load_reported() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "Good.asset", r#"{ "assets": [ { "name": "Good", "type": "Mesh" } ] }"#);
    write(temp.path(), "Bad.asset", "{ not json");
    write(temp.path(), "Cooked.asset", r#"{ "version": 7 }"#);

    let gatherer = Gatherer::new(config(temp.path())).unwrap();
    gatherer.start().unwrap();
    let batch = drain(&gatherer);

    assert_eq!(batch.containers.len(), 1);
    assert_eq!(batch.needs_load.len(), 1);
    assert_eq!(batch.needs_load[0].0, "/Game/Cooked");
    assert_eq!(batch.warnings.len(), 1);
    assert_eq!(batch.warnings[0].kind, WarningKind::Malformed);
    assert_eq!(gatherer.progress().errors_count, 1);
}

#[test]
fn test_queue_after_start_and_max_depth() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "A.asset", r#"{ "assets": [] }"#);
    write(temp.path(), "Deep/B.asset", r#"{ "assets": [] }"#);
    write(temp.path(), "Deep/Deeper/C.asset", r#"{ "assets": [] }"#);

    let mut cfg = config(temp.path());
    cfg.max_depth = Some(1);
    let gatherer = Gatherer::new(cfg).unwrap();
    gatherer.start().unwrap();
    let batch = drain(&gatherer);
    assert_eq!(batch.containers.len(), 2);

    let deeper = temp.path().join("Deep/Deeper");
    gatherer
        .queue_paths(&[deeper], GatherFlags::default())
        .unwrap();
    let batch = drain(&gatherer);
    assert_eq!(batch.containers.len(), 1);
    assert_eq!(batch.containers[0].package.package_name, "/Game/Deep/Deeper/C");
}

#[test]
fn test_progress_broadcast() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "A.asset", r#"{ "assets": [] }"#);

    let gatherer = Gatherer::new(config(temp.path())).unwrap();
    let mut rx = gatherer.subscribe();
    gatherer.start().unwrap();
    drain(&gatherer);

    // Workers send concurrently, so updates may arrive out of order.
    let mut updates = Vec::new();
    while let Ok(progress) = rx.try_recv() {
        updates.push(progress);
    }
    assert!(!updates.is_empty());
    assert_eq!(updates.iter().map(|p| p.files_discovered).max(), Some(1));
    assert_eq!(updates.iter().map(|p| p.containers_gathered).max(), Some(1));
}

struct CountingReader {
    reads: AtomicUsize,
}

impl ContainerReader for CountingReader {
    fn read(&self, local: &Path, _package_name: &str) -> Result<ReadOutcome, ReadError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Err(ReadError::Io {
            path: local.to_path_buf(),
            source: std::io::Error::other("unreadable"),
        })
    }
}

#[test]
fn test_custom_reader_failures_not_cached() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "A.asset", "{}");

    let reader = Arc::new(CountingReader {
        reads: AtomicUsize::new(0),
    });
    let gatherer = Gatherer::with_reader(config(temp.path()), reader.clone()).unwrap();
    let roots = [temp.path().to_path_buf()];

    let batch = gatherer.scan_paths_synchronous(&roots, GatherFlags::default()).unwrap();
    assert_eq!(batch.warnings[0].kind, WarningKind::ReadError);
    gatherer.scan_paths_synchronous(&roots, GatherFlags::default()).unwrap();
    assert_eq!(reader.reads.load(Ordering::SeqCst), 2);
}

#[test]
fn test_remove_mount_point_drops_work() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "A.asset", r#"{ "assets": [] }"#);

    let gatherer = Gatherer::new(config(temp.path())).unwrap();
    gatherer.pause_processing();
    gatherer.start().unwrap();
    assert!(gatherer.remove_mount_point(temp.path()).is_some());
    gatherer.resume_processing();

    let batch = drain(&gatherer);
    assert!(batch.containers.is_empty());
    assert!(gatherer.mount_points().is_empty());
}
