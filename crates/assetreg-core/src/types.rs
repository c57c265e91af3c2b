//! Interface to the live type registry that declared asset types resolve against.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use compact_str::CompactString;
use parking_lot::RwLock;

use crate::record::AssetRecord;

/// Outcome of resolving a declared type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeResolution {
    /// Type is known.
    Resolved,
    /// Type exists but is still loading; try again later.
    Loading,
    /// Type is not known.
    Unknown,
}

/// Live type registry consulted by the controller.
///
/// Implementations are shared across threads and must be cheap to query.
pub trait TypeRegistry: Send + Sync {
    /// Counter bumped whenever the set of native types changes.
    fn version(&self) -> u64;

    /// Snapshot of native types as `(type, parent)` pairs.
    fn native_types(&self) -> Vec<(CompactString, Option<CompactString>)>;

    /// Resolve a declared type name.
    fn resolve(&self, type_name: &str) -> TypeResolution;

    /// Whether every subsystem that declares types has finished starting up.
    fn is_startup_complete(&self) -> bool;

    /// Apply type-specific tags to a freshly resolved record.
    fn post_process(&self, _record: &mut AssetRecord) {}
}

/// In-process type registry backed by a versioned map.
///
/// Types can be marked as loading to model subsystems that finish their
/// startup after gathering has begun.
#[derive(Debug, Default)]
pub struct StaticTypeRegistry {
    types: RwLock<HashMap<CompactString, Option<CompactString>>>,
    loading: RwLock<HashSet<CompactString>>,
    version: AtomicU64,
    startup_complete: AtomicBool,
}

impl StaticTypeRegistry {
    /// Create an empty registry whose startup is not yet complete.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the given `(type, parent)` pairs, startup complete.
    pub fn with_types<'a>(types: impl IntoIterator<Item = (&'a str, Option<&'a str>)>) -> Self {
        let registry = Self::new();
        for (name, parent) in types {
            registry.register(name, parent);
        }
        registry.set_startup_complete(true);
        registry
    }

    /// Register or re-parent a native type and bump the version.
    pub fn register(&self, name: &str, parent: Option<&str>) {
        self.types
            .write()
            .insert(name.into(), parent.map(CompactString::from));
        self.loading.write().remove(name);
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark a type as still loading.
    pub fn mark_loading(&self, name: &str) {
        self.loading.write().insert(name.into());
    }

    /// Flag whether startup has finished.
    pub fn set_startup_complete(&self, complete: bool) {
        self.startup_complete.store(complete, Ordering::SeqCst);
    }
}

impl TypeRegistry for StaticTypeRegistry {
    fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn native_types(&self) -> Vec<(CompactString, Option<CompactString>)> {
        self.types
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn resolve(&self, type_name: &str) -> TypeResolution {
        if self.types.read().contains_key(type_name) {
            TypeResolution::Resolved
        } else if self.loading.read().contains(type_name) {
            TypeResolution::Loading
        } else {
            TypeResolution::Unknown
        }
    }

    fn is_startup_complete(&self) -> bool {
        self.startup_complete.load(Ordering::SeqCst)
    }
}
