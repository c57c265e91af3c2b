//! In-memory asset index for assetreg.
//!
//! The [`IndexStore`] owns every record, package record, directory path and
//! dependency edge. It is not synchronized; the registry crate wraps it in
//! its interface lock.

pub mod filter;
pub mod graph;
pub mod hierarchy;
pub mod path_tree;
pub mod snapshot;
pub mod store;

pub use filter::CompiledFilter;
pub use graph::{DependencyGraph, DependencyNode, Edge, EdgeTuple, NodeId};
pub use hierarchy::{MAX_INHERITANCE_DEPTH, TypeHierarchy};
pub use path_tree::PathTree;
pub use snapshot::{
    AppendMode, AppendOutcome, SNAPSHOT_MAGIC, SNAPSHOT_VERSION, SaveOptions, SnapshotError,
    SnapshotInfo,
};
pub use store::{Dependency, IndexStore};
