//! Core types and traits for assetreg.
//!
//! This crate provides the fundamental data structures shared by the index,
//! gatherer and registry crates: identifiers, records, dependency edge
//! metadata, filters, configuration and the type-registry seam.

mod config;
mod dependency;
mod error;
mod filter;
mod ident;
mod record;
mod types;

pub use config::{
    GatherConfig, GatherConfigBuilder, MountPoint, RegistryConfig, RegistryConfigBuilder,
};
pub use dependency::{CategoryMask, DependencyCategory, DependencyProperties, DependencyQuery};
pub use error::{GatherWarning, RegistryError, WarningKind};
pub use filter::{AssetFilter, TagPredicate};
pub use ident::{AssetIdentifier, normalize_path, parent_path};
pub use record::{AssetFlags, AssetRecord, ContentHash, PackageRecord, TagMap, TagValue};
pub use types::{StaticTypeRegistry, TypeRegistry, TypeResolution};
