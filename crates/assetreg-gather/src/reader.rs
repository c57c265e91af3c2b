//! Container readers.
//!
//! A reader turns one container file into a package record, provisional
//! asset records and dependency edges. [`ManifestReader`] handles the JSON
//! manifest format:
//!
//! ```json
//! {
//!   "version": 3,
//!   "chunk_ids": [1],
//!   "assets": [
//!     { "name": "Chair", "type": "StaticMesh", "tags": { "Vertices": 512 } }
//!   ],
//!   "dependencies": [
//!     { "target": "/Game/Materials/Wood", "category": "content", "properties": ["hard", "game"] }
//!   ]
//! }
//! ```
//!
//! A manifest without an `assets` array has no embedded metadata and is
//! reported as needing a full load.

use std::path::{Path, PathBuf};

use compact_str::CompactString;
use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use assetreg_core::{
    AssetIdentifier, AssetRecord, ContentHash, DependencyCategory, DependencyProperties,
    PackageRecord, TagValue,
};

use crate::batch::{GatheredContainer, GatheredEdge};

/// Errors from reading a single container.
#[derive(Debug, Error)]
pub enum ReadError {
    /// File could not be read.
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File content is not a valid container.
    #[error("Malformed container {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}

impl ReadError {
    fn malformed(path: &Path, message: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// What a reader produced for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Embedded metadata was found.
    Gathered(GatheredContainer),
    /// No embedded metadata; the container must be loaded to be indexed.
    NeedsLoad,
}

/// Parses container files.
pub trait ContainerReader: Send + Sync {
    /// Read the container at `local`, whose namespace name is `package_name`.
    fn read(&self, local: &Path, package_name: &str) -> Result<ReadOutcome, ReadError>;
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    chunk_ids: Vec<u32>,
    #[serde(default)]
    locale: Option<CompactString>,
    assets: Option<Vec<ManifestAsset>>,
    #[serde(default)]
    dependencies: Vec<ManifestEdge>,
}

#[derive(Debug, Deserialize)]
struct ManifestAsset {
    name: CompactString,
    #[serde(rename = "type")]
    asset_type: CompactString,
    #[serde(default)]
    tags: IndexMap<CompactString, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ManifestEdge {
    target: String,
    #[serde(default = "default_category")]
    category: String,
    #[serde(default)]
    properties: Vec<String>,
}

fn default_category() -> String {
    "content".to_string()
}

fn tag_value(value: serde_json::Value) -> TagValue {
    match value {
        serde_json::Value::String(s) => TagValue::Text(s),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => TagValue::Number(i),
            None => TagValue::Text(n.to_string()),
        },
        serde_json::Value::Array(items) => {
            let bytes: Option<Vec<u8>> = items
                .iter()
                .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect();
            match bytes {
                Some(bytes) => TagValue::Blob(bytes),
                None => TagValue::Text(serde_json::Value::Array(items).to_string()),
            }
        }
        other => TagValue::Text(other.to_string()),
    }
}

/// Reader for JSON manifest containers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestReader;

impl ManifestReader {
    pub fn new() -> Self {
        Self
    }

    /// Parse manifest bytes already read from `local`.
    pub fn parse(
        &self,
        local: &Path,
        package_name: &str,
        bytes: &[u8],
    ) -> Result<ReadOutcome, ReadError> {
        let manifest: Manifest =
            serde_json::from_slice(bytes).map_err(|e| ReadError::malformed(local, e.to_string()))?;
        let Some(assets) = manifest.assets else {
            return Ok(ReadOutcome::NeedsLoad);
        };

        let mut package = PackageRecord::new(package_name);
        package.hash = ContentHash::new(*blake3::hash(bytes).as_bytes());
        package.version = manifest.version;
        package.size = bytes.len() as u64;
        package.chunk_ids = manifest.chunk_ids;
        package.locale = manifest.locale;
        package.source = Some(local.to_path_buf());

        let mut records = Vec::with_capacity(assets.len());
        for asset in assets {
            if asset.name.is_empty() || asset.name.contains(['/', '.']) {
                return Err(ReadError::malformed(
                    local,
                    format!("invalid object name {:?}", asset.name),
                ));
            }
            let mut record = AssetRecord::new(package_name, asset.name, asset.asset_type);
            for (key, value) in asset.tags {
                record.tags.insert(key, tag_value(value));
            }
            records.push(record);
        }

        let mut dependencies = Vec::with_capacity(manifest.dependencies.len());
        for edge in manifest.dependencies {
            let target = AssetIdentifier::parse(&edge.target).ok_or_else(|| {
                ReadError::malformed(local, format!("invalid dependency target {:?}", edge.target))
            })?;
            let category: DependencyCategory = edge.category.parse().map_err(|_| {
                ReadError::malformed(local, format!("unknown category {:?}", edge.category))
            })?;
            let properties =
                DependencyProperties::from_names(edge.properties.iter().map(String::as_str))
                    .map_err(|name| {
                        ReadError::malformed(local, format!("unknown property {name:?}"))
                    })?;
            dependencies.push(GatheredEdge {
                target,
                category,
                properties,
            });
        }

        Ok(ReadOutcome::Gathered(GatheredContainer {
            package,
            assets: records,
            dependencies,
        }))
    }
}

impl ContainerReader for ManifestReader {
    fn read(&self, local: &Path, package_name: &str) -> Result<ReadOutcome, ReadError> {
        let bytes = std::fs::read(local).map_err(|source| ReadError::Io {
            path: local.to_path_buf(),
            source,
        })?;
        self.parse(local, package_name, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<ReadOutcome, ReadError> {
        ManifestReader::new().parse(Path::new("/data/Chair.asset"), "/Game/Chair", json.as_bytes())
    }

    #[test]
    fn test_parse_manifest() {
        let json = r#"{
            "version": 2,
            "chunk_ids": [4],
            "assets": [
                { "name": "Chair", "type": "StaticMesh",
                  "tags": { "Vertices": 512, "Material": "Wood", "Guid": [1, 255] } }
            ],
            "dependencies": [
                { "target": "/Game/Wood", "properties": ["hard", "game"] },
                { "target": "/Game/Wood::Grain", "category": "searchable_name" }
            ]
        }"#;
        let ReadOutcome::Gathered(container) = parse(json).unwrap() else {
            panic!("expected embedded metadata");
        };

        assert_eq!(container.package.version, 2);
        assert_eq!(container.package.chunk_ids, vec![4]);
        assert_eq!(container.package.size, json.len() as u64);
        assert_ne!(container.package.hash, ContentHash::default());

        let record = &container.assets[0];
        assert_eq!(record.identifier(), AssetIdentifier::object("/Game/Chair", "Chair"));
        assert_eq!(record.tag("Vertices"), Some(&TagValue::Number(512)));
        assert_eq!(record.tag("Guid"), Some(&TagValue::Blob(vec![1, 255])));
        let keys: Vec<_> = record.tags.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["Vertices", "Material", "Guid"]);

        assert_eq!(container.dependencies.len(), 2);
        assert_eq!(container.dependencies[0].category, DependencyCategory::Content);
        assert_eq!(
            container.dependencies[0].properties,
            DependencyProperties::HARD | DependencyProperties::GAME
        );
        assert_eq!(
            container.dependencies[1].target,
            AssetIdentifier::value("/Game/Wood", "Grain")
        );
    }

    #[test]
    fn test_no_assets_needs_load() {
        assert_eq!(parse(r#"{ "version": 1 }"#).unwrap(), ReadOutcome::NeedsLoad);
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(parse("not json"), Err(ReadError::Malformed { .. })));
        let bad_target = r#"{ "assets": [], "dependencies": [ { "target": "Wood" } ] }"#;
        assert!(matches!(parse(bad_target), Err(ReadError::Malformed { .. })));
        let bad_prop = r#"{ "assets": [], "dependencies": [ { "target": "/Game/W", "properties": ["sticky"] } ] }"#;
        assert!(matches!(parse(bad_prop), Err(ReadError::Malformed { .. })));
    }
}
