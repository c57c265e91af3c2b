//! Asset and package records.

use std::fmt;
use std::path::PathBuf;

use bitflags::bitflags;
use compact_str::CompactString;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ident::{AssetIdentifier, parent_path};

/// Value stored under a tag name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagValue {
    /// Free-form text.
    Text(String),
    /// Integral number.
    Number(i64),
    /// Opaque bytes.
    Blob(Vec<u8>),
}

impl TagValue {
    /// Text form used for predicate comparisons.
    ///
    /// Blobs compare by their lowercase hex encoding.
    pub fn as_text(&self) -> String {
        match self {
            TagValue::Text(s) => s.clone(),
            TagValue::Number(n) => n.to_string(),
            TagValue::Blob(bytes) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
        }
    }

    /// Borrow the text if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Text(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Text(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Number(value)
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// Tag storage: insertion-ordered name → value map.
pub type TagMap = IndexMap<CompactString, TagValue>;

bitflags! {
    /// Per-record state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AssetFlags: u32 {
        /// Record came from a disk scan and has no in-memory counterpart.
        const ON_DISK_ONLY    = 0x0001;
        /// Declared type never resolved; type-specific tags were not applied.
        const TYPE_UNRESOLVED = 0x0002;
        /// Record was last written by an in-memory producer.
        const IN_MEMORY       = 0x0004;
    }
}

/// Metadata for one asset inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Container path in namespace form.
    pub package_name: CompactString,
    /// Object name inside the container.
    pub object_name: CompactString,
    /// Declared type name.
    pub asset_type: CompactString,
    /// Tag values.
    #[serde(default)]
    pub tags: TagMap,
    /// State bits.
    #[serde(default)]
    pub flags: AssetFlags,
}

impl AssetRecord {
    /// Create a record with no tags.
    pub fn new(
        package_name: impl Into<CompactString>,
        object_name: impl Into<CompactString>,
        asset_type: impl Into<CompactString>,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            object_name: object_name.into(),
            asset_type: asset_type.into(),
            tags: TagMap::new(),
            flags: AssetFlags::empty(),
        }
    }

    /// Builder-style tag insertion.
    pub fn with_tag(mut self, key: impl Into<CompactString>, value: impl Into<TagValue>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Identifier of this asset.
    pub fn identifier(&self) -> AssetIdentifier {
        AssetIdentifier::object(self.package_name.clone(), self.object_name.clone())
    }

    /// Directory holding this asset's container.
    pub fn package_path(&self) -> &str {
        parent_path(&self.package_name).unwrap_or("/")
    }

    /// Look up a tag.
    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(key)
    }

    /// Merge tags from `old` that this record does not carry.
    ///
    /// Returns the number of tags carried over.
    pub fn merge_missing_tags(&mut self, old: &AssetRecord) -> usize {
        let mut carried = 0;
        for (key, value) in &old.tags {
            if !self.tags.contains_key(key) {
                self.tags.insert(key.clone(), value.clone());
                carried += 1;
            }
        }
        carried
    }
}

/// BLAKE3 content hash of a container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the hash as a hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Per-container metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Container path in namespace form.
    pub package_name: CompactString,
    /// Content hash of the container file.
    pub hash: ContentHash,
    /// Container format version reported by the reader.
    pub version: u32,
    /// File size in bytes.
    pub size: u64,
    /// Chunk ids the container is assigned to.
    #[serde(default)]
    pub chunk_ids: Vec<u32>,
    /// Locale of a localized container.
    #[serde(default)]
    pub locale: Option<CompactString>,
    /// Local file the record was gathered from.
    #[serde(default)]
    pub source: Option<PathBuf>,
}

impl PackageRecord {
    /// Create an empty record for a container.
    pub fn new(package_name: impl Into<CompactString>) -> Self {
        Self {
            package_name: package_name.into(),
            hash: ContentHash::default(),
            version: 0,
            size: 0,
            chunk_ids: Vec::new(),
            locale: None,
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_from_record() {
        let record = AssetRecord::new("/Game/Maps/Level1", "Level1", "World");
        assert_eq!(
            record.identifier(),
            AssetIdentifier::object("/Game/Maps/Level1", "Level1")
        );
        assert_eq!(record.package_path(), "/Game/Maps");
    }

    #[test]
    fn test_merge_missing_tags() {
        let old = AssetRecord::new("/Game/A", "A", "Mesh")
            .with_tag("Triangles", 120i64)
            .with_tag("Lod", "high");
        let mut new = AssetRecord::new("/Game/A", "A", "Mesh").with_tag("Lod", "low");

        assert_eq!(new.merge_missing_tags(&old), 1);
        assert_eq!(new.tag("Lod"), Some(&TagValue::from("low")));
        assert_eq!(new.tag("Triangles"), Some(&TagValue::Number(120)));
    }

    #[test]
    fn test_tag_value_text() {
        assert_eq!(TagValue::Number(-4).as_text(), "-4");
        assert_eq!(TagValue::Blob(vec![0xab, 0x01]).as_text(), "ab01");
        assert_eq!(TagValue::from("x").as_str(), Some("x"));
    }
}
