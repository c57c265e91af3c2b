//! Caller-facing asset filters.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::ident::normalize_path;

/// Tag condition: the tag exists, optionally with a given value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPredicate {
    /// Tag name.
    pub key: CompactString,
    /// Required text form of the value, if any.
    pub value: Option<String>,
}

impl TagPredicate {
    /// The tag must exist.
    pub fn exists(key: impl Into<CompactString>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    /// The tag must exist with this value.
    pub fn equals(key: impl Into<CompactString>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

/// Filter over registry records.
///
/// Each non-empty set narrows the result; sets are OR'ed internally and
/// AND'ed with each other. An entirely empty filter is a caller error for
/// filtered queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFilter {
    /// Exact container names.
    #[serde(default)]
    pub package_names: Vec<CompactString>,
    /// Directory paths containing the containers.
    #[serde(default)]
    pub package_paths: Vec<CompactString>,
    /// Also match containers in sub-directories of `package_paths`.
    #[serde(default)]
    pub recursive_paths: bool,
    /// Full object paths (`package.object`).
    #[serde(default)]
    pub object_paths: Vec<CompactString>,
    /// Declared type names.
    #[serde(default)]
    pub types: Vec<CompactString>,
    /// Also match subclasses of `types`.
    #[serde(default)]
    pub recursive_types: bool,
    /// Types removed from the (expanded) type set.
    #[serde(default)]
    pub excluded_types: Vec<CompactString>,
    /// Tag conditions; every predicate must hold.
    #[serde(default)]
    pub tags: Vec<TagPredicate>,
}

impl AssetFilter {
    /// Empty filter; add conditions with the `with_*` helpers.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package_name(mut self, name: impl Into<CompactString>) -> Self {
        self.package_names.push(name.into());
        self
    }

    pub fn with_package_path(mut self, path: &str, recursive: bool) -> Self {
        self.package_paths.push(normalize_path(path));
        self.recursive_paths |= recursive;
        self
    }

    pub fn with_object_path(mut self, path: impl Into<CompactString>) -> Self {
        self.object_paths.push(path.into());
        self
    }

    pub fn with_type(mut self, ty: impl Into<CompactString>, recursive: bool) -> Self {
        self.types.push(ty.into());
        self.recursive_types |= recursive;
        self
    }

    pub fn without_type(mut self, ty: impl Into<CompactString>) -> Self {
        self.excluded_types.push(ty.into());
        self
    }

    pub fn with_tag(mut self, predicate: TagPredicate) -> Self {
        self.tags.push(predicate);
        self
    }

    /// Whether the filter has no conditions at all.
    pub fn is_empty(&self) -> bool {
        self.package_names.is_empty()
            && self.package_paths.is_empty()
            && self.object_paths.is_empty()
            && self.types.is_empty()
            && self.tags.is_empty()
    }

    /// Reject empty or self-contradictory filters.
    ///
    /// A filter is contradictory when every listed type is also excluded and
    /// subclass expansion is off, since it can never match anything.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.is_empty() {
            return Err(RegistryError::InvalidFilter {
                message: "filter has no conditions".to_string(),
            });
        }
        if !self.types.is_empty()
            && !self.recursive_types
            && self.types.iter().all(|t| self.excluded_types.contains(t))
        {
            return Err(RegistryError::InvalidFilter {
                message: "every requested type is also excluded".to_string(),
            });
        }
        if self.tags.iter().any(|t| t.key.is_empty()) {
            return Err(RegistryError::InvalidFilter {
                message: "tag predicate with empty name".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_rejected() {
        let err = AssetFilter::new().validate().unwrap_err();
        assert!(matches!(err, RegistryError::InvalidFilter { .. }));
    }

    #[test]
    fn test_contradictory_filter_rejected() {
        let filter = AssetFilter::new().with_type("Mesh", false).without_type("Mesh");
        assert!(filter.validate().is_err());

        let recursive = AssetFilter::new().with_type("Mesh", true).without_type("Mesh");
        assert!(recursive.validate().is_ok());
    }

    #[test]
    fn test_package_path_normalized() {
        let filter = AssetFilter::new().with_package_path("Game/Maps/", true);
        assert_eq!(filter.package_paths, vec![CompactString::new("/Game/Maps")]);
        assert!(filter.recursive_paths);
    }
}
