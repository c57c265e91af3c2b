//! Filter evaluation against stored records.

use std::collections::HashSet;

use compact_str::CompactString;

use assetreg_core::{AssetFilter, AssetIdentifier, AssetRecord, RegistryError, TagPredicate};

use crate::hierarchy::TypeHierarchy;

/// An [`AssetFilter`] with its type sets expanded and its lists hashed.
///
/// `None` on a set means the condition is absent, not that nothing matches.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pub(crate) package_names: Option<HashSet<CompactString>>,
    package_paths: Option<Vec<CompactString>>,
    recursive_paths: bool,
    object_paths: Option<HashSet<AssetIdentifier>>,
    pub(crate) types: Option<HashSet<CompactString>>,
    excluded_types: HashSet<CompactString>,
    tags: Vec<TagPredicate>,
}

fn non_empty<T>(set: HashSet<T>) -> Option<HashSet<T>> {
    if set.is_empty() { None } else { Some(set) }
}

impl CompiledFilter {
    /// Validate and compile a filter.
    ///
    /// Recursive type filters expand through `hierarchy`, which the caller
    /// must have brought up to date.
    pub fn compile(filter: &AssetFilter, hierarchy: &TypeHierarchy) -> Result<Self, RegistryError> {
        filter.validate()?;

        let excluded: HashSet<CompactString> = filter.excluded_types.iter().cloned().collect();
        let (types, excluded_types) = if filter.recursive_types {
            let types = hierarchy.subclasses(filter.types.iter().map(|t| t.as_str()), &excluded);
            let excluded_all =
                hierarchy.subclasses(excluded.iter().map(|t| t.as_str()), &HashSet::new());
            (types, excluded_all)
        } else {
            let types = filter
                .types
                .iter()
                .filter(|t| !excluded.contains(*t))
                .cloned()
                .collect();
            (types, excluded)
        };
        if !filter.types.is_empty() && types.is_empty() {
            return Err(RegistryError::InvalidFilter {
                message: "type set is empty after exclusions".to_string(),
            });
        }

        let object_paths = filter
            .object_paths
            .iter()
            .map(|p| {
                AssetIdentifier::parse(p).ok_or_else(|| RegistryError::InvalidFilter {
                    message: format!("invalid object path: {p}"),
                })
            })
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(Self {
            package_names: non_empty(filter.package_names.iter().cloned().collect()),
            package_paths: if filter.package_paths.is_empty() {
                None
            } else {
                Some(filter.package_paths.clone())
            },
            recursive_paths: filter.recursive_paths,
            object_paths: non_empty(object_paths),
            types: non_empty(types),
            excluded_types,
            tags: filter.tags.clone(),
        })
    }

    fn path_matches(&self, package_path: &str) -> bool {
        let Some(paths) = &self.package_paths else {
            return true;
        };
        paths.iter().any(|p| {
            if package_path == p.as_str() {
                return true;
            }
            self.recursive_paths
                && package_path
                    .strip_prefix(p.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Whether a record satisfies every condition.
    pub fn matches(&self, record: &AssetRecord) -> bool {
        if let Some(names) = &self.package_names {
            if !names.contains(&record.package_name) {
                return false;
            }
        }
        if !self.path_matches(record.package_path()) {
            return false;
        }
        if let Some(objects) = &self.object_paths {
            if !objects.contains(&record.identifier()) {
                return false;
            }
        }
        if self.excluded_types.contains(&record.asset_type) {
            return false;
        }
        if let Some(types) = &self.types {
            if !types.contains(&record.asset_type) {
                return false;
            }
        }
        self.tags.iter().all(|predicate| match record.tag(&predicate.key) {
            None => false,
            Some(value) => predicate
                .value
                .as_ref()
                .is_none_or(|expected| value.as_text() == *expected),
        })
    }
}
