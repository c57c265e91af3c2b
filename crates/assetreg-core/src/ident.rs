//! Asset identifiers used as graph keys and lookup keys.

use std::fmt;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Stable key for an asset, a container, or a searchable name.
///
/// A bare package identifier (no object, no value) names a whole container.
/// Identifiers order by package first, which keeps everything belonging to a
/// container adjacent when sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetIdentifier {
    /// Container path in namespace form, e.g. `/Game/Maps/Level1`.
    pub package: CompactString,
    /// Intra-container object name.
    pub object: Option<CompactString>,
    /// Searchable value name.
    pub value: Option<CompactString>,
}

impl AssetIdentifier {
    /// Identifier for a whole container.
    pub fn package(package: impl Into<CompactString>) -> Self {
        Self {
            package: package.into(),
            object: None,
            value: None,
        }
    }

    /// Identifier for an object inside a container.
    pub fn object(package: impl Into<CompactString>, object: impl Into<CompactString>) -> Self {
        Self {
            package: package.into(),
            object: Some(object.into()),
            value: None,
        }
    }

    /// Identifier for a searchable name declared by a container.
    pub fn value(package: impl Into<CompactString>, value: impl Into<CompactString>) -> Self {
        Self {
            package: package.into(),
            object: None,
            value: Some(value.into()),
        }
    }

    /// Parse the display form back into an identifier.
    ///
    /// Accepts `package`, `package.object` and `package::value`. Returns
    /// `None` for strings that are not rooted at `/`.
    pub fn parse(text: &str) -> Option<Self> {
        if !text.starts_with('/') {
            return None;
        }
        if let Some((package, value)) = text.split_once("::") {
            return Some(Self::value(package, value));
        }
        // Object names follow the last '.' after the final path segment.
        let last_slash = text.rfind('/').unwrap_or(0);
        match text[last_slash..].find('.') {
            Some(dot) => {
                let split = last_slash + dot;
                Some(Self::object(&text[..split], &text[split + 1..]))
            }
            None => Some(Self::package(text)),
        }
    }

    /// Whether this identifier names a whole container.
    pub fn is_package(&self) -> bool {
        self.object.is_none() && self.value.is_none()
    }

    /// The identifier of the container this one belongs to.
    pub fn to_package(&self) -> Self {
        Self::package(self.package.clone())
    }
}

impl fmt::Display for AssetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.package)?;
        if let Some(object) = &self.object {
            write!(f, ".{object}")?;
        }
        if let Some(value) = &self.value {
            write!(f, "::{value}")?;
        }
        Ok(())
    }
}

/// Parent directory of a namespace path, or `None` for a root like `/Game`.
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&trimmed[..idx]),
    }
}

/// Normalize a namespace path: single leading slash, no trailing slash,
/// no empty segments.
pub fn normalize_path(path: &str) -> CompactString {
    let mut out = CompactString::new("");
    for segment in path.split(['/', '\\']).filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let id = AssetIdentifier::object("/Game/Maps/Level1", "Level1");
        assert_eq!(id.to_string(), "/Game/Maps/Level1.Level1");
        assert_eq!(AssetIdentifier::parse("/Game/Maps/Level1.Level1"), Some(id));

        let value = AssetIdentifier::value("/Game/Data", "Row");
        assert_eq!(value.to_string(), "/Game/Data::Row");
        assert_eq!(AssetIdentifier::parse("/Game/Data::Row"), Some(value));

        assert_eq!(
            AssetIdentifier::parse("/Game/A"),
            Some(AssetIdentifier::package("/Game/A"))
        );
        assert_eq!(AssetIdentifier::parse("Game/A"), None);
    }

    #[test]
    fn test_dotted_directory_is_not_object() {
        let id = AssetIdentifier::parse("/Game/v1.2/Thing").unwrap();
        assert!(id.is_package());
        assert_eq!(id.package, "/Game/v1.2/Thing");
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(normalize_path("Game//Maps/"), "/Game/Maps");
        assert_eq!(normalize_path("\\Game\\Maps"), "/Game/Maps");
        assert_eq!(parent_path("/Game/Maps/Level1"), Some("/Game/Maps"));
        assert_eq!(parent_path("/Game"), None);
    }
}
