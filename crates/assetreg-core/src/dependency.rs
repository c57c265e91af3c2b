//! Dependency categories, edge properties and dependency queries.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Kind of relationship an edge expresses.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum DependencyCategory {
    /// Container content references another container.
    Content,
    /// Reference to a searchable name.
    SearchableName,
    /// Management relationship (chunking, cooking rules).
    Manage,
}

impl DependencyCategory {
    /// Position of this category in per-category arrays.
    pub fn index(self) -> usize {
        match self {
            DependencyCategory::Content => 0,
            DependencyCategory::SearchableName => 1,
            DependencyCategory::Manage => 2,
        }
    }

    /// Number of categories.
    pub const COUNT: usize = 3;
}

bitflags! {
    /// Set of dependency categories.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CategoryMask: u8 {
        const CONTENT         = 0b001;
        const SEARCHABLE_NAME = 0b010;
        const MANAGE          = 0b100;
    }
}

impl CategoryMask {
    /// Whether the mask includes `category`.
    pub fn includes(self, category: DependencyCategory) -> bool {
        self.contains(CategoryMask::from(category))
    }

    /// Categories present in the mask, in declaration order.
    pub fn categories(self) -> impl Iterator<Item = DependencyCategory> {
        DependencyCategory::iter().filter(move |c| self.includes(*c))
    }
}

impl Default for CategoryMask {
    fn default() -> Self {
        CategoryMask::all()
    }
}

impl From<DependencyCategory> for CategoryMask {
    fn from(category: DependencyCategory) -> Self {
        match category {
            DependencyCategory::Content => CategoryMask::CONTENT,
            DependencyCategory::SearchableName => CategoryMask::SEARCHABLE_NAME,
            DependencyCategory::Manage => CategoryMask::MANAGE,
        }
    }
}

bitflags! {
    /// Property bits attached to an edge.
    ///
    /// An unset `HARD` bit means a soft reference; an unset `GAME` bit means
    /// an editor-only reference. `DIRECT` only applies to manage edges.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
    pub struct DependencyProperties: u8 {
        const HARD   = 0b0001;
        const GAME   = 0b0010;
        const BUILD  = 0b0100;
        const DIRECT = 0b1000;
    }
}

impl DependencyProperties {
    /// Parse a property list like `["hard", "game"]`.
    ///
    /// Unknown names are returned as the error value.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Self, String> {
        let mut props = DependencyProperties::empty();
        for name in names {
            props |= match name.to_ascii_lowercase().as_str() {
                "hard" => DependencyProperties::HARD,
                "soft" => DependencyProperties::empty(),
                "game" => DependencyProperties::GAME,
                "editor_only" | "editoronly" => DependencyProperties::empty(),
                "build" => DependencyProperties::BUILD,
                "direct" => DependencyProperties::DIRECT,
                _ => return Err(name.to_string()),
            };
        }
        Ok(props)
    }
}

/// Selects edges by category and property bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DependencyQuery {
    /// Categories to include.
    pub categories: CategoryMask,
    /// Bits every matching edge must carry.
    pub required: DependencyProperties,
    /// Bits no matching edge may carry.
    pub excluded: DependencyProperties,
}

impl DependencyQuery {
    /// Query matching every edge in every category.
    pub fn all() -> Self {
        Self::default()
    }

    /// Query restricted to one category.
    pub fn category(category: DependencyCategory) -> Self {
        Self {
            categories: category.into(),
            ..Self::default()
        }
    }

    /// Require property bits.
    pub fn require(mut self, props: DependencyProperties) -> Self {
        self.required |= props;
        self
    }

    /// Exclude property bits.
    pub fn exclude(mut self, props: DependencyProperties) -> Self {
        self.excluded |= props;
        self
    }

    /// Whether an edge with this category and these properties matches.
    pub fn matches(&self, category: DependencyCategory, props: DependencyProperties) -> bool {
        self.categories.includes(category)
            && props.contains(self.required)
            && !props.intersects(self.excluded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_matches() {
        let hard = DependencyQuery::category(DependencyCategory::Content)
            .require(DependencyProperties::HARD);
        let props = DependencyProperties::HARD | DependencyProperties::GAME;

        assert!(hard.matches(DependencyCategory::Content, props));
        assert!(!hard.matches(DependencyCategory::Content, DependencyProperties::GAME));
        assert!(!hard.matches(DependencyCategory::Manage, props));

        let no_build = DependencyQuery::all().exclude(DependencyProperties::BUILD);
        assert!(no_build.matches(DependencyCategory::Manage, props));
        assert!(!no_build.matches(DependencyCategory::Content, DependencyProperties::BUILD));
    }

    #[test]
    fn test_category_mask() {
        let mask = CategoryMask::CONTENT | CategoryMask::MANAGE;
        let cats: Vec<_> = mask.categories().collect();
        assert_eq!(
            cats,
            vec![DependencyCategory::Content, DependencyCategory::Manage]
        );
        assert_eq!(
            "searchable_name".parse::<DependencyCategory>().unwrap(),
            DependencyCategory::SearchableName
        );
    }

    #[test]
    fn test_properties_from_names() {
        let props = DependencyProperties::from_names(["Hard", "game"]).unwrap();
        assert_eq!(props, DependencyProperties::HARD | DependencyProperties::GAME);
        assert_eq!(
            DependencyProperties::from_names(["soft"]).unwrap(),
            DependencyProperties::empty()
        );
        assert_eq!(
            DependencyProperties::from_names(["bogus"]),
            Err("bogus".to_string())
        );
    }
}
