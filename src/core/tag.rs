//! Admission tags.

use std::fmt;

/// Identifies an admission-control bucket.
///
/// `General` is the reserved bucket for untagged work and overflow; it only
/// exists in a pool once it has been referenced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    /// The shared overflow pool.
    General,
    /// A named bucket with its own ceiling.
    Named(String),
}

impl Tag {
    /// Build a named tag. An empty name means the general pool.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() {
            Self::General
        } else {
            Self::Named(name)
        }
    }

    /// Whether this is the general pool.
    #[must_use]
    pub const fn is_general(&self) -> bool {
        matches!(self, Self::General)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::General => write!(f, "<general>"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for Tag {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for Tag {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

impl From<&String> for Tag {
    fn from(name: &String) -> Self {
        Self::named(name.as_str())
    }
}

impl From<Option<&str>> for Tag {
    fn from(name: Option<&str>) -> Self {
        name.map_or(Self::General, Self::named)
    }
}

impl From<&Self> for Tag {
    fn from(tag: &Self) -> Self {
        tag.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_is_general() {
        assert_eq!(Tag::from(""), Tag::General);
        assert_eq!(Tag::from(None), Tag::General);
        assert!(Tag::named(String::new()).is_general());
    }

    #[test]
    fn named_tags_display_their_name() {
        let tag = Tag::from("render");
        assert_eq!(tag.to_string(), "render");
        assert_eq!(Tag::General.to_string(), "<general>");
        assert!(!tag.is_general());
    }

    #[test]
    fn general_sorts_first() {
        let mut tags = vec![Tag::from("b"), Tag::General, Tag::from("a")];
        tags.sort();
        assert_eq!(tags, vec![Tag::General, Tag::from("a"), Tag::from("b")]);
    }
}
