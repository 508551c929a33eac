//! Favorites point at exactly one resource or exactly one aid.
//!
//! The enum makes the "exactly one" invariant structural; the table repeats
//! it as a CHECK constraint so rows written by other tools obey it too.

use crate::models::Favorite;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FavoriteTarget {
    Resource(i32),
    Aid(i32),
}

impl FavoriteTarget {
    /// `(resource_id, aid_id)` column values.
    pub fn columns(self) -> (Option<i32>, Option<i32>) {
        match self {
            FavoriteTarget::Resource(id) => (Some(id), None),
            FavoriteTarget::Aid(id) => (None, Some(id)),
        }
    }

    pub fn from_columns(resource_id: Option<i32>, aid_id: Option<i32>) -> Option<Self> {
        match (resource_id, aid_id) {
            (Some(id), None) => Some(FavoriteTarget::Resource(id)),
            (None, Some(id)) => Some(FavoriteTarget::Aid(id)),
            _ => None,
        }
    }
}

impl Favorite {
    pub fn target(&self) -> Option<FavoriteTarget> {
        FavoriteTarget::from_columns(self.resource_id, self.aid_id)
    }
}

/// `?type=` filter of the favorites listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FavoriteKind {
    Resources,
    Aids,
}

impl FavoriteKind {
    pub fn matches(self, target: FavoriteTarget) -> bool {
        matches!(
            (self, target),
            (FavoriteKind::Resources, FavoriteTarget::Resource(_))
                | (FavoriteKind::Aids, FavoriteTarget::Aid(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_column_is_set() {
        assert_eq!(FavoriteTarget::Resource(3).columns(), (Some(3), None));
        assert_eq!(FavoriteTarget::Aid(4).columns(), (None, Some(4)));
        assert_eq!(FavoriteTarget::from_columns(None, None), None);
        assert_eq!(FavoriteTarget::from_columns(Some(1), Some(2)), None);
        assert_eq!(
            FavoriteTarget::from_columns(None, Some(2)),
            Some(FavoriteTarget::Aid(2))
        );
    }

    #[test]
    fn kind_filter() {
        assert!(FavoriteKind::Resources.matches(FavoriteTarget::Resource(1)));
        assert!(!FavoriteKind::Resources.matches(FavoriteTarget::Aid(1)));
        assert!(FavoriteKind::Aids.matches(FavoriteTarget::Aid(1)));
    }
}
