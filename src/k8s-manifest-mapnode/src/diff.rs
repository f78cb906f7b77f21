//! Structural diff results.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::path::{split_path, FieldMask};

/// Values on either side of a differing path. `None` means absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffValues {
    /// Value in the left-hand tree.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub before: Option<Value>,
    /// Value in the right-hand tree.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub after: Option<Value>,
}

// A present key (even an explicit null) is `Some`; only a missing key is `None`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// One path-level difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Difference {
    /// Dotted path of the differing leaf.
    pub key: String,
    /// Values on either side.
    pub values: DiffValues,
}

/// Wire form of a non-empty diff: `{"items": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    /// Differences ordered by key.
    pub items: Vec<Difference>,
}

/// Outcome of comparing two trees.
///
/// Serializes as `null` when empty and as a [`DiffReport`] otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<DiffReport>", into = "Option<DiffReport>")]
pub enum DiffResult {
    /// The trees are equivalent.
    #[default]
    Empty,
    /// At least one path differs. Never holds an empty list.
    NonEmpty(Vec<Difference>),
}

impl DiffResult {
    /// Build a result, normalizing an empty list to [`DiffResult::Empty`].
    #[must_use]
    pub fn from_items(items: Vec<Difference>) -> Self {
        if items.is_empty() {
            Self::Empty
        } else {
            Self::NonEmpty(items)
        }
    }

    /// Number of differing paths.
    #[must_use]
    pub fn size(&self) -> usize {
        self.items().len()
    }

    /// Whether the trees were equivalent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The differences, empty for [`DiffResult::Empty`].
    #[must_use]
    pub fn items(&self) -> &[Difference] {
        match self {
            Self::Empty => &[],
            Self::NonEmpty(items) => items,
        }
    }

    /// Paths of the differences.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.items().iter().map(|d| d.key.as_str()).collect()
    }

    /// Remove entries whose path is covered by `mask`.
    ///
    /// Returns how many entries were removed and the remaining diff.
    #[must_use]
    pub fn filter(&self, mask: &FieldMask) -> (usize, Self) {
        let (removed, kept): (Vec<&Difference>, Vec<&Difference>) = self
            .items()
            .iter()
            .partition(|d| mask.covers(&split_path(&d.key)));
        (
            removed.len(),
            Self::from_items(kept.into_iter().cloned().collect()),
        )
    }
}

impl From<Option<DiffReport>> for DiffResult {
    fn from(report: Option<DiffReport>) -> Self {
        report.map_or(Self::Empty, |r| Self::from_items(r.items))
    }
}

impl From<DiffResult> for Option<DiffReport> {
    fn from(diff: DiffResult) -> Self {
        match diff {
            DiffResult::Empty => None,
            DiffResult::NonEmpty(items) => Some(DiffReport { items }),
        }
    }
}
