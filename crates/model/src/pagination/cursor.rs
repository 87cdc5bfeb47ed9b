use serde::{Deserialize, Serialize};
use std::fmt;

/// Order in which a task walks its table's primary key space.
///
/// Chosen once per task; a resumed scan must use the same order as the
/// invocation that produced the cursor.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanOrder {
    /// Newest rows first (`ORDER BY pk DESC`).
    #[default]
    Descending,
    /// Oldest rows first (`ORDER BY pk ASC`).
    Ascending,
}

/// Represents the leftoff cursor of a batch task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub enum Cursor {
    /// No cursor specified: the scan starts at the top of the key range.
    #[default]
    None,

    /// Key of the next row to process; the scan resumes at `id` inclusive.
    Pk { pk_col: String, id: u64 },
}

impl Cursor {
    pub fn pk(pk_col: impl Into<String>, id: u64) -> Self {
        Cursor::Pk {
            pk_col: pk_col.into(),
            id,
        }
    }

    pub fn id(&self) -> Option<u64> {
        match self {
            Cursor::None => None,
            Cursor::Pk { id, .. } => Some(*id),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Cursor::None)
    }

    /// Whether moving from `self` to `next` strictly advances through the key
    /// space in the given order. Any key advances from `Cursor::None`.
    pub fn is_advanced_by(&self, next: &Cursor, order: ScanOrder) -> bool {
        match (self.id(), next.id()) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(prev), Some(next)) => match order {
                ScanOrder::Descending => next < prev,
                ScanOrder::Ascending => next > prev,
            },
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::None => f.write_str("start"),
            Cursor::Pk { pk_col, id } => write!(f, "{pk_col}={id}"),
        }
    }
}
