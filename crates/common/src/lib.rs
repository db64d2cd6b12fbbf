
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Canonical error type shared across planner subsystems.
#[derive(Error, Debug)]
pub enum GtError {
    /// The filter contains a construct the planner cannot classify.
    #[error("filter: {0}")]
    Filter(String),
    /// Malformed schema text or conflicting default attributes.
    #[error("schema: {0}")]
    Schema(String),
    /// A compilation invariant was violated.
    #[error("plan: {0}")]
    Plan(String),
    /// A required hint or setting is missing or unusable.
    #[error("config: {0}")]
    Config(String),
    /// Propagated from the scanner handle.
    #[error("store: {0}")]
    Store(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `GtError`.
pub type GtResult<T> = Result<T, GtError>;

/// Start-inclusive, end-exclusive range over a sorted byte key space.
///
/// An empty `end` means the range is unbounded above. `ByteRange::all()`
/// covers the entire key space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: Bytes,
    pub end: Bytes,
}

impl ByteRange {
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// The range covering every key.
    pub fn all() -> Self {
        Self {
            start: Bytes::new(),
            end: Bytes::new(),
        }
    }

    /// The range matching exactly one row key.
    pub fn single_row(key: &[u8]) -> Self {
        Self {
            start: Bytes::copy_from_slice(key),
            end: key_successor(key),
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_ref() && (self.end.is_empty() || key < self.end.as_ref())
    }
}

/// The smallest key strictly greater than `key`: `key || 0x00`.
pub fn key_successor(key: &[u8]) -> Bytes {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0x00);
    Bytes::from(next)
}

/// The smallest key greater than every key with prefix `prefix`, if one
/// exists. Trailing `0xFF` bytes drop until an incrementable byte remains;
/// an all-`0xFF` prefix has no successor.
pub fn prefix_successor(prefix: &[u8]) -> Option<Bytes> {
    let mut next = prefix.to_vec();
    while let Some(last) = next.last().copied() {
        if last == 0xFF {
            next.pop();
        } else {
            *next.last_mut()? = last + 1;
            return Some(Bytes::from(next));
        }
    }
    None
}

/// Names of the three tables the planner targets.
///
/// # Example
/// ```
/// use common::TableSet;
///
/// let tables = TableSet::builder()
///     .records("features".to_string())
///     .build();
/// assert_eq!(tables.attr_index, "geotable_attr_idx");
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct TableSet {
    /// Record table: one row per feature id.
    #[builder(default = String::from("geotable_records"))]
    pub records: String,
    /// Inverted attribute index table.
    #[builder(default = String::from("geotable_attr_idx"))]
    pub attr_index: String,
    /// Spatio-temporal index table.
    #[builder(default = String::from("geotable_st_idx"))]
    pub st_index: String,
}

impl Default for TableSet {
    fn default() -> Self {
        Self {
            records: String::from("geotable_records"),
            attr_index: String::from("geotable_attr_idx"),
            st_index: String::from("geotable_st_idx"),
        }
    }
}
