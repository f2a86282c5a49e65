//! Gap types
//!
//! A gap is an inclusive range of data ids whose rows have not all been seen.

use crate::types::{DataId, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// An inclusive range of data ids not yet confirmed routed
///
/// Equality, hashing and ordering only look at the range; the creation time
/// is carried along for stale-gap expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataGap {
    /// First id of the range
    pub start_id: DataId,
    /// Last id of the range (inclusive)
    pub end_id: DataId,
    /// When the gap was first detected
    pub create_time: Timestamp,
}

impl DataGap {
    /// Create a gap
    pub fn new(start_id: DataId, end_id: DataId, create_time: Timestamp) -> Self {
        Self {
            start_id,
            end_id,
            create_time,
        }
    }

    /// Distance between the bounds (`end - start`)
    pub fn gap_size(&self) -> i64 {
        self.end_id.saturating_sub(self.start_id)
    }

    /// Whether the range holds the id
    pub fn contains(&self, id: DataId) -> bool {
        id >= self.start_id && id <= self.end_id
    }

    /// Whether two ranges share at least one id
    pub fn overlaps(&self, other: &DataGap) -> bool {
        self.start_id <= other.end_id && other.start_id <= self.end_id
    }

    /// Whether the bounds are ordered
    pub fn is_valid(&self) -> bool {
        self.start_id <= self.end_id
    }

    /// Copy of this gap with a different end
    #[must_use]
    pub fn with_end(&self, end_id: DataId) -> Self {
        Self {
            end_id,
            ..self.clone()
        }
    }
}

impl PartialEq for DataGap {
    fn eq(&self, other: &Self) -> bool {
        self.start_id == other.start_id && self.end_id == other.end_id
    }
}

impl Eq for DataGap {}

impl Hash for DataGap {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.start_id.hash(state);
        self.end_id.hash(state);
    }
}

impl PartialOrd for DataGap {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DataGap {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.start_id, self.end_id).cmp(&(other.start_id, other.end_id))
    }
}

impl fmt::Display for DataGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.start_id, self.end_id)
    }
}

/// Gap changes produced by one routing pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GapDelta {
    /// Gaps to remove
    pub to_delete: BTreeSet<DataGap>,
    /// Gaps to add
    pub to_insert: BTreeSet<DataGap>,
}

impl GapDelta {
    /// Create an empty delta
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the delta changes nothing
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_insert.is_empty()
    }

    /// Number of gap changes
    pub fn len(&self) -> usize {
        self.to_delete.len() + self.to_insert.len()
    }

    /// Fold another delta into this one
    pub fn merge(&mut self, other: GapDelta) {
        self.to_delete.extend(other.to_delete);
        self.to_insert.extend(other.to_insert);
        self.normalize();
    }

    /// Drop ranges that are both deleted and inserted
    ///
    /// Such a range either existed before and still exists, or never reached
    /// the store; in both cases the net change is nothing.
    pub fn normalize(&mut self) {
        let both: Vec<DataGap> = self
            .to_delete
            .intersection(&self.to_insert)
            .cloned()
            .collect();
        for gap in both {
            self.to_delete.remove(&gap);
            self.to_insert.remove(&gap);
        }
    }

    /// Apply the delta to a gap set
    ///
    /// Applying the same delta twice leaves the set as applying it once.
    pub fn apply(&self, gaps: &mut BTreeSet<DataGap>) {
        for gap in &self.to_delete {
            gaps.remove(gap);
        }
        for gap in &self.to_insert {
            gaps.insert(gap.clone());
        }
    }
}
