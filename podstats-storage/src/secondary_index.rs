// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Secondary indexes
//!
//! Each index maps a derived field value to the ordered set of timestamp ids
//! whose records carry that value. Values are derived from the unpacked
//! record, so an index can always be rebuilt from the primary log.

use podstats_core::event::{destination_url_of, destination_url_sha256_of};
use podstats_core::{attributes, PodstatsError, Record, Result, TimestampId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;

/// Field a secondary index is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexField {
    /// SHA-256 of the destination URL
    UrlSha256,
    /// Destination URL, used for prefix scans
    Url,
    UserAgent,
    Referer,
    HashedIpAddress,
    EdgeColo,
    DoColo,
    Source,
    Ulid,
    Method,
    Uuid,
}

impl IndexField {
    pub const ALL: [IndexField; 11] = [
        IndexField::UrlSha256,
        IndexField::Url,
        IndexField::UserAgent,
        IndexField::Referer,
        IndexField::HashedIpAddress,
        IndexField::EdgeColo,
        IndexField::DoColo,
        IndexField::Source,
        IndexField::Ulid,
        IndexField::Method,
        IndexField::Uuid,
    ];

    /// Index name as used by rebuild requests and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            IndexField::UrlSha256 => "urlSha256",
            IndexField::Url => "url",
            IndexField::UserAgent => attributes::USER_AGENT,
            IndexField::Referer => attributes::REFERER,
            IndexField::HashedIpAddress => attributes::HASHED_IP_ADDRESS,
            IndexField::EdgeColo => attributes::EDGE_COLO,
            IndexField::DoColo => attributes::DO_COLO,
            IndexField::Source => attributes::SOURCE,
            IndexField::Ulid => attributes::ULID,
            IndexField::Method => attributes::METHOD,
            IndexField::Uuid => attributes::UUID,
        }
    }

    /// Value this index stores for a record, if any.
    pub fn derive(&self, record: &Record) -> Option<String> {
        match self {
            IndexField::UrlSha256 => destination_url_sha256_of(record),
            IndexField::Url => destination_url_of(record),
            other => record.get_non_empty(other.name()).map(str::to_string),
        }
    }
}

impl fmt::Display for IndexField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexField {
    type Err = PodstatsError;

    fn from_str(s: &str) -> Result<Self> {
        IndexField::ALL
            .iter()
            .find(|field| field.name() == s)
            .copied()
            .ok_or_else(|| PodstatsError::Validation(format!("unknown index: {}", s)))
    }
}

/// Bounds over timestamp ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBounds {
    pub lower: Bound<TimestampId>,
    pub upper: Bound<TimestampId>,
}

impl Default for KeyBounds {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl KeyBounds {
    pub fn unbounded() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// Narrow the lower bound, keeping whichever bound is tighter.
    pub fn tighten_lower(&mut self, bound: Bound<TimestampId>) {
        let tighter = match (&self.lower, &bound) {
            (Bound::Unbounded, _) => true,
            (_, Bound::Unbounded) => false,
            (Bound::Included(a) | Bound::Excluded(a), Bound::Included(b)) => b > a,
            (Bound::Included(a), Bound::Excluded(b)) => b >= a,
            (Bound::Excluded(a), Bound::Excluded(b)) => b > a,
        };
        if tighter {
            self.lower = bound;
        }
    }

    /// Narrow the upper bound, keeping whichever bound is tighter.
    pub fn tighten_upper(&mut self, bound: Bound<TimestampId>) {
        let tighter = match (&self.upper, &bound) {
            (Bound::Unbounded, _) => true,
            (_, Bound::Unbounded) => false,
            (Bound::Included(a) | Bound::Excluded(a), Bound::Included(b)) => b < a,
            (Bound::Included(a), Bound::Excluded(b)) => b <= a,
            (Bound::Excluded(a), Bound::Excluded(b)) => b < a,
        };
        if tighter {
            self.upper = bound;
        }
    }

    /// Whether no id can satisfy both bounds.
    ///
    /// `BTreeMap::range` panics on inverted bounds, so callers check first.
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(a), Bound::Included(b)) => a > b,
            (Bound::Included(a) | Bound::Excluded(a), Bound::Excluded(b))
            | (Bound::Excluded(a), Bound::Included(b)) => a >= b,
            _ => false,
        }
    }

    pub fn contains(&self, id: &TimestampId) -> bool {
        let above = match &self.lower {
            Bound::Included(b) => id >= b,
            Bound::Excluded(b) => id > b,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(b) => id <= b,
            Bound::Excluded(b) => id < b,
            Bound::Unbounded => true,
        };
        above && below
    }

    pub fn as_range(&self) -> (Bound<&TimestampId>, Bound<&TimestampId>) {
        (self.lower.as_ref(), self.upper.as_ref())
    }
}

/// One secondary index.
#[derive(Debug, Clone)]
pub struct SecondaryIndex {
    field: IndexField,
    entries: BTreeMap<String, BTreeSet<TimestampId>>,
    len: usize,
}

impl SecondaryIndex {
    pub fn new(field: IndexField) -> Self {
        Self {
            field,
            entries: BTreeMap::new(),
            len: 0,
        }
    }

    pub fn field(&self) -> IndexField {
        self.field
    }

    /// Number of `(value, id)` entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert an entry. Returns false if it was already present.
    pub fn insert(&mut self, value: String, id: TimestampId) -> bool {
        let inserted = self.entries.entry(value).or_default().insert(id);
        if inserted {
            self.len += 1;
        }
        inserted
    }

    pub fn contains_value(&self, value: &str) -> bool {
        self.entries.contains_key(value)
    }

    /// Remove every entry pointing into an inclusive id span.
    pub fn remove_span(&mut self, first: &TimestampId, last: &TimestampId) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, ids| {
            let doomed: Vec<TimestampId> = ids.range(first..=last).cloned().collect();
            for id in &doomed {
                ids.remove(id);
            }
            removed += doomed.len();
            !ids.is_empty()
        });
        self.len -= removed;
        removed
    }

    /// Ids whose value equals `value`, ascending, within bounds.
    pub fn scan_equal(&self, value: &str, bounds: &KeyBounds, limit: usize) -> Vec<TimestampId> {
        if bounds.is_empty() {
            return Vec::new();
        }
        self.entries
            .get(value)
            .map(|ids| ids.range(bounds.as_range()).take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Ids whose value starts with `prefix`, ascending, within bounds.
    ///
    /// Matches are gathered across every value under the prefix before the
    /// limit is applied, so the result is the first `limit` ids overall.
    pub fn scan_prefix(&self, prefix: &str, bounds: &KeyBounds, limit: usize) -> Vec<TimestampId> {
        if bounds.is_empty() {
            return Vec::new();
        }
        let mut ids: Vec<TimestampId> = self
            .entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(value, _)| value.starts_with(prefix))
            .flat_map(|(_, ids)| ids.range(bounds.as_range()).take(limit).cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids.truncate(limit);
        ids
    }
}

/// The full set of secondary indexes kept by a redirect log partition.
#[derive(Debug, Clone)]
pub struct IndexSet {
    indexes: BTreeMap<IndexField, SecondaryIndex>,
}

impl Default for IndexSet {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexSet {
    pub fn new() -> Self {
        Self {
            indexes: IndexField::ALL
                .iter()
                .map(|field| (*field, SecondaryIndex::new(*field)))
                .collect(),
        }
    }

    /// Every `(field, value)` pair a record contributes.
    pub fn derive_all(record: &Record) -> Vec<(IndexField, String)> {
        IndexField::ALL
            .iter()
            .filter_map(|field| field.derive(record).map(|value| (*field, value)))
            .collect()
    }

    pub fn insert_all(&mut self, entries: Vec<(IndexField, String)>, id: &TimestampId) {
        for (field, value) in entries {
            self.get_mut(field).insert(value, id.clone());
        }
    }

    pub fn get(&self, field: IndexField) -> &SecondaryIndex {
        // every field is populated in `new`
        &self.indexes[&field]
    }

    pub fn get_mut(&mut self, field: IndexField) -> &mut SecondaryIndex {
        self.indexes
            .entry(field)
            .or_insert_with(|| SecondaryIndex::new(field))
    }

    /// Entry counts per index name.
    pub fn entry_counts(&self) -> BTreeMap<String, usize> {
        self.indexes
            .values()
            .map(|index| (index.field().name().to_string(), index.len()))
            .collect()
    }
}
