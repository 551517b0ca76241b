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

//! Redirect Log Store
//!
//! One partition of packed redirect records ordered by [`TimestampId`], with
//! a secondary index per queryable field.
//!
//! # Write path
//!
//! Everything fallible happens before the partition is touched: the record is
//! built and packed against a copy of the attribute numbering, the id is
//! allocated from a copy of the generator, index values are derived, and the
//! journal frame is written. Only then are the record and its index entries
//! inserted together under the write lock.

use crate::journal::Journal;
use crate::secondary_index::{IndexField, IndexSet, KeyBounds};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use podstats_core::timestamp::{parse_instant, timestamp_from_instant};
use podstats_core::urls::compute_destination_url;
use podstats_core::{
    attributes, AttNums, LogMetrics, PackedRedirectLogs, PodstatsError, QueryRedirectLogsRequest,
    RawRedirectEvent, RebuildIndexResult, Record, RecordContext, Result, TimestampId,
    TimestampIdGenerator,
};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::path::Path;
use std::time::Instant;

/// A stored record and its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp_id: TimestampId,
    pub packed: String,
}

/// Filter over one secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldFilter {
    Equals(IndexField, String),
    /// Prefix scan over the destination URL index
    UrlStartsWith(String),
}

/// Query options for a redirect log partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    pub limit: usize,
    pub start_time_inclusive: Option<DateTime<Utc>>,
    pub start_time_exclusive: Option<DateTime<Utc>>,
    pub end_time_exclusive: Option<DateTime<Utc>>,
    /// Pagination cursor; results start strictly after this id
    pub start_after: Option<TimestampId>,
    /// At most one filter is accepted
    pub filters: Vec<FieldFilter>,
}

impl LogQuery {
    /// Create a new query builder.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn start_time_inclusive(mut self, instant: DateTime<Utc>) -> Self {
        self.start_time_inclusive = Some(instant);
        self
    }

    pub fn start_time_exclusive(mut self, instant: DateTime<Utc>) -> Self {
        self.start_time_exclusive = Some(instant);
        self
    }

    pub fn end_time_exclusive(mut self, instant: DateTime<Utc>) -> Self {
        self.end_time_exclusive = Some(instant);
        self
    }

    pub fn start_after(mut self, id: TimestampId) -> Self {
        self.start_after = Some(id);
        self
    }

    pub fn filter(mut self, filter: FieldFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Key bounds implied by the time range and cursor.
    pub fn bounds(&self) -> KeyBounds {
        let mut bounds = KeyBounds::unbounded();
        if let Some(instant) = &self.start_time_inclusive {
            bounds.tighten_lower(Bound::Included(TimestampId::range_bound(
                timestamp_from_instant(instant),
            )));
        }
        if let Some(instant) = &self.start_time_exclusive {
            let next = *instant + Duration::milliseconds(1);
            bounds.tighten_lower(Bound::Included(TimestampId::range_bound(
                timestamp_from_instant(&next),
            )));
        }
        if let Some(id) = &self.start_after {
            bounds.tighten_lower(Bound::Excluded(id.clone()));
        }
        if let Some(instant) = &self.end_time_exclusive {
            bounds.tighten_upper(Bound::Excluded(TimestampId::range_bound(
                timestamp_from_instant(instant),
            )));
        }
        bounds
    }
}

impl TryFrom<&QueryRedirectLogsRequest> for LogQuery {
    type Error = PodstatsError;

    fn try_from(request: &QueryRedirectLogsRequest) -> Result<Self> {
        let parse = |value: &Option<String>| value.as_deref().map(parse_instant).transpose();

        let mut query = LogQuery::new(request.limit);
        query.start_time_inclusive = parse(&request.start_time_inclusive)?;
        query.start_time_exclusive = parse(&request.start_time_exclusive)?;
        query.end_time_exclusive = parse(&request.end_time_exclusive)?;
        query.start_after = request
            .start_after_record_key
            .as_deref()
            .map(TimestampId::parse)
            .transpose()?;

        for (name, value) in request.field_filters() {
            let filter = match name {
                "urlStartsWith" => FieldFilter::UrlStartsWith(compute_destination_url(value)),
                other => FieldFilter::Equals(other.parse()?, value.to_string()),
            };
            query.filters.push(filter);
        }
        Ok(query)
    }
}

struct LogState {
    records: BTreeMap<TimestampId, String>,
    att_nums: AttNums,
    generator: TimestampIdGenerator,
    indexes: IndexSet,
    /// Stored records that could not be unpacked
    unreadable: BTreeSet<TimestampId>,
    /// Journal frames skipped at replay
    skipped_frames: u64,
    journal: Option<Journal>,
}

impl LogState {
    fn new(att_nums: AttNums, journal: Option<Journal>) -> Self {
        Self {
            records: BTreeMap::new(),
            att_nums,
            generator: TimestampIdGenerator::new(),
            indexes: IndexSet::new(),
            unreadable: BTreeSet::new(),
            skipped_frames: 0,
            journal,
        }
    }

    /// Derive every index from the primary log.
    fn reindex_all(&mut self) {
        self.indexes = IndexSet::new();
        self.unreadable.clear();
        for (id, packed) in &self.records {
            match self.att_nums.unpack_record(packed) {
                Ok(record) => self.indexes.insert_all(IndexSet::derive_all(&record), id),
                Err(e) => {
                    tracing::warn!(timestamp_id = %id, error = %e, "skipping malformed record");
                    self.unreadable.insert(id.clone());
                }
            }
        }
    }
}

/// A single redirect log partition.
pub struct RedirectLogStore {
    name: String,
    context: RecordContext,
    state: RwLock<LogState>,
}

impl RedirectLogStore {
    /// Create a partition that lives only in memory.
    pub fn in_memory(name: impl Into<String>, context: RecordContext) -> Self {
        Self {
            name: name.into(),
            context,
            state: RwLock::new(LogState::new(AttNums::for_redirect_logs(), None)),
        }
    }

    /// Open a journaled partition, replaying whatever it already holds.
    ///
    /// Indexes are rebuilt from the replayed records rather than persisted.
    pub fn open(
        name: impl Into<String>,
        context: RecordContext,
        dir: impl AsRef<Path>,
        sync: bool,
    ) -> Result<Self> {
        let name = name.into();
        let (journal, contents) = Journal::open(dir, sync)?;
        let att_nums = match contents.names_to_nums {
            Some(names_to_nums) => AttNums::from_json(names_to_nums)?
                .with_attributes(podstats_core::AttributeSet::RedirectLog),
            None => AttNums::for_redirect_logs(),
        };

        let mut state = LogState::new(att_nums, Some(journal));
        state.records.extend(contents.entries);
        state.skipped_frames = contents.malformed;
        if let Some(last) = state.records.keys().next_back() {
            state.generator = TimestampIdGenerator::resume_after(last);
        }
        state.reindex_all();

        tracing::info!(
            partition = %name,
            records = state.records.len(),
            skipped_frames = state.skipped_frames,
            unreadable = state.unreadable.len(),
            "replayed redirect log journal"
        );

        Ok(Self {
            name,
            context,
            state: RwLock::new(state),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one event.
    pub fn append(&self, event: &RawRedirectEvent) -> Result<LogEntry> {
        let mut guard = self.state.write();
        self.append_locked(&mut guard, event)
    }

    /// Append a batch of events in order.
    ///
    /// Events whose uuid is already stored are skipped, so a batch that is
    /// retried after a partial failure does not duplicate records.
    pub fn append_batch(&self, events: &[RawRedirectEvent]) -> Result<Vec<LogEntry>> {
        let mut guard = self.state.write();
        let mut appended = Vec::with_capacity(events.len());
        for event in events {
            if guard.indexes.get(IndexField::Uuid).contains_value(&event.uuid) {
                tracing::debug!(partition = %self.name, uuid = %event.uuid, "skipping duplicate event");
                continue;
            }
            appended.push(self.append_locked(&mut guard, event)?);
        }
        Ok(appended)
    }

    /// Copy records packed by another partition, attributes unchanged.
    ///
    /// Records whose uuid is already stored are skipped and records that do
    /// not unpack are logged and skipped, so re-copying a page is a no-op.
    pub fn append_packed(&self, logs: &PackedRedirectLogs) -> Result<Vec<LogEntry>> {
        let source = AttNums::from_json(logs.names_to_nums.clone())?;
        let mut guard = self.state.write();
        let mut appended = Vec::with_capacity(logs.records.len());
        for (id, packed) in &logs.records {
            let record = match source.unpack_record(packed) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(partition = %self.name, timestamp_id = %id, error = %e, "skipping malformed record");
                    continue;
                }
            };
            let duplicate = record
                .get_non_empty(attributes::UUID)
                .map_or(false, |uuid| guard.indexes.get(IndexField::Uuid).contains_value(uuid));
            if duplicate {
                continue;
            }
            appended.push(self.append_record_locked(&mut guard, &record, id.millis())?);
        }
        Ok(appended)
    }

    fn append_locked(&self, state: &mut LogState, event: &RawRedirectEvent) -> Result<LogEntry> {
        let record = event.to_record(&self.context)?;
        self.append_record_locked(state, &record, event.time)
    }

    fn append_record_locked(
        &self,
        state: &mut LogState,
        record: &Record,
        millis: i64,
    ) -> Result<LogEntry> {
        let mut att_nums = state.att_nums.clone();
        let packed = att_nums.pack_record(record)?;
        let mut generator = state.generator.clone();
        let timestamp_id = generator.next(millis)?;
        let index_entries = IndexSet::derive_all(record);

        if let Some(journal) = state.journal.as_mut() {
            if att_nums.len() != state.att_nums.len() {
                journal.save_att_nums(&att_nums.to_json())?;
            }
            journal.append(&timestamp_id, &packed)?;
        }

        state.att_nums = att_nums;
        state.generator = generator;
        state.records.insert(timestamp_id.clone(), packed.clone());
        state.indexes.insert_all(index_entries, &timestamp_id);

        Ok(LogEntry {
            timestamp_id,
            packed,
        })
    }

    /// Query records in ascending id order.
    pub fn query(&self, query: &LogQuery) -> Result<PackedRedirectLogs> {
        if query.filters.len() > 1 {
            return Err(PodstatsError::Validation(
                "at most one field filter is allowed".to_string(),
            ));
        }
        let bounds = query.bounds();
        let limit = query.limit;
        let state = self.state.read();

        let ids: Vec<TimestampId> = match query.filters.first() {
            _ if bounds.is_empty() || limit == 0 => Vec::new(),
            None => state
                .records
                .range(bounds.as_range())
                .take(limit)
                .map(|(id, _)| id.clone())
                .collect(),
            Some(FieldFilter::Equals(field, value)) => {
                state.indexes.get(*field).scan_equal(value, &bounds, limit)
            }
            Some(FieldFilter::UrlStartsWith(prefix)) => {
                state
                    .indexes
                    .get(IndexField::Url)
                    .scan_prefix(prefix, &bounds, limit)
            }
        };

        let records = ids
            .into_iter()
            .filter_map(|id| state.records.get(&id).map(|packed| (id, packed.clone())))
            .collect();

        Ok(PackedRedirectLogs {
            names_to_nums: state.att_nums.to_json(),
            records,
        })
    }

    /// Records stored after a cursor, oldest first.
    pub fn get_new(&self, limit: usize, start_after: Option<TimestampId>) -> Result<PackedRedirectLogs> {
        let mut query = LogQuery::new(limit);
        query.start_after = start_after;
        self.query(&query)
    }

    /// Re-derive one index over a span of the primary log.
    ///
    /// The span starts at `start` (a timestamp id or any prefix of one, or
    /// empty for the beginning) and covers at most `limit` records. Existing
    /// entries in the span are replaced, so repeating a rebuild is a no-op.
    pub fn rebuild_index(
        &self,
        index_name: &str,
        start: &str,
        inclusive: bool,
        limit: usize,
    ) -> Result<RebuildIndexResult> {
        let field: IndexField = index_name.parse()?;
        let started = Instant::now();

        let lower = match (start.is_empty(), inclusive) {
            (true, _) => Bound::Unbounded,
            (false, true) => Bound::Included(TimestampId::range_bound(start)),
            (false, false) => Bound::Excluded(TimestampId::range_bound(start)),
        };

        let mut guard = self.state.write();
        let state = &mut *guard;
        let span: Vec<(TimestampId, String)> = state
            .records
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(id, packed)| (id.clone(), packed.clone()))
            .collect();

        let (Some((first, _)), Some((last, _))) = (span.first(), span.last()) else {
            return Ok(RebuildIndexResult {
                millis: started.elapsed().as_millis() as u64,
                ..RebuildIndexResult::default()
            });
        };

        let index = state.indexes.get_mut(field);
        index.remove_span(first, last);
        for (id, packed) in &span {
            match state.att_nums.unpack_record(packed) {
                Ok(record) => {
                    state.unreadable.remove(id);
                    if let Some(value) = field.derive(&record) {
                        index.insert(value, id.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!(timestamp_id = %id, error = %e, "skipping malformed record");
                    state.unreadable.insert(id.clone());
                }
            }
        }

        let result = RebuildIndexResult {
            first: Some(first.clone()),
            last: Some(last.clone()),
            count: span.len(),
            millis: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            partition = %self.name,
            index = index_name,
            count = result.count,
            millis = result.millis,
            "rebuilt index span"
        );
        Ok(result)
    }

    pub fn metrics(&self) -> LogMetrics {
        let state = self.state.read();
        LogMetrics {
            records: state.records.len(),
            attributes: state.att_nums.len(),
            index_entries: state.indexes.entry_counts(),
            malformed_records: state.skipped_frames + state.unreadable.len() as u64,
            last_timestamp_id: state.records.keys().next_back().cloned(),
        }
    }

    /// Snapshot of the attribute numbering.
    pub fn att_nums(&self) -> AttNums {
        self.state.read().att_nums.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podstats_core::hashing::sha256_hex;
    use std::collections::BTreeMap;

    const T0: i64 = 1_704_085_512_345;

    fn event(uuid: &str, time: i64, url: &str) -> RawRedirectEvent {
        RawRedirectEvent {
            uuid: uuid.to_string(),
            time,
            raw_ip_address: "192.0.2.1".to_string(),
            method: "GET".to_string(),
            url: url.to_string(),
            user_agent: Some("AppleCoreMedia/1.0".to_string()),
            referer: None,
            range: Some("bytes=0-1".to_string()),
            ulid: None,
            other: Some(BTreeMap::from([("colo".to_string(), "SJC".to_string())])),
        }
    }

    fn store() -> RedirectLogStore {
        RedirectLogStore::in_memory("combined-redirect-log", RecordContext::default())
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let store = store();
        let a = store.append(&event("u1", T0, "https://pod.example/e/a.com/1.mp3")).unwrap();
        let b = store.append(&event("u2", T0, "https://pod.example/e/a.com/2.mp3")).unwrap();
        let c = store.append(&event("u3", T0 - 5, "https://pod.example/e/a.com/3.mp3")).unwrap();
        assert!(a.timestamp_id < b.timestamp_id);
        assert!(b.timestamp_id < c.timestamp_id);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_query_by_url_sha256() {
        let store = store();
        store.append(&event("u1", T0, "https://pod.example/e/a.com/1.mp3")).unwrap();
        store.append(&event("u2", T0 + 1, "https://pod.example/e/a.com/2.mp3")).unwrap();

        let query = LogQuery::new(10).filter(FieldFilter::Equals(
            IndexField::UrlSha256,
            sha256_hex("https://a.com/2.mp3"),
        ));
        let result = store.query(&query).unwrap();
        assert_eq!(result.records.len(), 1);

        let att_nums = AttNums::from_json(result.names_to_nums).unwrap();
        let record = att_nums
            .unpack_record(result.records.values().next().unwrap())
            .unwrap();
        assert_eq!(record.get("uuid"), Some("u2"));
        assert_eq!(record.get("edgeColo"), Some("SJC"));
    }

    #[test]
    fn test_query_rejects_two_filters() {
        let query = LogQuery::new(10)
            .filter(FieldFilter::Equals(IndexField::Method, "GET".into()))
            .filter(FieldFilter::UrlStartsWith("https://a.com/".into()));
        assert!(matches!(
            store().query(&query),
            Err(PodstatsError::Validation(_))
        ));
    }

    #[test]
    fn test_time_bounds() {
        let store = store();
        for i in 0..5 {
            store.append(&event(&format!("u{}", i), T0 + i * 1000, "https://a.com/x")).unwrap();
        }
        let at = |offset: i64| DateTime::from_timestamp_millis(T0 + offset).unwrap();

        let result = store
            .query(
                &LogQuery::new(10)
                    .start_time_inclusive(at(1000))
                    .end_time_exclusive(at(3000)),
            )
            .unwrap();
        assert_eq!(result.records.len(), 2);

        let result = store
            .query(&LogQuery::new(10).start_time_exclusive(at(1000)))
            .unwrap();
        assert_eq!(result.records.len(), 3);

        let result = store
            .query(
                &LogQuery::new(10)
                    .start_time_inclusive(at(3000))
                    .end_time_exclusive(at(1000)),
            )
            .unwrap();
        assert!(result.records.is_empty());
    }

    #[test]
    fn test_append_batch_skips_stored_uuids() {
        let store = store();
        let events = vec![
            event("u1", T0, "https://a.com/x"),
            event("u2", T0, "https://a.com/y"),
        ];
        assert_eq!(store.append_batch(&events).unwrap().len(), 2);
        assert_eq!(store.append_batch(&events).unwrap().len(), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_append_packed_copies_records_once() {
        let source = RedirectLogStore::in_memory("raw-request-SJC", RecordContext::default());
        source.append(&event("u1", T0, "https://pod.example/e/a.com/1.mp3")).unwrap();
        source.append(&event("u2", T0 + 60_000, "https://pod.example/e/a.com/2.mp3")).unwrap();
        let page = source.get_new(10, None).unwrap();

        let combined = store();
        combined.append(&event("u2", T0 + 60_000, "https://pod.example/e/a.com/2.mp3")).unwrap();
        let copied = combined.append_packed(&page).unwrap();
        assert_eq!(copied.len(), 1);
        assert_eq!(copied[0].timestamp_id.timestamp(), page.records.keys().next().unwrap().timestamp());
        assert!(combined.append_packed(&page).unwrap().is_empty());
        assert_eq!(combined.len(), 2);

        let result = combined
            .query(&LogQuery::new(10).filter(FieldFilter::Equals(IndexField::Uuid, "u1".into())))
            .unwrap();
        let att_nums = AttNums::from_json(result.names_to_nums).unwrap();
        let record = att_nums
            .unpack_record(result.records.values().next().unwrap())
            .unwrap();
        assert_eq!(record.get("url"), Some("https://pod.example/e/a.com/1.mp3"));
        assert_eq!(record.get("edgeColo"), Some("SJC"));
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let store = store();
        for i in 0..4 {
            store.append(&event(&format!("u{}", i), T0 + i, "https://a.com/x")).unwrap();
        }
        let before = store.metrics().index_entries;

        let first = store.rebuild_index("method", "", true, 100).unwrap();
        let second = store.rebuild_index("method", "", true, 100).unwrap();
        assert_eq!(first.count, 4);
        assert_eq!(first.first, second.first);
        assert_eq!(first.last, second.last);
        assert_eq!(store.metrics().index_entries, before);
    }

    #[test]
    fn test_query_from_request() {
        let mut request = QueryRedirectLogsRequest::new(10);
        request.url_starts_with = Some("https://pod.example/e/cdn.example.com/a".into());
        request.start_time_inclusive = Some("2024-01-01T05:00:00.000Z".into());
        let query = LogQuery::try_from(&request).unwrap();
        assert_eq!(
            query.filters,
            vec![FieldFilter::UrlStartsWith("https://cdn.example.com/a".into())]
        );
        assert!(query.start_time_inclusive.is_some());

        request.start_after_record_key = Some("not-an-id".into());
        assert!(matches!(LogQuery::try_from(&request), Err(PodstatsError::Parse(_))));
    }

    #[test]
    fn test_rebuild_unknown_index() {
        assert!(matches!(
            store().rebuild_index("colour", "", true, 10),
            Err(PodstatsError::Validation(_))
        ));
    }

    #[test]
    fn test_rebuild_empty_span() {
        let result = store().rebuild_index("url", "", true, 10).unwrap();
        assert_eq!(result.count, 0);
        assert!(result.first.is_none());
    }
}
