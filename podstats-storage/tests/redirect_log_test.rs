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

// Integration tests for redirect log partitions: journal replay, pagination
// and index consistency.

use podstats_core::{AttNums, RawRedirectEvent, RecordContext, TimestampId};
use podstats_storage::{FieldFilter, IndexField, LogQuery, PartitionConfig, PartitionRegistry, RedirectLogStore};
use proptest::prelude::*;
use std::collections::BTreeMap;
use tempfile::tempdir;

const T0: i64 = 1_704_085_512_345;

fn event(n: usize, method: &str, url: &str) -> RawRedirectEvent {
    RawRedirectEvent {
        uuid: format!("{:032x}", n),
        time: T0 + n as i64,
        raw_ip_address: format!("198.51.100.{}", n % 250),
        method: method.to_string(),
        url: url.to_string(),
        user_agent: Some("Overcast/3.0".to_string()),
        referer: None,
        range: None,
        ulid: Some(format!("ulid-{}", n % 3)),
        other: Some(BTreeMap::from([
            ("colo".to_string(), "AMS".to_string()),
            ("country".to_string(), "NL".to_string()),
        ])),
    }
}

fn context() -> RecordContext {
    RecordContext {
        ip_hash_key: [7u8; 32],
        do_colo: "FRA".to_string(),
        source: "combined-redirect-log".to_string(),
    }
}

#[test]
fn test_reopen_replays_records_and_indexes() {
    let dir = tempdir().unwrap();
    let url = "https://pod.example/e/cdn.example.com/show/ep1.mp3";
    {
        let store = RedirectLogStore::open("combined-redirect-log", context(), dir.path(), false).unwrap();
        for n in 0..10 {
            store.append(&event(n, if n % 2 == 0 { "GET" } else { "HEAD" }, url)).unwrap();
        }
    }

    let store = RedirectLogStore::open("combined-redirect-log", context(), dir.path(), false).unwrap();
    assert_eq!(store.len(), 10);

    let heads = store
        .query(&LogQuery::new(100).filter(FieldFilter::Equals(IndexField::Method, "HEAD".into())))
        .unwrap();
    assert_eq!(heads.records.len(), 5);

    let metrics = store.metrics();
    assert_eq!(metrics.malformed_records, 0);
    assert_eq!(metrics.index_entries["method"], 10);
    assert_eq!(metrics.index_entries["edgeColo"], 10);
    assert_eq!(metrics.index_entries["referer"], 0);

    // appends after reopen continue the id sequence
    let next = store.append(&event(0, "GET", url)).unwrap();
    assert!(Some(&next.timestamp_id) > metrics.last_timestamp_id.as_ref());
}

#[test]
fn test_records_unpack_with_returned_numbering() {
    let store = RedirectLogStore::in_memory("combined-redirect-log", context());
    store
        .append(&event(1, "GET", "https://pod.example/e/cdn.example.com/ep.mp3"))
        .unwrap();

    let result = store.query(&LogQuery::new(1)).unwrap();
    let att_nums = AttNums::from_json(result.names_to_nums).unwrap();
    let record = att_nums
        .unpack_record(result.records.values().next().unwrap())
        .unwrap();

    assert_eq!(record.get("edgeColo"), Some("AMS"));
    assert_eq!(record.get("doColo"), Some("FRA"));
    assert_eq!(record.get("other.country"), Some("NL"));
    assert_eq!(record.get("hashedIpAddress").map(str::len), Some(40));
    assert!(record.iter().all(|(_, v)| v != "198.51.100.1"));
}

#[test]
fn test_pagination_visits_every_record_once() {
    let store = RedirectLogStore::in_memory("combined-redirect-log", context());
    for n in 0..23 {
        store.append(&event(n, "GET", "https://a.com/x.mp3")).unwrap();
    }

    let mut seen: Vec<TimestampId> = Vec::new();
    let mut cursor = None;
    loop {
        let page = store.get_new(5, cursor.clone()).unwrap();
        if page.records.is_empty() {
            break;
        }
        cursor = page.records.keys().next_back().cloned();
        seen.extend(page.records.into_keys());
    }
    assert_eq!(seen.len(), 23);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_url_prefix_query() {
    let store = RedirectLogStore::in_memory("combined-redirect-log", context());
    store.append(&event(1, "GET", "https://pod.example/e/cdn.example.com/a/1.mp3")).unwrap();
    store.append(&event(2, "GET", "https://pod.example/e/cdn.example.com/b/1.mp3")).unwrap();
    store.append(&event(3, "GET", "https://pod.example/e/cdn.example.com/a/2.mp3")).unwrap();
    store.append(&event(4, "GET", "https://pod.example/e/other.example.com/a/1.mp3")).unwrap();

    let result = store
        .query(&LogQuery::new(10).filter(FieldFilter::UrlStartsWith("https://cdn.example.com/a/".into())))
        .unwrap();
    assert_eq!(result.records.len(), 2);

    let result = store
        .query(&LogQuery::new(1).filter(FieldFilter::UrlStartsWith("https://cdn.example.com/".into())))
        .unwrap();
    assert_eq!(result.records.len(), 1);
}

#[test]
fn test_registry_journals_per_partition() {
    let dir = tempdir().unwrap();
    let config = PartitionConfig {
        journal_dir: Some(dir.path().to_path_buf()),
        ..PartitionConfig::default()
    };
    {
        let registry = PartitionRegistry::new(config.clone());
        let store = registry.get_or_open("raw-request-SJC").unwrap();
        store.append(&event(1, "GET", "https://a.com/x.mp3")).unwrap();
    }
    assert!(dir.path().join("raw-request-SJC").join("records.log").exists());

    let registry = PartitionRegistry::new(config);
    assert_eq!(registry.get_or_open("raw-request-SJC").unwrap().len(), 1);
    assert_eq!(registry.get_or_open("combined-redirect-log").unwrap().len(), 0);
}

proptest! {
    #[test]
    fn prop_index_query_matches_full_scan(methods in prop::collection::vec(0usize..3, 1..40), limit in 1usize..50) {
        let names = ["GET", "HEAD", "POST"];
        let store = RedirectLogStore::in_memory("combined-redirect-log", context());
        for (n, m) in methods.iter().enumerate() {
            store.append(&event(n, names[*m], "https://a.com/x.mp3")).unwrap();
        }

        let all = store.query(&LogQuery::new(usize::MAX)).unwrap();
        let att_nums = AttNums::from_json(all.names_to_nums.clone()).unwrap();
        let expected: Vec<TimestampId> = all
            .records
            .iter()
            .filter(|(_, packed)| att_nums.unpack_record(packed).unwrap().get("method") == Some("HEAD"))
            .map(|(id, _)| id.clone())
            .take(limit)
            .collect();

        let indexed = store
            .query(&LogQuery::new(limit).filter(FieldFilter::Equals(IndexField::Method, "HEAD".into())))
            .unwrap();
        prop_assert_eq!(indexed.records.into_keys().collect::<Vec<_>>(), expected);
    }
}
