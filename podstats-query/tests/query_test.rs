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

// The redirect log query endpoint over an in-memory partition.

mod common;

use common::{event, StoreTransport};
use podstats_core::{PodstatsError, RecordContext, RpcClient};
use podstats_query::{query_redirect_logs, Permission};
use podstats_storage::RedirectLogStore;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn client() -> RpcClient {
    let store = Arc::new(RedirectLogStore::in_memory(
        "combined-redirect-log",
        RecordContext::default(),
    ));
    let mut head = event("e2", 1000, "192.0.2.2", None);
    head.method = "HEAD".to_string();
    store
        .append_batch(&[event("e1", 0, "192.0.2.1", Some("bytes=0-1")), head])
        .unwrap();
    RpcClient::new(Arc::new(StoreTransport { store }))
}

fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn read_data() -> BTreeSet<Permission> {
    BTreeSet::from([Permission::ReadData])
}

#[tokio::test]
async fn test_tsv_export() {
    let response = query_redirect_logs(&read_data(), "GET", &params(&[]), &client())
        .await
        .unwrap();
    assert_eq!(response.content_type, "text/tab-separated-values");
    let lines: Vec<&str> = response.body.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("uuid\ttime\thashedIpAddress\tmethod"));
    assert!(lines[1].starts_with("e1\t2024-01-01T05:05:12.345Z\t"));
    assert!(lines[1].contains("\tbytes=0-1\t"));
}

#[tokio::test]
async fn test_filtered_json_export() {
    let response = query_redirect_logs(
        &read_data(),
        "GET",
        &params(&[("method", "HEAD"), ("format", "json-o")]),
        &client(),
    )
    .await
    .unwrap();
    assert_eq!(response.content_type, "application/json");
    let rows: Vec<serde_json::Value> = serde_json::from_str(&response.body).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["uuid"], "e2");
    assert_eq!(rows[0]["method"], "HEAD");
    assert!(rows[0].get("range").is_none());
}

#[tokio::test]
async fn test_url_prefix_and_paging() {
    let client = client();
    let response = query_redirect_logs(
        &read_data(),
        "GET",
        &params(&[("url", "https://pod.example/e/cdn.example.com/show/*"), ("format", "json-a")]),
        &client,
    )
    .await
    .unwrap();
    let rows: Vec<Vec<String>> = serde_json::from_str(&response.body).unwrap();
    assert_eq!(rows.len(), 3);

    let response = query_redirect_logs(
        &read_data(),
        "GET",
        &params(&[("limit", "1"), ("start", "2024-01-01T05:05:12.345Z"), ("format", "json-a")]),
        &client,
    )
    .await
    .unwrap();
    let rows: Vec<Vec<String>> = serde_json::from_str(&response.body).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1][0], "e1");
}

#[tokio::test]
async fn test_rejections() {
    let client = client();
    let denied = query_redirect_logs(&BTreeSet::new(), "GET", &params(&[]), &client).await;
    assert_eq!(denied.unwrap_err().status_code(), 403);

    let post = query_redirect_logs(&read_data(), "POST", &params(&[]), &client).await;
    assert_eq!(post.unwrap_err().status_code(), 405);

    let two_filters = query_redirect_logs(
        &read_data(),
        "GET",
        &params(&[("method", "HEAD"), ("edgeColo", "SJC")]),
        &client,
    )
    .await;
    assert!(matches!(two_filters, Err(PodstatsError::Validation(_))));
}
