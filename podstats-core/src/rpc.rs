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

//! RPC request and response model
//!
//! Every message carries a `kind` discriminator. Requests are routed by
//! `(kind, target partition)`; adding a kind means adding a variant, and the
//! dispatcher's exhaustive match flags every place that must handle it.

use crate::error::{PodstatsError, Result};
use crate::event::RawRedirectEvent;
use crate::key::TimestampId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable logical partition names.
pub mod partition_names {
    pub const COMBINED_REDIRECT_LOG: &str = "combined-redirect-log";
    pub const REGISTRY: &str = "registry";
    pub const KEY_SERVER: &str = "key-server";
    pub const API_KEY_SERVER: &str = "api-key-server";
    pub const SHOW_SERVER: &str = "show-server";
    pub const RAW_REQUEST_PREFIX: &str = "raw-request-";

    /// Per-location raw request partition name.
    pub fn raw_request(colo: &str) -> String {
        format!("{}{}", RAW_REQUEST_PREFIX, colo)
    }

    /// Whether a partition holds a redirect log.
    pub fn is_redirect_log(name: &str) -> bool {
        name == COMBINED_REDIRECT_LOG || name.starts_with(RAW_REQUEST_PREFIX)
    }
}

/// Request kinds accepted by [`RpcRequest::from_json`].
pub const REQUEST_KINDS: &[&str] = &[
    "log-raw-redirects",
    "query-redirect-logs",
    "get-new-redirect-logs",
    "admin-rebuild-index",
    "admin-get-metrics",
    "redirect-logs-notification",
    "alarm",
    "register-partition",
    "get-key",
];

/// A request sent to a named partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RpcRequest {
    #[serde(rename_all = "camelCase")]
    LogRawRedirects { raw_redirects: Vec<RawRedirectEvent> },
    QueryRedirectLogs(QueryRedirectLogsRequest),
    #[serde(rename_all = "camelCase")]
    GetNewRedirectLogs {
        limit: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_after_timestamp_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AdminRebuildIndex {
        index_name: String,
        start: String,
        inclusive: bool,
        limit: usize,
    },
    AdminGetMetrics,
    #[serde(rename_all = "camelCase")]
    RedirectLogsNotification {
        partition_name: String,
        timestamp_id: String,
        from_colo: String,
    },
    #[serde(rename_all = "camelCase")]
    Alarm {
        payload: AlarmPayload,
        from_isolate_id: String,
    },
    RegisterPartition { info: PartitionInfo },
    #[serde(rename_all = "camelCase")]
    GetKey {
        key_kind: KeyKind,
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl RpcRequest {
    /// Discriminator tag of this request.
    pub fn kind(&self) -> &'static str {
        match self {
            RpcRequest::LogRawRedirects { .. } => "log-raw-redirects",
            RpcRequest::QueryRedirectLogs(_) => "query-redirect-logs",
            RpcRequest::GetNewRedirectLogs { .. } => "get-new-redirect-logs",
            RpcRequest::AdminRebuildIndex { .. } => "admin-rebuild-index",
            RpcRequest::AdminGetMetrics => "admin-get-metrics",
            RpcRequest::RedirectLogsNotification { .. } => "redirect-logs-notification",
            RpcRequest::Alarm { .. } => "alarm",
            RpcRequest::RegisterPartition { .. } => "register-partition",
            RpcRequest::GetKey { .. } => "get-key",
        }
    }

    /// Validate and decode a request received as JSON.
    ///
    /// Unknown kinds are rejected before any field is decoded.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| PodstatsError::Validation("rpc request has no kind".to_string()))?;
        if !REQUEST_KINDS.contains(&kind) {
            return Err(PodstatsError::Validation(format!(
                "unknown rpc request kind: {}",
                kind
            )));
        }
        serde_json::from_value(value)
            .map_err(|e| PodstatsError::Validation(format!("bad rpc request: {}", e)))
    }
}

/// Query over one redirect log partition.
///
/// At most one of the field filters may be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRedirectLogsRequest {
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_inclusive: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_exclusive: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time_exclusive: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_after_record_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_starts_with: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashed_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_colo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub do_colo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ulid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl QueryRedirectLogsRequest {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Field filters that are set, as `(filter name, value)`.
    pub fn field_filters(&self) -> Vec<(&'static str, &str)> {
        [
            ("urlSha256", &self.url_sha256),
            ("urlStartsWith", &self.url_starts_with),
            ("userAgent", &self.user_agent),
            ("referer", &self.referer),
            ("hashedIpAddress", &self.hashed_ip_address),
            ("edgeColo", &self.edge_colo),
            ("doColo", &self.do_colo),
            ("source", &self.source),
            ("ulid", &self.ulid),
            ("method", &self.method),
            ("uuid", &self.uuid),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
        .collect()
    }
}

/// Opaque alarm payload; must be an object with a string `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmPayload {
    pub kind: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Registration record for a partition instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    pub id: String,
    pub name: String,
    pub colo: String,
    /// Instant
    pub first_seen: String,
    /// Instant
    pub last_seen: String,
    #[serde(default)]
    pub changes: Vec<PartitionChange>,
}

/// A change to a partition's id, name or colo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionChange {
    pub name: String,
    pub value: String,
    /// Instant
    pub time: String,
}

/// Kinds of keys served by the key server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyKind {
    IpAddressHmac,
    IpAddressAes,
}

/// A response from a partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RpcResponse {
    Ok,
    Error {
        status: u16,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    GetKey {
        key_id: String,
        raw_key_base64: String,
    },
    AdminRebuildIndex(RebuildIndexResult),
    PackedRedirectLogs(PackedRedirectLogs),
    AdminMetrics(LogMetrics),
}

impl RpcResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            RpcResponse::Ok => "ok",
            RpcResponse::Error { .. } => "error",
            RpcResponse::GetKey { .. } => "get-key",
            RpcResponse::AdminRebuildIndex(_) => "admin-rebuild-index",
            RpcResponse::PackedRedirectLogs(_) => "packed-redirect-logs",
            RpcResponse::AdminMetrics(_) => "admin-metrics",
        }
    }
}

/// Packed records with the attribute snapshot needed to unpack them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackedRedirectLogs {
    pub names_to_nums: BTreeMap<String, u32>,
    pub records: BTreeMap<TimestampId, String>,
}

/// Outcome of replaying the primary log into one index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildIndexResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<TimestampId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<TimestampId>,
    pub count: usize,
    pub millis: u64,
}

/// Counters describing one redirect log partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMetrics {
    pub records: usize,
    pub attributes: usize,
    pub index_entries: BTreeMap<String, usize>,
    pub malformed_records: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp_id: Option<TimestampId>,
}
