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

//! Raw redirect events
//!
//! A [`RawRedirectEvent`] is captured once per redirect request and never
//! mutated. The log store turns it into a [`Record`] over the fixed
//! redirect log attribute set before packing.

use crate::error::Result;
use crate::hashing::{hash_ip_address, sha256_hex};
use crate::record::Record;
use crate::timestamp::timestamp_from_millis;
use crate::urls::compute_destination_url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix for pass-through attributes taken from [`RawRedirectEvent::other`].
pub const OTHER_PREFIX: &str = "other.";

/// The fixed redirect log attribute set (besides `other.*`).
pub const REDIRECT_LOG_ATTRIBUTES: &[&str] = &[
    attributes::UUID,
    attributes::TIMESTAMP,
    attributes::HASHED_IP_ADDRESS,
    attributes::METHOD,
    attributes::URL,
    attributes::USER_AGENT,
    attributes::REFERER,
    attributes::RANGE,
    attributes::ULID,
    attributes::EDGE_COLO,
    attributes::DO_COLO,
    attributes::SOURCE,
];

/// Attribute names of stored redirect log records.
pub mod attributes {
    pub const UUID: &str = "uuid";
    pub const TIMESTAMP: &str = "timestamp";
    pub const HASHED_IP_ADDRESS: &str = "hashedIpAddress";
    pub const METHOD: &str = "method";
    pub const URL: &str = "url";
    pub const USER_AGENT: &str = "userAgent";
    pub const REFERER: &str = "referer";
    pub const RANGE: &str = "range";
    pub const ULID: &str = "ulid";
    pub const EDGE_COLO: &str = "edgeColo";
    pub const DO_COLO: &str = "doColo";
    pub const SOURCE: &str = "source";
}

/// Whether a name belongs to the redirect log attribute set.
pub fn is_redirect_log_attribute(name: &str) -> bool {
    REDIRECT_LOG_ATTRIBUTES.contains(&name)
        || name
            .strip_prefix(OTHER_PREFIX)
            .map(|rest| !rest.is_empty())
            .unwrap_or(false)
}

/// A redirect request as captured at the edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRedirectEvent {
    pub uuid: String,
    /// Epoch millis
    pub time: i64,
    pub raw_ip_address: String,
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ulid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<BTreeMap<String, String>>,
}

/// Context a partition adds to every record it stores.
#[derive(Debug, Clone, Default)]
pub struct RecordContext {
    /// Secret used to hash client IP addresses
    pub ip_hash_key: [u8; 32],
    /// Store-internal location
    pub do_colo: String,
    /// Name of the ingesting source
    pub source: String,
}

impl RawRedirectEvent {
    /// Build the stored record for this event.
    ///
    /// The raw IP address is replaced by its keyed hash and never stored.
    pub fn to_record(&self, context: &RecordContext) -> Result<Record> {
        use attributes::*;

        let mut record = Record::new();
        record.insert(UUID, self.uuid.as_str());
        record.insert(TIMESTAMP, timestamp_from_millis(self.time)?);
        record.insert(
            HASHED_IP_ADDRESS,
            hash_ip_address(&self.raw_ip_address, &context.ip_hash_key),
        );
        record.insert(METHOD, self.method.as_str());
        record.insert(URL, self.url.as_str());
        record.insert_opt(USER_AGENT, self.user_agent.as_deref());
        record.insert_opt(REFERER, self.referer.as_deref());
        record.insert_opt(RANGE, self.range.as_deref());
        record.insert_opt(ULID, self.ulid.as_deref());

        let other = self.other.as_ref();
        record.insert_opt(EDGE_COLO, other.and_then(|o| o.get("colo")).map(String::as_str));
        if !context.do_colo.is_empty() {
            record.insert(DO_COLO, context.do_colo.as_str());
        }
        if !context.source.is_empty() {
            record.insert(SOURCE, context.source.as_str());
        }
        for (key, value) in other.into_iter().flatten() {
            if key != "colo" && !key.is_empty() {
                record.insert(format!("{}{}", OTHER_PREFIX, key), value.as_str());
            }
        }
        Ok(record)
    }
}

/// Destination URL of a stored record's `url` attribute.
pub fn destination_url_of(record: &Record) -> Option<String> {
    record.get_non_empty(attributes::URL).map(compute_destination_url)
}

/// Hex SHA-256 of a stored record's destination URL.
pub fn destination_url_sha256_of(record: &Record) -> Option<String> {
    destination_url_of(record).map(|url| sha256_hex(&url))
}
