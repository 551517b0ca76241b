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

//! Redirect log query endpoint
//!
//! Turns caller-supplied query parameters into a validated
//! [`QueryRedirectLogsRequest`], sends it to the combined redirect log and
//! renders the result.

use crate::export::{export_redirect_logs, ExportFormat};
use once_cell::sync::Lazy;
use podstats_core::hashing::{is_lower_hex, sha256_hex, HASHED_IP_ADDRESS_LEN};
use podstats_core::rpc::partition_names;
use podstats_core::timestamp::{format_instant, parse_instant};
use podstats_core::urls::{compute_destination_url, try_parse_http_url};
use podstats_core::{PodstatsError, QueryRedirectLogsRequest, Result, RpcClient};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 20_000;

/// Filter parameters, at most one of which may be given.
pub const FILTER_PARAMS: &[&str] = &[
    "url",
    "urlSha256",
    "userAgent",
    "referer",
    "hashedIpAddress",
    "edgeColo",
    "ulid",
    "method",
    "uuid",
];

static URL_STARTS_WITH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(https?://.+?)\*$").expect("valid url pattern"));
static METHOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(HEAD|PUT|PATCH|POST|DELETE|OPTIONS)$").expect("valid method pattern"));

/// Capability granted to an API caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    Preview,
    ReadData,
    Admin,
}

impl FromStr for Permission {
    type Err = PodstatsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "preview" => Ok(Permission::Preview),
            "read-data" => Ok(Permission::ReadData),
            "admin" => Ok(Permission::Admin),
            other => Err(PodstatsError::Validation(format!("unknown permission: {}", other))),
        }
    }
}

/// Whether the caller may read redirect logs.
pub fn can_query_redirect_logs(permissions: &BTreeSet<Permission>) -> bool {
    [Permission::Preview, Permission::ReadData, Permission::Admin]
        .iter()
        .any(|p| permissions.contains(p))
}

/// A rendered query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub content_type: &'static str,
    pub body: String,
}

fn check(name: &str, value: &str, valid: bool) -> Result<()> {
    if valid {
        Ok(())
    } else {
        Err(PodstatsError::Validation(format!("Bad {}: {}", name, value)))
    }
}

fn not_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

fn instant_param(params: &BTreeMap<String, String>, name: &str) -> Result<Option<String>> {
    params
        .get(name)
        .map(|value| {
            parse_instant(value)
                .map(|instant| format_instant(&instant))
                .map_err(|_| PodstatsError::Validation(format!("Bad {}: {}", name, value)))
        })
        .transpose()
}

/// Parse query parameters into a request and an output format.
pub fn parse_query_params(
    params: &BTreeMap<String, String>,
) -> Result<(QueryRedirectLogsRequest, ExportFormat)> {
    let limit = match params.get("limit") {
        Some(value) => value
            .parse::<usize>()
            .ok()
            .filter(|limit| (1..=MAX_LIMIT).contains(limit))
            .ok_or_else(|| PodstatsError::Validation(format!("Bad limit: {}", value)))?,
        None => DEFAULT_LIMIT,
    };
    let format: ExportFormat = params
        .get("format")
        .map(|f| f.parse())
        .transpose()?
        .unwrap_or_default();

    let mut request = QueryRedirectLogsRequest::new(limit);
    request.start_time_inclusive = instant_param(params, "start")?;
    request.start_time_exclusive = instant_param(params, "startAfter")?;
    request.end_time_exclusive = instant_param(params, "end")?;

    let filters: Vec<(&str, &str)> = FILTER_PARAMS
        .iter()
        .filter_map(|name| params.get(*name).map(|value| (*name, value.as_str())))
        .collect();
    if filters.len() > 1 {
        return Err(PodstatsError::Validation(
            "Cannot specify more than one filter parameter".to_string(),
        ));
    }

    if let Some((name, value)) = filters.first().copied() {
        match name {
            "url" => {
                if let Some(captures) = URL_STARTS_WITH.captures(value) {
                    let url_starts_with = &captures[1];
                    let destination = compute_destination_url(url_starts_with);
                    let url = try_parse_http_url(&destination).ok_or_else(|| {
                        PodstatsError::Validation(format!(
                            "Bad urlStartsWith: {}, invalid destination url {}",
                            url_starts_with, destination
                        ))
                    })?;
                    if url.path().len() <= 1 {
                        return Err(PodstatsError::Validation(format!(
                            "Bad urlStartsWith: {}, destination url pathname must be at least one character long, found {}",
                            url_starts_with,
                            url.path()
                        )));
                    }
                    request.url_starts_with = Some(url_starts_with.to_string());
                } else {
                    check(name, value, try_parse_http_url(value).is_some())?;
                    request.url_sha256 = Some(sha256_hex(&compute_destination_url(value)));
                }
            }
            "urlSha256" => {
                check(name, value, is_lower_hex(value, 64))?;
                request.url_sha256 = Some(value.to_string());
            }
            "userAgent" => {
                check(name, value, not_blank(value))?;
                request.user_agent = Some(value.to_string());
            }
            "referer" => {
                check(name, value, not_blank(value))?;
                request.referer = Some(value.to_string());
            }
            "hashedIpAddress" => {
                check(name, value, is_lower_hex(value, HASHED_IP_ADDRESS_LEN))?;
                request.hashed_ip_address = Some(value.to_string());
            }
            "edgeColo" => {
                check(name, value, not_blank(value))?;
                request.edge_colo = Some(value.to_string());
            }
            "ulid" => {
                check(name, value, not_blank(value))?;
                request.ulid = Some(value.to_string());
            }
            "method" => {
                check(name, value, METHOD.is_match(value))?;
                request.method = Some(value.to_string());
            }
            "uuid" => {
                check(name, value, is_lower_hex(value, 32))?;
                request.uuid = Some(value.to_string());
            }
            _ => {}
        }
    }

    Ok((request, format))
}

/// Serve a redirect log query.
///
/// Fails with status 403 without a read permission, 405 for anything but
/// `GET`, and a validation error for bad parameters.
pub async fn query_redirect_logs(
    permissions: &BTreeSet<Permission>,
    method: &str,
    params: &BTreeMap<String, String>,
    client: &RpcClient,
) -> Result<QueryResponse> {
    if !can_query_redirect_logs(permissions) {
        return Err(PodstatsError::status(403, "forbidden"));
    }
    if method != "GET" {
        return Err(PodstatsError::status(405, format!("Method not allowed: {}", method)));
    }

    let (request, format) = parse_query_params(params)?;
    tracing::debug!(limit = request.limit, format = ?format, "querying redirect logs");
    let logs = client
        .query_redirect_logs(request, partition_names::COMBINED_REDIRECT_LOG)
        .await?;
    Ok(QueryResponse {
        content_type: format.content_type(),
        body: export_redirect_logs(&logs, format)?,
    })
}
