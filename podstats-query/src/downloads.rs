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

//! Download aggregation
//!
//! # Hourly job
//!
//! Pages through the combined redirect log for one hour, keeps `GET`
//! requests that are not byte-range preflights, dedups them by
//! `{serverUrl}|{audienceId}` and writes one row per download to
//! `downloads/hourly/{hour}.tsv`.
//!
//! # Daily job
//!
//! Merges the day's hourly outputs, dedups again from scratch, resolves each
//! row's show and writes `downloads/daily/{date}.tsv` plus one
//! `downloads/show-daily/{show}/{show}-{date}.tsv` per show seen.
//!
//! Output is buffered as encoded row chunks; each blob is written with its
//! exact byte length declared up front.

use crate::classifier::{registrable_domain, ShowEpisode, ShowLookup, UserAgentClassifier};
use crate::export::sanitize_tsv_value;
use bytes::Bytes;
use chrono::Duration;
use podstats_core::hashing::compute_audience_id;
use podstats_core::range_header::is_preflight_range;
use podstats_core::rpc::partition_names;
use podstats_core::timestamp::{format_instant, hours_of_date, parse_date, parse_hour, timestamp_to_instant};
use podstats_core::urls::compute_destination_url;
use podstats_core::{
    attributes, AttNums, PodstatsError, QueryRedirectLogsRequest, Record, Result, RpcClient,
    TimestampId,
};
use podstats_storage::{reader_from_chunks, BlobStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Byte ranges at or below this size are preflight requests, not downloads.
const MAX_PREFLIGHT_BYTES: u64 = 2;

pub const HOURLY_COLUMNS: &[&str] = &[
    "serverUrl",
    "audienceId",
    "time",
    "hashedIpAddress",
    "agentType",
    "agentName",
    "deviceType",
    "deviceName",
    "referrerType",
    "referrerName",
    "countryCode",
    "continentCode",
    "regionCode",
    "regionName",
    "timezone",
    "metroCode",
];

pub const DAILY_COLUMNS: &[&str] = &[
    "serverUrl",
    "audienceId",
    "showUuid",
    "episodeId",
    "time",
    "hashedIpAddress",
    "agentType",
    "agentName",
    "deviceType",
    "deviceName",
    "referrerType",
    "referrerName",
    "countryCode",
    "continentCode",
    "regionCode",
    "regionName",
    "timezone",
    "metroCode",
];

// record attribute behind each geo column
const GEO_ATTRIBUTES: &[&str] = &[
    "other.country",
    "other.continent",
    "other.regionCode",
    "other.region",
    "other.timezone",
    "other.metroCode",
];

pub fn hourly_key(hour: &str) -> String {
    format!("downloads/hourly/{}.tsv", hour)
}

pub fn daily_key(date: &str) -> String {
    format!("downloads/daily/{}.tsv", date)
}

pub fn show_daily_key(date: &str, show_uuid: &str) -> String {
    format!("downloads/show-daily/{}/{}-{}.tsv", show_uuid, show_uuid, date)
}

/// Ceilings for one hourly run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyOptions {
    pub max_queries: usize,
    pub query_size: usize,
    pub max_hits: usize,
}

impl Default for HourlyOptions {
    fn default() -> Self {
        Self {
            max_queries: 100,
            query_size: 1000,
            max_hits: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyResult {
    pub hour: String,
    pub max_queries: usize,
    pub query_size: usize,
    pub max_hits: usize,
    pub queries: usize,
    pub hits: usize,
    pub downloads: usize,
    /// Records skipped because they could not be unpacked
    pub malformed: usize,
    pub millis: u64,
    pub content_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyResult {
    pub date: String,
    pub hours: usize,
    pub rows: usize,
    pub downloads: usize,
    pub content_length: u64,
    pub show_content_lengths: BTreeMap<String, u64>,
    pub millis: u64,
}

fn tsv_line<S: AsRef<str>>(values: &[S]) -> Bytes {
    let mut line = values
        .iter()
        .map(|v| sanitize_tsv_value(v.as_ref()))
        .collect::<Vec<_>>()
        .join("\t");
    line.push('\n');
    Bytes::from(line)
}

/// Write the selected chunks (all of them when `indexes` is `None`).
async fn write_chunks(
    blobs: &dyn BlobStore,
    key: &str,
    chunks: &[Bytes],
    indexes: Option<&[usize]>,
) -> Result<u64> {
    let selected: Vec<Bytes> = match indexes {
        Some(indexes) => indexes
            .iter()
            .map(|i| {
                chunks
                    .get(*i)
                    .cloned()
                    .ok_or_else(|| PodstatsError::Internal(format!("no chunk {}", i)))
            })
            .collect::<Result<_>>()?,
        None => chunks.to_vec(),
    };
    let content_length: u64 = selected.iter().map(|c| c.len() as u64).sum();
    blobs.put(key, reader_from_chunks(selected), content_length).await?;
    Ok(content_length)
}

/// Row for one kept redirect record, or `None` if it is not a download.
struct HourlyRow {
    download: String,
    values: Vec<String>,
}

fn hourly_row(record: &Record, classifier: &dyn UserAgentClassifier) -> Result<Option<HourlyRow>> {
    if record.get(attributes::METHOD) != Some("GET") {
        return Ok(None);
    }
    if let Some(range) = record.get_non_empty(attributes::RANGE) {
        if is_preflight_range(range, MAX_PREFLIGHT_BYTES) {
            return Ok(None);
        }
    }

    let user_agent = record.get_non_empty(attributes::USER_AGENT);
    let referer = record.get_non_empty(attributes::REFERER);
    let hashed_ip_address = record.get(attributes::HASHED_IP_ADDRESS).unwrap_or_default();
    let server_url = compute_destination_url(record.get(attributes::URL).unwrap_or_default());
    let audience_id = compute_audience_id(
        hashed_ip_address,
        user_agent,
        referer,
        record.get_non_empty(attributes::ULID),
    );
    let timestamp = record
        .get(attributes::TIMESTAMP)
        .ok_or_else(|| PodstatsError::Parse("record has no timestamp".to_string()))?;
    let time = timestamp_to_instant(timestamp)?;

    let entity = user_agent.and_then(|ua| classifier.classify(ua, referer));
    let agent_type = entity
        .as_ref()
        .map(|e| e.agent_type.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let agent_name = entity
        .as_ref()
        .and_then(|e| e.name.clone())
        .or_else(|| user_agent.map(str::to_string));
    let device = entity.as_ref().and_then(|e| e.device.clone());
    let browser_referrer = entity
        .as_ref()
        .filter(|e| e.agent_type == "browser")
        .map(|e| e.referrer.clone());
    let (referrer_type, referrer_name) = match browser_referrer {
        Some(Some(referrer)) => (Some(referrer.category), Some(referrer.name)),
        Some(None) => match referer {
            Some(referer) => (
                Some("domain".to_string()),
                Some(registrable_domain(referer).unwrap_or_else(|| format!("unknown:[{}]", referer))),
            ),
            None => (None, None),
        },
        None => (None, None),
    };

    let mut values = vec![
        server_url.clone(),
        audience_id.clone(),
        time,
        hashed_ip_address.to_string(),
        agent_type,
        agent_name.unwrap_or_default(),
        device.as_ref().map(|d| d.category.clone()).unwrap_or_default(),
        device.and_then(|d| d.name).unwrap_or_default(),
        referrer_type.unwrap_or_default(),
        referrer_name.unwrap_or_default(),
    ];
    values.extend(
        GEO_ATTRIBUTES
            .iter()
            .map(|name| record.get(name).unwrap_or_default().to_string()),
    );

    Ok(Some(HourlyRow {
        download: format!("{}|{}", server_url, audience_id),
        values,
    }))
}

/// Compute and store the deduplicated downloads for one hour (`yyyy-MM-ddTHH`).
pub async fn compute_hourly_downloads(
    hour: &str,
    options: HourlyOptions,
    client: &RpcClient,
    blobs: &dyn BlobStore,
    classifier: &dyn UserAgentClassifier,
) -> Result<HourlyResult> {
    let started = Instant::now();
    if hour.len() != 13 {
        return Err(PodstatsError::Validation(format!("Bad hour: {}", hour)));
    }
    let start = parse_hour(hour)?;
    let end = start + Duration::hours(1);
    let HourlyOptions {
        max_queries,
        query_size,
        max_hits,
    } = options;

    let mut chunks = vec![tsv_line(HOURLY_COLUMNS)];
    let mut downloads: HashSet<String> = HashSet::new();
    let mut cursor: Option<TimestampId> = None;
    let mut queries = 0;
    let mut hits = 0;
    let mut malformed = 0;

    while queries < max_queries {
        let mut request = QueryRedirectLogsRequest::new(query_size);
        request.start_time_inclusive = Some(format_instant(&start));
        request.end_time_exclusive = Some(format_instant(&end));
        request.start_after_record_key = cursor.as_ref().map(|id| id.to_string());

        let page = client
            .query_redirect_logs(request, partition_names::COMBINED_REDIRECT_LOG)
            .await?;
        queries += 1;
        let att_nums = AttNums::from_json(page.names_to_nums)?;
        let entries = page.records.len();
        tracing::debug!(hour, queries, entries, "read redirect log page");

        for (id, packed) in page.records {
            if hits >= max_hits {
                break;
            }
            hits += 1;
            if cursor.as_ref().map_or(true, |c| &id > c) {
                cursor = Some(id.clone());
            }

            let row = att_nums
                .unpack_record(&packed)
                .and_then(|record| hourly_row(&record, classifier));
            match row {
                Ok(Some(row)) => {
                    if downloads.insert(row.download) {
                        chunks.push(tsv_line(&row.values));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    malformed += 1;
                    tracing::warn!(timestamp_id = %id, error = %e, "skipping malformed record");
                }
            }
        }

        if entries < query_size || hits >= max_hits {
            break;
        }
    }

    let content_length = write_chunks(blobs, &hourly_key(hour), &chunks, None).await?;
    let result = HourlyResult {
        hour: hour.to_string(),
        max_queries,
        query_size,
        max_hits,
        queries,
        hits,
        downloads: downloads.len(),
        malformed,
        millis: started.elapsed().as_millis() as u64,
        content_length,
    };
    tracing::info!(
        hour,
        queries,
        hits,
        downloads = result.downloads,
        malformed,
        content_length,
        "computed hourly downloads"
    );
    Ok(result)
}

/// Value of a named column in an hourly row, empty when absent.
fn column<'a>(headers: &HashMap<String, usize>, values: &[&'a str], name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|i| values.get(*i))
        .copied()
        .unwrap_or_default()
}

/// Show lookups cached per URL for one run.
struct CachedShowLookup<'a> {
    inner: &'a dyn ShowLookup,
    cache: HashMap<String, Option<ShowEpisode>>,
}

impl<'a> CachedShowLookup<'a> {
    fn new(inner: &'a dyn ShowLookup) -> Self {
        Self {
            inner,
            cache: HashMap::new(),
        }
    }

    async fn lookup(&mut self, url: &str) -> Result<Option<ShowEpisode>> {
        if let Some(found) = self.cache.get(url) {
            return Ok(found.clone());
        }
        let found = self.inner.lookup(url).await?;
        self.cache.insert(url.to_string(), found.clone());
        Ok(found)
    }
}

/// Compute and store the deduplicated downloads for one date (`yyyy-MM-dd`).
///
/// When `only_resave_show_uuids` is given, only those shows' per-show outputs
/// are written; the merged daily output is always written.
pub async fn compute_daily_downloads(
    date: &str,
    only_resave_show_uuids: Option<&[String]>,
    blobs: &dyn BlobStore,
    show_lookup: &dyn ShowLookup,
) -> Result<DailyResult> {
    let started = Instant::now();
    if date.len() != 10 {
        return Err(PodstatsError::Validation(format!("Bad date: {}", date)));
    }
    let day = parse_date(date)?;
    let mut shows = CachedShowLookup::new(show_lookup);

    let mut chunks = vec![tsv_line(DAILY_COLUMNS)];
    let mut show_chunk_indexes: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut downloads: HashSet<String> = HashSet::new();
    let mut hours = 0;
    let mut rows = 0;

    for hour in hours_of_date(&day) {
        let Some(reader) = blobs.get(&hourly_key(&hour)).await? else {
            continue;
        };
        hours += 1;

        let mut lines = BufReader::new(reader).lines();
        let mut headers: Option<HashMap<String, usize>> = None;
        while let Some(line) = lines.next_line().await? {
            if line.is_empty() {
                continue;
            }
            let values: Vec<&str> = line.split('\t').collect();
            let Some(headers) = headers.as_ref() else {
                headers = Some(
                    values
                        .iter()
                        .enumerate()
                        .map(|(i, name)| (name.to_string(), i))
                        .collect(),
                );
                continue;
            };
            rows += 1;

            let server_url = column(headers, &values, "serverUrl");
            let download = format!("{}|{}", server_url, column(headers, &values, "audienceId"));
            if !downloads.insert(download) {
                continue;
            }

            let show = shows.lookup(server_url).await?;
            let row: Vec<&str> = DAILY_COLUMNS
                .iter()
                .map(|name| match *name {
                    "showUuid" => show.as_ref().map(|s| s.show_uuid.as_str()).unwrap_or_default(),
                    "episodeId" => show
                        .as_ref()
                        .and_then(|s| s.episode_id.as_deref())
                        .unwrap_or_default(),
                    other => column(headers, &values, other),
                })
                .collect();
            chunks.push(tsv_line(&row));

            if let Some(show) = show.filter(|s| !s.show_uuid.is_empty()) {
                show_chunk_indexes
                    .entry(show.show_uuid)
                    .or_insert_with(|| vec![0])
                    .push(chunks.len() - 1);
            }
        }
    }

    let content_length = write_chunks(blobs, &daily_key(date), &chunks, None).await?;

    let mut show_content_lengths = BTreeMap::new();
    for (show_uuid, indexes) in &show_chunk_indexes {
        let selected = only_resave_show_uuids.map_or(true, |only| only.contains(show_uuid));
        if !selected {
            continue;
        }
        let length =
            write_chunks(blobs, &show_daily_key(date, show_uuid), &chunks, Some(indexes.as_slice()))
                .await?;
        show_content_lengths.insert(show_uuid.clone(), length);
    }

    let result = DailyResult {
        date: date.to_string(),
        hours,
        rows,
        downloads: downloads.len(),
        content_length,
        show_content_lengths,
        millis: started.elapsed().as_millis() as u64,
    };
    tracing::info!(
        date,
        hours,
        rows,
        downloads = result.downloads,
        shows = result.show_content_lengths.len(),
        content_length,
        "computed daily downloads"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::PatternClassifier;
    use podstats_core::hashing::sha256_hex;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs.iter().copied().collect()
    }

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![
            ("uuid", "u1"),
            ("timestamp", "240101050512345"),
            ("hashedIpAddress", "ab"),
            ("method", "GET"),
            ("url", "https://pod.example/e/cdn.example.com/ep1.mp3"),
            ("userAgent", "Overcast/3.0"),
            ("other.country", "NL"),
        ]
    }

    #[test]
    fn test_hourly_row_columns() {
        let row = hourly_row(&record(&base()), &PatternClassifier).unwrap().unwrap();
        assert_eq!(row.values.len(), HOURLY_COLUMNS.len());
        assert_eq!(row.values[0], "https://cdn.example.com/ep1.mp3");
        assert_eq!(row.values[1], sha256_hex("ab|Overcast/3.0||"));
        assert_eq!(row.values[2], "2024-01-01T05:05:12.345Z");
        assert_eq!(row.values[4], "app");
        assert_eq!(row.values[5], "Overcast");
        assert_eq!(row.values[10], "NL");
        assert_eq!(row.download, format!("{}|{}", row.values[0], row.values[1]));
    }

    #[test]
    fn test_hourly_row_drops_non_downloads() {
        let mut head = base();
        head[3] = ("method", "HEAD");
        assert!(hourly_row(&record(&head), &PatternClassifier).unwrap().is_none());

        let mut preflight = base();
        preflight.push(("range", "bytes=0-1"));
        assert!(hourly_row(&record(&preflight), &PatternClassifier).unwrap().is_none());

        let mut real = base();
        real.push(("range", "bytes=0-9"));
        assert!(hourly_row(&record(&real), &PatternClassifier).unwrap().is_some());

        let mut garbled = base();
        garbled.push(("range", "pages=1"));
        assert!(hourly_row(&record(&garbled), &PatternClassifier).unwrap().is_some());
    }

    #[test]
    fn test_browser_referrer_columns() {
        let mut browser = base();
        browser[5] = ("userAgent", "Mozilla/5.0 (Windows NT 10.0) Firefox/121.0");
        browser.push(("referer", "https://news.example.org/story"));
        let row = hourly_row(&record(&browser), &PatternClassifier).unwrap().unwrap();
        assert_eq!(row.values[4], "browser");
        assert_eq!(row.values[8], "domain");
        assert_eq!(row.values[9], "example.org");

        // referrer columns are only filled for browsers
        let mut app = base();
        app.push(("referer", "https://news.example.org/story"));
        let row = hourly_row(&record(&app), &PatternClassifier).unwrap().unwrap();
        assert_eq!(row.values[8], "");
    }

    #[test]
    fn test_unknown_user_agent_keeps_raw_name() {
        let mut unknown = base();
        unknown[5] = ("userAgent", "SomethingNew/1.0");
        let row = hourly_row(&record(&unknown), &PatternClassifier).unwrap().unwrap();
        assert_eq!(row.values[4], "unknown");
        assert_eq!(row.values[5], "SomethingNew/1.0");
    }

    #[test]
    fn test_blob_keys() {
        assert_eq!(hourly_key("2024-01-01T05"), "downloads/hourly/2024-01-01T05.tsv");
        assert_eq!(daily_key("2024-01-01"), "downloads/daily/2024-01-01.tsv");
        assert_eq!(
            show_daily_key("2024-01-01", "s1"),
            "downloads/show-daily/s1/s1-2024-01-01.tsv"
        );
    }
}
