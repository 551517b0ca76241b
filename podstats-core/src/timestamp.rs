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

//! Compact timestamps and instants
//!
//! Stored records carry a 15 character UTC timestamp, `yyMMddHHmmssSSS`,
//! which sorts lexicographically in time order. Only instants in the years
//! 2000 through 2099 have one; anything else is rejected.

use crate::error::{PodstatsError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Length of a compact timestamp.
pub const TIMESTAMP_LEN: usize = 15;

const COMPACT_FORMAT: &str = "%y%m%d%H%M%S%3f";

/// Years a compact timestamp can represent.
const COMPACT_YEARS: std::ops::RangeInclusive<i32> = 2000..=2099;

fn check_compact_year(instant: &DateTime<Utc>) -> Result<()> {
    if COMPACT_YEARS.contains(&instant.year()) {
        Ok(())
    } else {
        Err(PodstatsError::Validation(format!(
            "instant out of range: {}",
            format_instant(instant)
        )))
    }
}

/// Format epoch millis as a compact timestamp.
pub fn timestamp_from_millis(millis: i64) -> Result<String> {
    let dt = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| PodstatsError::Validation(format!("bad epoch millis: {}", millis)))?;
    check_compact_year(&dt)?;
    Ok(timestamp_from_instant(&dt))
}

/// Format an instant as a compact timestamp.
pub fn timestamp_from_instant(instant: &DateTime<Utc>) -> String {
    instant.format(COMPACT_FORMAT).to_string()
}

/// Parse a compact timestamp.
pub fn parse_timestamp(timestamp: &str) -> Result<DateTime<Utc>> {
    let bad = || PodstatsError::Parse(format!("bad timestamp: {:?}", timestamp));
    if timestamp.len() != TIMESTAMP_LEN || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let field = |range: std::ops::Range<usize>| -> u32 {
        timestamp[range].parse().unwrap_or(u32::MAX)
    };
    let date = NaiveDate::from_ymd_opt(2000 + field(0..2) as i32, field(2..4), field(4..6))
        .ok_or_else(bad)?;
    let time = date
        .and_hms_milli_opt(field(6..8), field(8..10), field(10..12), field(12..15))
        .ok_or_else(bad)?;
    Ok(Utc.from_utc_datetime(&time))
}

/// Convert a compact timestamp to an ISO-8601 instant.
pub fn timestamp_to_instant(timestamp: &str) -> Result<String> {
    Ok(format_instant(&parse_timestamp(timestamp)?))
}

/// Format an instant as `yyyy-MM-ddTHH:mm:ss.SSSZ`.
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parse an RFC 3339 instant within the compact timestamp years.
pub fn parse_instant(instant: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(instant)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PodstatsError::Parse(format!("bad instant {:?}: {}", instant, e)))?;
    check_compact_year(&parsed)?;
    Ok(parsed)
}

/// Parse an hour of the form `yyyy-MM-ddTHH` into its starting instant.
pub fn parse_hour(hour: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(&format!("{}:00:00", hour), "%Y-%m-%dT%H:%M:%S")
        .map(|dt| Utc.from_utc_datetime(&dt))
        .map_err(|_| PodstatsError::Validation(format!("Bad hour: {}", hour)))
}

/// Parse a date of the form `yyyy-MM-dd`.
pub fn parse_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| PodstatsError::Validation(format!("Bad date: {}", date)))
}

/// The 24 hour strings of a date, `yyyy-MM-ddT00` through `yyyy-MM-ddT23`.
pub fn hours_of_date(date: &NaiveDate) -> Vec<String> {
    (0..24)
        .map(|h| format!("{}T{:02}", date.format("%Y-%m-%d"), h))
        .collect()
}

/// Add whole hours to an instant.
pub fn add_hours(instant: &DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    *instant + Duration::hours(hours)
}
