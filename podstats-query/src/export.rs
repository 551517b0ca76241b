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

//! Export formatting for redirect log query results

use podstats_core::timestamp::timestamp_to_instant;
use podstats_core::{attributes, AttNums, PackedRedirectLogs, PodstatsError, Record, Result};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Columns of an exported redirect log, in order.
pub const EXPORT_COLUMNS: &[&str] = &[
    "uuid",
    "time",
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

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// Header line then tab-separated rows
    #[default]
    Tsv,
    /// Array of objects keyed by column
    JsonObjects,
    /// Header array then one value array per row
    JsonArrays,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Tsv => "text/tab-separated-values",
            ExportFormat::JsonObjects | ExportFormat::JsonArrays => "application/json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = PodstatsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tsv" => Ok(ExportFormat::Tsv),
            "json-o" => Ok(ExportFormat::JsonObjects),
            "json-a" => Ok(ExportFormat::JsonArrays),
            other => Err(PodstatsError::Validation(format!("bad format: {}", other))),
        }
    }
}

/// Replace characters that would break a tab-separated row.
pub fn sanitize_tsv_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect()
}

fn row_of(record: &Record) -> Result<Vec<String>> {
    EXPORT_COLUMNS
        .iter()
        .map(|column| match *column {
            "time" => record
                .get(attributes::TIMESTAMP)
                .map(timestamp_to_instant)
                .transpose()
                .map(Option::unwrap_or_default),
            name => Ok(record.get(name).unwrap_or_default().to_string()),
        })
        .collect()
}

/// Render query results in the requested format.
///
/// Records that fail to unpack are skipped and logged.
pub fn export_redirect_logs(logs: &PackedRedirectLogs, format: ExportFormat) -> Result<String> {
    let att_nums = AttNums::from_json(logs.names_to_nums.clone())?;
    let mut rows = Vec::with_capacity(logs.records.len());
    for (id, packed) in &logs.records {
        match att_nums.unpack_record(packed).and_then(|record| row_of(&record)) {
            Ok(row) => rows.push(row),
            Err(e) => tracing::warn!(timestamp_id = %id, error = %e, "skipping malformed record"),
        }
    }

    let body = match format {
        ExportFormat::Tsv => {
            let mut out = EXPORT_COLUMNS.join("\t");
            out.push('\n');
            for row in rows {
                let values: Vec<String> = row.iter().map(|v| sanitize_tsv_value(v)).collect();
                out.push_str(&values.join("\t"));
                out.push('\n');
            }
            out
        }
        ExportFormat::JsonObjects => {
            let objects: Vec<Value> = rows
                .into_iter()
                .map(|row| {
                    let object: Map<String, Value> = EXPORT_COLUMNS
                        .iter()
                        .zip(row)
                        .filter(|(_, value)| !value.is_empty())
                        .map(|(column, value)| (column.to_string(), Value::String(value)))
                        .collect();
                    Value::Object(object)
                })
                .collect();
            serde_json::to_string(&objects)?
        }
        ExportFormat::JsonArrays => {
            let mut arrays: Vec<Vec<String>> = vec![EXPORT_COLUMNS.iter().map(|c| c.to_string()).collect()];
            arrays.extend(rows);
            serde_json::to_string(&arrays)?
        }
    };
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use podstats_core::TimestampId;

    fn logs() -> PackedRedirectLogs {
        let mut att_nums = AttNums::for_redirect_logs();
        let record: Record = [
            ("uuid", "u1"),
            ("timestamp", "240101050512345"),
            ("method", "GET"),
            ("url", "https://a.com/x.mp3"),
            ("userAgent", "Overcast/3.0"),
        ]
        .into_iter()
        .collect();
        let packed = att_nums.pack_record(&record).unwrap();
        PackedRedirectLogs {
            names_to_nums: att_nums.to_json(),
            records: [(TimestampId::new(1_704_085_512_345, 0).unwrap(), packed)]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn test_tsv_export() {
        let body = export_redirect_logs(&logs(), ExportFormat::Tsv).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], EXPORT_COLUMNS.join("\t"));
        let values: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(values.len(), EXPORT_COLUMNS.len());
        assert_eq!(values[0], "u1");
        assert_eq!(values[1], "2024-01-01T05:05:12.345Z");
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_json_exports() {
        let objects: Value =
            serde_json::from_str(&export_redirect_logs(&logs(), ExportFormat::JsonObjects).unwrap()).unwrap();
        assert_eq!(objects[0]["method"], "GET");
        assert!(objects[0].get("referer").is_none());

        let arrays: Vec<Vec<String>> =
            serde_json::from_str(&export_redirect_logs(&logs(), ExportFormat::JsonArrays).unwrap()).unwrap();
        assert_eq!(arrays.len(), 2);
        assert_eq!(arrays[0][0], "uuid");
        assert_eq!(arrays[1][4], "https://a.com/x.mp3");
    }

    #[test]
    fn test_format_names() {
        assert_eq!("json-a".parse::<ExportFormat>().unwrap(), ExportFormat::JsonArrays);
        assert!("xml".parse::<ExportFormat>().is_err());
        assert_eq!(sanitize_tsv_value("a\tb\nc"), "a b c");
    }
}
