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

//! Timestamp ids
//!
//! A [`TimestampId`] is the primary sort key of a redirect log partition and
//! doubles as its pagination cursor:
//!
//! ```text
//! {yyMMddHHmmssSSS}{sequence:05}
//! ```
//!
//! Ids sort lexicographically. The compact timestamp prefix also makes any
//! timestamp string a valid range bound: every id within a millisecond sorts
//! at or after that millisecond's timestamp and before the next one.

use crate::error::{PodstatsError, Result};
use crate::timestamp::{parse_timestamp, timestamp_from_millis, TIMESTAMP_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;

const SEQUENCE_LEN: usize = 5;
const MAX_SEQUENCE: u32 = 99_999;

/// Sortable partition key combining event time and a tie-breaking sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimestampId(String);

impl TimestampId {
    /// Build an id from epoch millis and a sequence number.
    pub fn new(millis: i64, sequence: u32) -> Result<Self> {
        if sequence > MAX_SEQUENCE {
            return Err(PodstatsError::Validation(format!(
                "sequence out of range: {}",
                sequence
            )));
        }
        Ok(Self(format!(
            "{}{:0width$}",
            timestamp_from_millis(millis)?,
            sequence,
            width = SEQUENCE_LEN
        )))
    }

    /// Parse and validate an id string.
    pub fn parse(value: &str) -> Result<Self> {
        if value.len() != TIMESTAMP_LEN + SEQUENCE_LEN
            || !value.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(PodstatsError::Parse(format!("bad timestampId: {:?}", value)));
        }
        parse_timestamp(&value[..TIMESTAMP_LEN])?;
        Ok(Self(value.to_string()))
    }

    /// A value usable only as a range bound, such as a compact timestamp.
    pub fn range_bound(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The compact timestamp prefix.
    pub fn timestamp(&self) -> &str {
        &self.0[..TIMESTAMP_LEN.min(self.0.len())]
    }

    /// Epoch millis of the timestamp prefix.
    pub fn millis(&self) -> i64 {
        parse_timestamp(self.timestamp())
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_default()
    }

    pub fn sequence(&self) -> u32 {
        self.0
            .get(TIMESTAMP_LEN..)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TimestampId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Allocates strictly increasing ids for one partition.
///
/// Event times that go backwards are clamped to the last allocated
/// millisecond, so insertion order always wins.
#[derive(Debug, Default, Clone)]
pub struct TimestampIdGenerator {
    last: Option<(i64, u32)>,
}

impl TimestampIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume after an existing id.
    pub fn resume_after(last: &TimestampId) -> Self {
        Self {
            last: Some((last.millis(), last.sequence())),
        }
    }

    /// Allocate the next id for an event at `millis`.
    pub fn next(&mut self, millis: i64) -> Result<TimestampId> {
        let (millis, sequence) = match self.last {
            Some((last_millis, last_seq)) if millis <= last_millis => {
                if last_seq >= MAX_SEQUENCE {
                    (last_millis + 1, 0)
                } else {
                    (last_millis, last_seq + 1)
                }
            }
            _ => (millis, 0),
        };
        let id = TimestampId::new(millis, sequence)?;
        self.last = Some((millis, sequence));
        Ok(id)
    }
}
