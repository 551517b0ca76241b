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

//! HTTP `Range` header parsing
//!
//! Used to recognise preflight requests that fetch only a byte or two of an
//! episode.

/// One requested byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `start-end`, inclusive
    Bounded { start: u64, end: u64 },
    /// `start-`
    From { start: u64 },
    /// `-suffix`
    Suffix { length: u64 },
}

impl ByteRange {
    /// Estimated number of bytes covered by the range.
    ///
    /// Open-ended ranges are unbounded.
    pub fn estimated_size(&self) -> u64 {
        match *self {
            ByteRange::Bounded { start, end } => end.saturating_sub(start).saturating_add(1),
            ByteRange::From { .. } => u64::MAX,
            ByteRange::Suffix { length } => length,
        }
    }
}

/// Parse a `bytes=` range header. Returns `None` for anything unparsable.
pub fn try_parse_range_header(value: &str) -> Option<Vec<ByteRange>> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let mut ranges = Vec::new();
    for part in spec.split(',') {
        let (start, end) = part.trim().split_once('-')?;
        let range = match (start.trim(), end.trim()) {
            ("", "") => return None,
            ("", length) => ByteRange::Suffix {
                length: length.parse().ok()?,
            },
            (start, "") => ByteRange::From {
                start: start.parse().ok()?,
            },
            (start, end) => {
                let start: u64 = start.parse().ok()?;
                let end: u64 = end.parse().ok()?;
                if end < start {
                    return None;
                }
                ByteRange::Bounded { start, end }
            }
        };
        ranges.push(range);
    }
    Some(ranges)
}

/// Whether a range header asks for no more than `max_bytes` in every range.
///
/// Unparsable headers never count as preflight requests.
pub fn is_preflight_range(value: &str, max_bytes: u64) -> bool {
    match try_parse_range_header(value) {
        Some(ranges) => !ranges.iter().any(|r| r.estimated_size() > max_bytes),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_header() {
        assert_eq!(
            try_parse_range_header("bytes=0-1"),
            Some(vec![ByteRange::Bounded { start: 0, end: 1 }])
        );
        assert_eq!(
            try_parse_range_header("bytes=100-, -500"),
            Some(vec![ByteRange::From { start: 100 }, ByteRange::Suffix { length: 500 }])
        );
        assert_eq!(try_parse_range_header("bytes=5-1"), None);
        assert_eq!(try_parse_range_header("items=0-1"), None);
        assert_eq!(try_parse_range_header("bytes=-"), None);
    }

    #[test]
    fn test_is_preflight_range() {
        assert!(is_preflight_range("bytes=0-0", 2));
        assert!(is_preflight_range("bytes=0-1", 2));
        assert!(!is_preflight_range("bytes=0-9", 2));
        assert!(!is_preflight_range("bytes=0-", 2));
        assert!(!is_preflight_range("bytes=0-1, 100-200", 2));
        assert!(!is_preflight_range("garbage", 2));
    }
}
