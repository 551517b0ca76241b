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

//! Hashing helpers

use sha2::{Digest, Sha256};

/// Length of a hashed IP address in hex characters.
pub const HASHED_IP_ADDRESS_LEN: usize = 40;

/// Hex SHA-256 of a UTF-8 string.
pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Keyed hash of a client IP address, truncated to 40 hex characters.
pub fn hash_ip_address(raw_ip_address: &str, key: &[u8; 32]) -> String {
    let hash = blake3::keyed_hash(key, raw_ip_address.as_bytes());
    let mut hex = hash.to_hex().to_string();
    hex.truncate(HASHED_IP_ADDRESS_LEN);
    hex
}

/// Audience fingerprint: hash of hashed IP, user agent, referer and request id.
pub fn compute_audience_id(
    hashed_ip_address: &str,
    user_agent: Option<&str>,
    referer: Option<&str>,
    ulid: Option<&str>,
) -> String {
    sha256_hex(&format!(
        "{}|{}|{}|{}",
        hashed_ip_address,
        user_agent.unwrap_or_default(),
        referer.unwrap_or_default(),
        ulid.unwrap_or_default()
    ))
}

/// Whether a string is lowercase hex of the given length.
pub fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
