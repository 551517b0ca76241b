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

//! Key server partition
//!
//! Hands out one random key per `(key kind, UTC date)`. Callers that stored a
//! key id alongside their data can fetch the same key again by id.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use podstats_core::timestamp::parse_instant;
use podstats_core::{KeyKind, PodstatsError, Result};
use rand::RngCore;
use std::collections::BTreeMap;

const KEY_LEN: usize = 32;

#[derive(Debug, Clone)]
struct StoredKey {
    id: String,
    raw: [u8; KEY_LEN],
}

#[derive(Debug, Default)]
pub struct KeyServer {
    keys: Mutex<BTreeMap<(KeyKind, String), StoredKey>>,
}

impl KeyServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(key_id, raw_key_base64)` for the date of `timestamp`.
    pub fn get_key(
        &self,
        key_kind: KeyKind,
        timestamp: &str,
        id: Option<&str>,
    ) -> Result<(String, String)> {
        let mut keys = self.keys.lock();
        if let Some(id) = id {
            let key = keys
                .iter()
                .find(|((kind, _), key)| *kind == key_kind && key.id == id)
                .map(|(_, key)| key)
                .ok_or_else(|| PodstatsError::Lookup(format!("unknown key id: {}", id)))?;
            return Ok((key.id.clone(), STANDARD.encode(key.raw)));
        }

        let date = parse_instant(timestamp)?.format("%Y-%m-%d").to_string();
        let key = keys.entry((key_kind, date.clone())).or_insert_with(|| {
            let mut rng = rand::thread_rng();
            let mut raw = [0u8; KEY_LEN];
            rng.fill_bytes(&mut raw);
            let mut suffix = [0u8; 4];
            rng.fill_bytes(&mut suffix);
            let id = format!("{}-{}", date.replace('-', ""), hex::encode(suffix));
            tracing::info!(?key_kind, key_id = %id, "generated key");
            StoredKey { id, raw }
        });
        Ok((key.id.clone(), STANDARD.encode(key.raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_per_kind_and_date() {
        let server = KeyServer::new();
        let (a, raw_a) = server
            .get_key(KeyKind::IpAddressHmac, "2024-01-01T05:00:00.000Z", None)
            .unwrap();
        let (b, raw_b) = server
            .get_key(KeyKind::IpAddressHmac, "2024-01-01T23:59:59.999Z", None)
            .unwrap();
        assert_eq!((a.as_str(), raw_a.as_str()), (b.as_str(), raw_b.as_str()));
        assert!(a.starts_with("20240101-"));
        assert_eq!(STANDARD.decode(&raw_a).unwrap().len(), KEY_LEN);

        let (next_day, _) = server
            .get_key(KeyKind::IpAddressHmac, "2024-01-02T00:00:00.000Z", None)
            .unwrap();
        assert_ne!(next_day, a);
        let (other_kind, _) = server
            .get_key(KeyKind::IpAddressAes, "2024-01-01T05:00:00.000Z", None)
            .unwrap();
        assert_ne!(other_kind, a);
    }

    #[test]
    fn test_lookup_by_id() {
        let server = KeyServer::new();
        let (id, raw) = server
            .get_key(KeyKind::IpAddressAes, "2024-01-01T05:00:00.000Z", None)
            .unwrap();
        let found = server
            .get_key(KeyKind::IpAddressAes, "2030-01-01T00:00:00.000Z", Some(&id))
            .unwrap();
        assert_eq!(found, (id.clone(), raw));

        assert!(matches!(
            server.get_key(KeyKind::IpAddressHmac, "2024-01-01T05:00:00.000Z", Some(&id)),
            Err(PodstatsError::Lookup(_))
        ));
        assert!(matches!(
            server.get_key(KeyKind::IpAddressAes, "not a time", None),
            Err(PodstatsError::Parse(_)) | Err(PodstatsError::Validation(_))
        ));
    }
}
