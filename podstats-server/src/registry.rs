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

//! Registry partition: last known info about every partition that has
//! announced itself.

use parking_lot::RwLock;
use podstats_core::timestamp::parse_instant;
use podstats_core::{PartitionChange, PartitionInfo, Result};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct PartitionInfoRegistry {
    infos: RwLock<BTreeMap<String, PartitionInfo>>,
}

impl PartitionInfoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or update a partition's info.
    ///
    /// `firstSeen` keeps the earliest value seen; a changed name or colo is
    /// appended to the partition's change list.
    pub fn register(&self, info: PartitionInfo) -> Result<()> {
        let first_seen = parse_instant(&info.first_seen)?;
        let last_seen = parse_instant(&info.last_seen)?;

        let mut infos = self.infos.write();
        match infos.get_mut(&info.id) {
            None => {
                tracing::debug!(id = %info.id, name = %info.name, colo = %info.colo, "registered partition");
                infos.insert(info.id.clone(), info);
            }
            Some(existing) => {
                for (name, old, new) in [
                    ("name", &mut existing.name, &info.name),
                    ("colo", &mut existing.colo, &info.colo),
                ] {
                    if old != new {
                        *old = new.clone();
                        existing.changes.push(PartitionChange {
                            name: name.to_string(),
                            value: new.clone(),
                            time: info.last_seen.clone(),
                        });
                    }
                }
                for change in info.changes {
                    if !existing.changes.contains(&change) {
                        existing.changes.push(change);
                    }
                }
                if parse_instant(&existing.first_seen).map_or(true, |t| first_seen < t) {
                    existing.first_seen = info.first_seen;
                }
                if parse_instant(&existing.last_seen).map_or(true, |t| last_seen > t) {
                    existing.last_seen = info.last_seen;
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<PartitionInfo> {
        self.infos.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.infos.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.read().is_empty()
    }
}
