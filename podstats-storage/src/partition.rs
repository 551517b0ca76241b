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

//! Partition registry
//!
//! Maps partition names to independently locked redirect log stores. Each
//! store serializes its own writes; partitions never share a lock.

use crate::redirect_log::RedirectLogStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use podstats_core::rpc::partition_names;
use podstats_core::{PodstatsError, RecordContext, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// How new partitions are created.
#[derive(Debug, Clone, Default)]
pub struct PartitionConfig {
    /// Root directory for journals; `None` keeps partitions in memory
    pub journal_dir: Option<PathBuf>,
    /// fsync every journal append
    pub sync: bool,
    pub ip_hash_key: [u8; 32],
    pub do_colo: String,
}

/// Registry of open redirect log partitions.
pub struct PartitionRegistry {
    config: PartitionConfig,
    partitions: DashMap<String, Arc<RedirectLogStore>>,
}

impl PartitionRegistry {
    pub fn new(config: PartitionConfig) -> Self {
        Self {
            config,
            partitions: DashMap::new(),
        }
    }

    /// Get a partition, opening (and replaying) it on first use.
    pub fn get_or_open(&self, name: &str) -> Result<Arc<RedirectLogStore>> {
        if let Some(store) = self.partitions.get(name) {
            return Ok(store.clone());
        }
        validate_partition_name(name)?;

        match self.partitions.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let context = RecordContext {
                    ip_hash_key: self.config.ip_hash_key,
                    do_colo: self.config.do_colo.clone(),
                    source: name.to_string(),
                };
                let store = match &self.config.journal_dir {
                    Some(root) => {
                        RedirectLogStore::open(name, context, root.join(name), self.config.sync)?
                    }
                    None => RedirectLogStore::in_memory(name, context),
                };
                tracing::debug!(partition = name, "opened redirect log partition");
                Ok(entry.insert(Arc::new(store)).clone())
            }
        }
    }

    /// An already open partition.
    pub fn get(&self, name: &str) -> Option<Arc<RedirectLogStore>> {
        self.partitions.get(name).map(|store| store.clone())
    }

    /// Names of open partitions, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.partitions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

fn validate_partition_name(name: &str) -> Result<()> {
    if !partition_names::is_redirect_log(name) {
        return Err(PodstatsError::Lookup(format!(
            "not a redirect log partition: {}",
            name
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(PodstatsError::Validation(format!(
            "bad partition name: {:?}",
            name
        )));
    }
    Ok(())
}
