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

//! RPC backend
//!
//! Every request is matched on `(request kind, target partition)` to exactly
//! one handler. Redirect log partitions are opened on first use; the
//! registry and key server are singletons.
//!
//! A notification sent to the combined log names a per-location partition;
//! the combined log then copies that partition's new records, resuming after
//! the last id it copied from the same source.
//!
//! At the boundary, a [`PodstatsError::Status`] crosses unchanged as an
//! error response. Every other failure is logged here and reported as a
//! generic internal error.

use crate::key_server::KeyServer;
use crate::registry::PartitionInfoRegistry;
use dashmap::DashMap;
use podstats_core::rpc::partition_names;
use podstats_core::{
    PodstatsError, Result, RpcRequest, RpcResponse, TimestampId, INTERNAL_ERROR_MESSAGE,
};
use podstats_storage::{LogQuery, PartitionConfig, PartitionRegistry};
use std::collections::VecDeque;

/// Signals kept per receiving partition.
const MAX_SIGNALS: usize = 100;

/// Records copied per page when the combined log pulls from a source.
const PULL_BATCH: usize = 1000;

/// A notification or alarm received by a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Notification {
        partition_name: String,
        timestamp_id: String,
        from_colo: String,
    },
    Alarm {
        kind: String,
        from_isolate_id: String,
    },
}

enum Target<'a> {
    RedirectLog(&'a str),
    Registry,
    KeyServer,
    Service,
    Unknown,
}

impl<'a> Target<'a> {
    fn of(name: &'a str) -> Self {
        match name {
            partition_names::REGISTRY => Target::Registry,
            partition_names::KEY_SERVER => Target::KeyServer,
            partition_names::API_KEY_SERVER | partition_names::SHOW_SERVER => Target::Service,
            name if partition_names::is_redirect_log(name) => Target::RedirectLog(name),
            _ => Target::Unknown,
        }
    }
}

pub struct Backend {
    partitions: PartitionRegistry,
    registry: PartitionInfoRegistry,
    keys: KeyServer,
    signals: DashMap<String, VecDeque<Signal>>,
    /// Last id copied into the combined log, per source partition.
    cursors: DashMap<String, Option<TimestampId>>,
}

impl Backend {
    pub fn new(config: PartitionConfig) -> Self {
        Self {
            partitions: PartitionRegistry::new(config),
            registry: PartitionInfoRegistry::new(),
            keys: KeyServer::new(),
            signals: DashMap::new(),
            cursors: DashMap::new(),
        }
    }

    pub fn partitions(&self) -> &PartitionRegistry {
        &self.partitions
    }

    pub fn registry(&self) -> &PartitionInfoRegistry {
        &self.registry
    }

    /// Signals received by `target`, oldest first.
    pub fn signals(&self, target: &str) -> Vec<Signal> {
        self.signals
            .get(target)
            .map(|signals| signals.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Handle one request; never fails.
    pub fn handle(&self, request: RpcRequest, target: &str) -> RpcResponse {
        let kind = request.kind();
        match self.dispatch(request, target) {
            Ok(response) => response,
            Err(PodstatsError::Status { status, message }) => {
                tracing::debug!(kind, partition = target, status, "rpc returned status");
                RpcResponse::Error { status, message }
            }
            Err(e) => {
                tracing::error!(kind, partition = target, error = %e, "rpc handler failed");
                RpcResponse::Error {
                    status: 500,
                    message: INTERNAL_ERROR_MESSAGE.to_string(),
                }
            }
        }
    }

    fn dispatch(&self, request: RpcRequest, target: &str) -> Result<RpcResponse> {
        match (request, Target::of(target)) {
            (_, Target::Unknown) => Err(PodstatsError::status(
                404,
                format!("unknown partition: {}", target),
            )),
            (RpcRequest::LogRawRedirects { raw_redirects }, Target::RedirectLog(name)) => {
                let appended = self.partitions.get_or_open(name)?.append_batch(&raw_redirects)?;
                tracing::debug!(
                    partition = name,
                    received = raw_redirects.len(),
                    appended = appended.len(),
                    "logged raw redirects"
                );
                Ok(RpcResponse::Ok)
            }
            (RpcRequest::QueryRedirectLogs(request), Target::RedirectLog(name)) => {
                let query = LogQuery::try_from(&request)?;
                let logs = self.partitions.get_or_open(name)?.query(&query)?;
                Ok(RpcResponse::PackedRedirectLogs(logs))
            }
            (
                RpcRequest::GetNewRedirectLogs {
                    limit,
                    start_after_timestamp_id,
                },
                Target::RedirectLog(name),
            ) => {
                let start_after = start_after_timestamp_id
                    .as_deref()
                    .map(TimestampId::parse)
                    .transpose()?;
                let logs = self.partitions.get_or_open(name)?.get_new(limit, start_after)?;
                Ok(RpcResponse::PackedRedirectLogs(logs))
            }
            (
                RpcRequest::AdminRebuildIndex {
                    index_name,
                    start,
                    inclusive,
                    limit,
                },
                Target::RedirectLog(name),
            ) => {
                let result = self
                    .partitions
                    .get_or_open(name)?
                    .rebuild_index(&index_name, &start, inclusive, limit)?;
                Ok(RpcResponse::AdminRebuildIndex(result))
            }
            (RpcRequest::AdminGetMetrics, Target::RedirectLog(name)) => Ok(
                RpcResponse::AdminMetrics(self.partitions.get_or_open(name)?.metrics()),
            ),
            (
                RpcRequest::RedirectLogsNotification {
                    partition_name,
                    timestamp_id,
                    from_colo,
                },
                _,
            ) => {
                if target == partition_names::COMBINED_REDIRECT_LOG {
                    self.pull_into_combined(&partition_name)?;
                }
                self.record_signal(
                    target,
                    Signal::Notification {
                        partition_name,
                        timestamp_id,
                        from_colo,
                    },
                );
                Ok(RpcResponse::Ok)
            }
            (
                RpcRequest::Alarm {
                    payload,
                    from_isolate_id,
                },
                _,
            ) => {
                tracing::warn!(
                    partition = target,
                    alarm = %payload.kind,
                    from = %from_isolate_id,
                    "alarm received"
                );
                self.record_signal(
                    target,
                    Signal::Alarm {
                        kind: payload.kind,
                        from_isolate_id,
                    },
                );
                Ok(RpcResponse::Ok)
            }
            (RpcRequest::RegisterPartition { info }, Target::Registry) => {
                self.registry.register(info)?;
                Ok(RpcResponse::Ok)
            }
            (
                RpcRequest::GetKey {
                    key_kind,
                    timestamp,
                    id,
                },
                Target::KeyServer,
            ) => {
                let (key_id, raw_key_base64) =
                    self.keys.get_key(key_kind, &timestamp, id.as_deref())?;
                Ok(RpcResponse::GetKey {
                    key_id,
                    raw_key_base64,
                })
            }
            (request, _) => Err(PodstatsError::status(
                400,
                format!("{} is not handled by {}", request.kind(), target),
            )),
        }
    }

    /// Copy new records from `source` into the combined log.
    ///
    /// The cursor only advances past pages that were stored, so a failed pull
    /// is retried from the same point by the next notification.
    fn pull_into_combined(&self, source: &str) -> Result<usize> {
        if source == partition_names::COMBINED_REDIRECT_LOG
            || !partition_names::is_redirect_log(source)
        {
            return Err(PodstatsError::status(
                400,
                format!("cannot pull redirect logs from {}", source),
            ));
        }
        let from = self.partitions.get_or_open(source)?;
        let combined = self
            .partitions
            .get_or_open(partition_names::COMBINED_REDIRECT_LOG)?;

        let mut cursor = self.cursors.entry(source.to_string()).or_insert(None);
        let mut copied = 0;
        loop {
            let page = from.get_new(PULL_BATCH, cursor.value().clone())?;
            let fetched = page.records.len();
            copied += combined.append_packed(&page)?.len();
            if let Some(last) = page.records.keys().next_back() {
                *cursor = Some(last.clone());
            }
            if fetched < PULL_BATCH {
                break;
            }
        }
        tracing::debug!(partition = source, copied, "pulled into combined log");
        Ok(copied)
    }

    fn record_signal(&self, target: &str, signal: Signal) {
        let mut signals = self.signals.entry(target.to_string()).or_default();
        if signals.len() >= MAX_SIGNALS {
            signals.pop_front();
        }
        signals.push_back(signal);
    }
}
