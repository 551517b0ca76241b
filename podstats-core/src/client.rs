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

//! RPC transport abstraction and typed client

use crate::error::{PodstatsError, Result};
use crate::event::RawRedirectEvent;
use crate::rpc::{
    AlarmPayload, KeyKind, LogMetrics, PackedRedirectLogs, PartitionInfo,
    QueryRedirectLogsRequest, RebuildIndexResult, RpcRequest, RpcResponse,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Delivers a request to a named partition and returns its response.
///
/// Every call is request/response, including notifications.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send(&self, request: RpcRequest, target: &str) -> Result<RpcResponse>;
}

/// Typed wrapper over an [`RpcTransport`].
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    async fn call(&self, request: RpcRequest, target: &str) -> Result<RpcResponse> {
        let kind = request.kind();
        match self.transport.send(request, target).await? {
            RpcResponse::Error { status, message } => {
                tracing::debug!(kind, partition = target, status, "rpc call failed");
                Err(PodstatsError::Status { status, message })
            }
            response => Ok(response),
        }
    }

    async fn call_ok(&self, request: RpcRequest, target: &str) -> Result<()> {
        match self.call(request, target).await? {
            RpcResponse::Ok => Ok(()),
            other => Err(unexpected("ok", &other)),
        }
    }

    async fn call_logs(&self, request: RpcRequest, target: &str) -> Result<PackedRedirectLogs> {
        match self.call(request, target).await? {
            RpcResponse::PackedRedirectLogs(logs) => Ok(logs),
            other => Err(unexpected("packed-redirect-logs", &other)),
        }
    }

    pub async fn log_raw_redirects(
        &self,
        raw_redirects: Vec<RawRedirectEvent>,
        target: &str,
    ) -> Result<()> {
        self.call_ok(RpcRequest::LogRawRedirects { raw_redirects }, target)
            .await
    }

    pub async fn query_redirect_logs(
        &self,
        request: QueryRedirectLogsRequest,
        target: &str,
    ) -> Result<PackedRedirectLogs> {
        self.call_logs(RpcRequest::QueryRedirectLogs(request), target)
            .await
    }

    pub async fn get_new_redirect_logs(
        &self,
        limit: usize,
        start_after_timestamp_id: Option<String>,
        target: &str,
    ) -> Result<PackedRedirectLogs> {
        self.call_logs(
            RpcRequest::GetNewRedirectLogs {
                limit,
                start_after_timestamp_id,
            },
            target,
        )
        .await
    }

    pub async fn admin_rebuild_index(
        &self,
        index_name: &str,
        start: &str,
        inclusive: bool,
        limit: usize,
        target: &str,
    ) -> Result<RebuildIndexResult> {
        let request = RpcRequest::AdminRebuildIndex {
            index_name: index_name.to_string(),
            start: start.to_string(),
            inclusive,
            limit,
        };
        match self.call(request, target).await? {
            RpcResponse::AdminRebuildIndex(result) => Ok(result),
            other => Err(unexpected("admin-rebuild-index", &other)),
        }
    }

    pub async fn admin_get_metrics(&self, target: &str) -> Result<LogMetrics> {
        match self.call(RpcRequest::AdminGetMetrics, target).await? {
            RpcResponse::AdminMetrics(metrics) => Ok(metrics),
            other => Err(unexpected("admin-metrics", &other)),
        }
    }

    pub async fn send_redirect_logs_notification(
        &self,
        partition_name: &str,
        timestamp_id: &str,
        from_colo: &str,
        target: &str,
    ) -> Result<()> {
        let request = RpcRequest::RedirectLogsNotification {
            partition_name: partition_name.to_string(),
            timestamp_id: timestamp_id.to_string(),
            from_colo: from_colo.to_string(),
        };
        self.call_ok(request, target).await
    }

    pub async fn send_alarm(
        &self,
        payload: AlarmPayload,
        from_isolate_id: &str,
        target: &str,
    ) -> Result<()> {
        let request = RpcRequest::Alarm {
            payload,
            from_isolate_id: from_isolate_id.to_string(),
        };
        self.call_ok(request, target).await
    }

    pub async fn register_partition(&self, info: PartitionInfo, target: &str) -> Result<()> {
        self.call_ok(RpcRequest::RegisterPartition { info }, target)
            .await
    }

    /// Returns `(key_id, raw_key_base64)`.
    pub async fn get_key(
        &self,
        key_kind: KeyKind,
        timestamp: &str,
        id: Option<String>,
        target: &str,
    ) -> Result<(String, String)> {
        let request = RpcRequest::GetKey {
            key_kind,
            timestamp: timestamp.to_string(),
            id,
        };
        match self.call(request, target).await? {
            RpcResponse::GetKey {
                key_id,
                raw_key_base64,
            } => Ok((key_id, raw_key_base64)),
            other => Err(unexpected("get-key", &other)),
        }
    }
}

fn unexpected(expected: &str, response: &RpcResponse) -> PodstatsError {
    PodstatsError::Transport(format!(
        "expected {} response, found {}",
        expected,
        response.kind()
    ))
}
