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

//! In-process transport to a [`Backend`]
//!
//! Backend calls may fsync a journal, so they run on the blocking pool.

use crate::backend::Backend;
use async_trait::async_trait;
use podstats_core::{PodstatsError, Result, RpcRequest, RpcResponse, RpcTransport};
use std::sync::Arc;

#[derive(Clone)]
pub struct LocalTransport {
    backend: Arc<Backend>,
}

impl LocalTransport {
    pub fn new(backend: Arc<Backend>) -> Self {
        Self { backend }
    }

    /// Handle a request received as JSON.
    ///
    /// Requests with an unknown kind or bad fields are answered with a 400
    /// error response without reaching the backend.
    pub fn send_json(&self, request: serde_json::Value, target: &str) -> Result<serde_json::Value> {
        let response = match RpcRequest::from_json(request) {
            Ok(request) => self.backend.handle(request, target),
            Err(e) => RpcResponse::Error {
                status: 400,
                message: e.to_string(),
            },
        };
        Ok(serde_json::to_value(response)?)
    }
}

#[async_trait]
impl RpcTransport for LocalTransport {
    async fn send(&self, request: RpcRequest, target: &str) -> Result<RpcResponse> {
        if target.is_empty() {
            return Err(PodstatsError::Transport("no target partition".to_string()));
        }
        let backend = self.backend.clone();
        let target = target.to_string();
        tokio::task::spawn_blocking(move || backend.handle(request, &target))
            .await
            .map_err(|e| PodstatsError::Internal(format!("backend task failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podstats_storage::PartitionConfig;
    use serde_json::json;

    fn transport() -> LocalTransport {
        LocalTransport::new(Arc::new(Backend::new(PartitionConfig::default())))
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let response = transport()
            .send_json(json!({ "kind": "drop-tables" }), "registry")
            .unwrap();
        assert_eq!(response["kind"], "error");
        assert_eq!(response["status"], 400);
    }

    #[test]
    fn test_json_round_trip() {
        let response = transport()
            .send_json(
                json!({ "kind": "get-new-redirect-logs", "limit": 5 }),
                "combined-redirect-log",
            )
            .unwrap();
        assert_eq!(response["kind"], "packed-redirect-logs");
        assert_eq!(response["records"], json!({}));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_send_runs_backend_on_blocking_pool() {
        let transport = transport();
        let request = RpcRequest::GetNewRedirectLogs {
            limit: 5,
            start_after_timestamp_id: None,
        };
        let response = transport.send(request, "combined-redirect-log").await.unwrap();
        assert!(matches!(response, RpcResponse::PackedRedirectLogs(_)));
        assert_eq!(transport.backend.partitions().names(), vec!["combined-redirect-log"]);
    }

    #[tokio::test]
    async fn test_empty_target_is_a_transport_error() {
        let result = transport().send(RpcRequest::AdminGetMetrics, "").await;
        assert!(matches!(result, Err(PodstatsError::Transport(_))));
    }
}
