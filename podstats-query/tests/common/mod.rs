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

// Shared fixtures for the podstats-query integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use podstats_core::{PodstatsError, RawRedirectEvent, Result, RpcRequest, RpcResponse, RpcTransport};
use podstats_storage::{LogQuery, RedirectLogStore};
use std::collections::BTreeMap;
use std::sync::Arc;

// 2024-01-01T05:05:12.345Z
pub const T0: i64 = 1_704_085_512_345;

/// Routes log requests straight to one store.
pub struct StoreTransport {
    pub store: Arc<RedirectLogStore>,
}

#[async_trait]
impl RpcTransport for StoreTransport {
    async fn send(&self, request: RpcRequest, _target: &str) -> Result<RpcResponse> {
        match request {
            RpcRequest::QueryRedirectLogs(request) => Ok(RpcResponse::PackedRedirectLogs(
                self.store.query(&LogQuery::try_from(&request)?)?,
            )),
            RpcRequest::LogRawRedirects { raw_redirects } => {
                self.store.append_batch(&raw_redirects)?;
                Ok(RpcResponse::Ok)
            }
            other => Err(PodstatsError::Transport(format!("unexpected {}", other.kind()))),
        }
    }
}

pub fn event(uuid: &str, offset: i64, ip: &str, range: Option<&str>) -> RawRedirectEvent {
    RawRedirectEvent {
        uuid: uuid.to_string(),
        time: T0 + offset,
        raw_ip_address: ip.to_string(),
        method: "GET".to_string(),
        url: "https://pod.example/e/cdn.example.com/show/ep1.mp3".to_string(),
        user_agent: Some("AppleCoreMedia/1.0.0 (iPhone)".to_string()),
        referer: None,
        range: range.map(str::to_string),
        ulid: Some("req-1".to_string()),
        other: Some(BTreeMap::from([
            ("colo".to_string(), "SJC".to_string()),
            ("country".to_string(), "US".to_string()),
        ])),
    }
}

