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

//! Redirect logger
//!
//! The redirect path must never fail. Events are queued in a bounded pending
//! batch and flushed to the edge location's raw request partition; a failed
//! flush puts the batch back in front of newer events for the next call.
//! After a save the combined log is notified so it pulls the new records.
//! When the batch is full the oldest events are dropped and counted.

use parking_lot::Mutex;
use podstats_core::rpc::partition_names;
use podstats_core::{RawRedirectEvent, RpcClient, TimestampId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of one [`RedirectLogger::log`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Pending events were delivered
    Flushed(usize),
    /// Delivery failed; events stay pending
    Requeued(usize),
    Empty,
}

pub struct RedirectLogger {
    client: RpcClient,
    capacity: usize,
    default_colo: String,
    pending: Mutex<VecDeque<RawRedirectEvent>>,
    dropped: AtomicU64,
}

impl RedirectLogger {
    pub fn new(client: RpcClient, capacity: usize, default_colo: impl Into<String>) -> Self {
        Self {
            client,
            capacity: capacity.max(1),
            default_colo: default_colo.into(),
            pending: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Log one redirect along with anything still pending.
    pub async fn log(&self, event: RawRedirectEvent) -> FlushOutcome {
        let colo = event
            .other
            .as_ref()
            .and_then(|other| other.get("colo"))
            .cloned()
            .unwrap_or_else(|| self.default_colo.clone());
        {
            let mut pending = self.pending.lock();
            pending.push_back(event);
            self.trim(&mut pending);
        }
        self.flush(&colo).await
    }

    /// Send everything pending to the raw request partition of `colo`.
    pub async fn flush(&self, colo: &str) -> FlushOutcome {
        let batch: Vec<RawRedirectEvent> = self.pending.lock().drain(..).collect();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        let target = partition_names::raw_request(colo);
        let count = batch.len();
        let latest = batch.iter().map(|event| event.time).max().unwrap_or_default();
        match self.client.log_raw_redirects(batch.clone(), &target).await {
            Ok(()) => {
                tracing::debug!(partition = %target, count, "flushed redirect events");
                self.notify_combined(&target, latest, colo).await;
                FlushOutcome::Flushed(count)
            }
            Err(e) => {
                tracing::warn!(
                    partition = %target,
                    count,
                    error = %e,
                    "failed to save redirect events, will retry"
                );
                let mut pending = self.pending.lock();
                for event in batch.into_iter().rev() {
                    pending.push_front(event);
                }
                self.trim(&mut pending);
                FlushOutcome::Requeued(count)
            }
        }
    }

    /// Tell the combined log that `partition` has records up to `latest`.
    ///
    /// Failure is only logged; the next notification from this partition
    /// picks up the same records.
    async fn notify_combined(&self, partition: &str, latest: i64, colo: &str) {
        let timestamp_id = TimestampId::new(latest, 0)
            .map(|id| id.to_string())
            .unwrap_or_default();
        if let Err(e) = self
            .client
            .send_redirect_logs_notification(
                partition,
                &timestamp_id,
                colo,
                partition_names::COMBINED_REDIRECT_LOG,
            )
            .await
        {
            tracing::warn!(partition = %partition, error = %e, "failed to notify combined redirect log");
        }
    }

    fn trim(&self, pending: &mut VecDeque<RawRedirectEvent>) {
        let excess = pending.len().saturating_sub(self.capacity);
        if excess > 0 {
            pending.drain(..excess);
            self.dropped.fetch_add(excess as u64, Ordering::Relaxed);
            tracing::warn!(
                dropped = excess,
                capacity = self.capacity,
                "pending redirect events full, dropped oldest"
            );
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Events dropped because the pending batch was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use podstats_core::{PodstatsError, Result, RpcRequest, RpcResponse, RpcTransport};
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[derive(Default)]
    struct FlakyTransport {
        failing: AtomicBool,
        received: Mutex<Vec<(String, Vec<String>)>>,
        notified: Mutex<Vec<(String, String)>>,
        reject_notifications: AtomicBool,
    }

    #[async_trait]
    impl RpcTransport for FlakyTransport {
        async fn send(&self, request: RpcRequest, target: &str) -> Result<RpcResponse> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(PodstatsError::Transport("unreachable".to_string()));
            }
            match request {
                RpcRequest::LogRawRedirects { raw_redirects } => {
                    let uuids = raw_redirects.into_iter().map(|e| e.uuid).collect();
                    self.received.lock().push((target.to_string(), uuids));
                }
                RpcRequest::RedirectLogsNotification { partition_name, .. } => {
                    if self.reject_notifications.load(Ordering::Relaxed) {
                        return Err(PodstatsError::Transport("unreachable".to_string()));
                    }
                    self.notified.lock().push((target.to_string(), partition_name));
                }
                _ => {}
            }
            Ok(RpcResponse::Ok)
        }
    }

    fn event(uuid: &str, colo: Option<&str>) -> RawRedirectEvent {
        RawRedirectEvent {
            uuid: uuid.to_string(),
            time: 1_704_085_512_345,
            raw_ip_address: "192.0.2.1".to_string(),
            method: "GET".to_string(),
            url: "https://pod.example/e/cdn.example.com/ep1.mp3".to_string(),
            user_agent: None,
            referer: None,
            range: None,
            ulid: None,
            other: colo.map(|c| BTreeMap::from([("colo".to_string(), c.to_string())])),
        }
    }

    fn logger(capacity: usize) -> (Arc<FlakyTransport>, RedirectLogger) {
        let transport = Arc::new(FlakyTransport::default());
        let logger = RedirectLogger::new(RpcClient::new(transport.clone()), capacity, "XXX");
        (transport, logger)
    }

    #[tokio::test]
    async fn test_flushes_to_colo_partition() {
        let (transport, logger) = logger(10);
        assert_eq!(logger.log(event("a", Some("SJC"))).await, FlushOutcome::Flushed(1));
        assert_eq!(logger.log(event("b", None)).await, FlushOutcome::Flushed(1));
        assert_eq!(
            *transport.received.lock(),
            vec![
                ("raw-request-SJC".to_string(), vec!["a".to_string()]),
                ("raw-request-XXX".to_string(), vec!["b".to_string()]),
            ]
        );
        assert_eq!(logger.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_failed_flush_is_retried_in_order() {
        let (transport, logger) = logger(10);
        transport.failing.store(true, Ordering::Relaxed);
        assert_eq!(logger.log(event("a", Some("SJC"))).await, FlushOutcome::Requeued(1));
        assert_eq!(logger.log(event("b", Some("SJC"))).await, FlushOutcome::Requeued(2));
        assert_eq!(logger.pending_len(), 2);

        transport.failing.store(false, Ordering::Relaxed);
        assert_eq!(logger.log(event("c", Some("SJC"))).await, FlushOutcome::Flushed(3));
        let received = transport.received.lock();
        assert_eq!(received[0].1, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let (transport, logger) = logger(2);
        transport.failing.store(true, Ordering::Relaxed);
        for uuid in ["a", "b", "c", "d"] {
            logger.log(event(uuid, None)).await;
        }
        assert_eq!(logger.pending_len(), 2);
        assert_eq!(logger.dropped(), 2);

        transport.failing.store(false, Ordering::Relaxed);
        assert_eq!(logger.flush("XXX").await, FlushOutcome::Flushed(2));
        assert_eq!(transport.received.lock()[0].1, vec!["c", "d"]);
        assert_eq!(logger.flush("XXX").await, FlushOutcome::Empty);
    }

    #[tokio::test]
    async fn test_flush_notifies_combined_log() {
        let (transport, logger) = logger(10);
        transport.failing.store(true, Ordering::Relaxed);
        logger.log(event("a", Some("SJC"))).await;
        assert!(transport.notified.lock().is_empty());

        transport.failing.store(false, Ordering::Relaxed);
        logger.log(event("b", Some("SJC"))).await;
        assert_eq!(
            *transport.notified.lock(),
            vec![(
                "combined-redirect-log".to_string(),
                "raw-request-SJC".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_failed_notification_keeps_flush() {
        let (transport, logger) = logger(10);
        transport.reject_notifications.store(true, Ordering::Relaxed);
        assert_eq!(logger.log(event("a", Some("SJC"))).await, FlushOutcome::Flushed(1));
        assert_eq!(logger.pending_len(), 0);
        assert_eq!(transport.received.lock().len(), 1);
    }
}
