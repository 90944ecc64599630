//! Work queue seam and the nudge message format.
//!
//! Messages carry `{"wfId", "taskId"}` as a JSON body. Receipt identifiers
//! are opaque. Consumers must delete payloads that are not valid JSON or
//! lack a `wfId` to avoid poison loops; [`WorkMessage::decode`] is the
//! shared validation rule.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::Result;

/// Nudge payload pointing a worker at one workflow (and optionally one task).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMessage {
    #[serde(rename = "wfId")]
    pub wf_id: String,
    #[serde(rename = "taskId", default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl WorkMessage {
    pub fn new(wf_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            wf_id: wf_id.into(),
            task_id: Some(task_id.into()),
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("work message serializes")
    }

    /// Parses a queue body, returning `None` for malformed payloads
    /// (invalid JSON, or a missing/empty `wfId`). Such messages must be
    /// deleted by the consumer.
    pub fn decode(body: &str) -> Option<Self> {
        let msg: WorkMessage = serde_json::from_str(body).ok()?;
        if msg.wf_id.is_empty() {
            return None;
        }
        Some(msg)
    }
}

/// A received queue entry; `id` doubles as the deletion receipt.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub body: String,
}

/// Transport for nudge messages from the engine to workers.
///
/// `receive` may block up to the wait window and must return early when the
/// cancellation token fires. Delivery is at-least-once; consumers
/// acknowledge with `delete`.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn send(&self, body: String) -> Result<()>;

    async fn receive(
        &self,
        max: usize,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<QueueMessage>>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory queue for tests and single-process deployments.
///
/// Received messages move to an in-flight map until deleted; `requeue_inflight`
/// puts unacknowledged messages back, standing in for a visibility timeout.
#[derive(Debug, Default)]
pub struct MemoryWorkQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct QueueInner {
    ready: VecDeque<QueueMessage>,
    inflight: HashMap<String, QueueMessage>,
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently waiting for delivery.
    pub fn ready_len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").ready.len()
    }

    /// Returns every unacknowledged message to the ready queue.
    pub fn requeue_inflight(&self) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let msgs: Vec<_> = inner.inflight.drain().map(|(_, m)| m).collect();
        for msg in msgs {
            inner.ready.push_back(msg);
        }
        drop(inner);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn send(&self, body: String) -> Result<()> {
        let msg = QueueMessage {
            id: Uuid::new_v4().to_string(),
            body,
        };
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .ready
            .push_back(msg);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(
        &self,
        max: usize,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<QueueMessage>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            // Register for wakeup before checking, so a send landing between
            // the check and the wait is not missed.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if !inner.ready.is_empty() {
                    let mut batch = Vec::new();
                    while batch.len() < max {
                        let Some(msg) = inner.ready.pop_front() else {
                            break;
                        };
                        inner.inflight.insert(msg.id.clone(), msg.clone());
                        batch.push(msg);
                    }
                    debug!(count = batch.len(), "received work messages");
                    return Ok(batch);
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
                _ = cancel.cancelled() => return Ok(Vec::new()),
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .inflight
            .remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_format() {
        let msg = WorkMessage::new("wf-1", "t000001");
        let v: serde_json::Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(v, json!({"wfId": "wf-1", "taskId": "t000001"}));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(WorkMessage::decode("not json").is_none());
        assert!(WorkMessage::decode("{}").is_none());
        assert!(WorkMessage::decode(r#"{"wfId": ""}"#).is_none());
        assert!(WorkMessage::decode(r#"{"taskId": "t000001"}"#).is_none());

        let msg = WorkMessage::decode(r#"{"wfId": "wf-1"}"#).unwrap();
        assert_eq!(msg.wf_id, "wf-1");
        assert_eq!(msg.task_id, None);
    }

    #[tokio::test]
    async fn test_send_receive_delete() {
        let queue = MemoryWorkQueue::new();
        let cancel = CancellationToken::new();

        queue.send(WorkMessage::new("wf-1", "t000001").encode()).await.unwrap();
        queue.send(WorkMessage::new("wf-2", "t000001").encode()).await.unwrap();

        let msgs = queue
            .receive(10, Duration::from_millis(50), &cancel)
            .await
            .unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(queue.ready_len(), 0);

        for msg in &msgs {
            queue.delete(&msg.id).await.unwrap();
        }
        queue.requeue_inflight();
        assert_eq!(queue.ready_len(), 0, "deleted messages must not reappear");
    }

    #[tokio::test]
    async fn test_receive_times_out_empty() {
        let queue = MemoryWorkQueue::new();
        let cancel = CancellationToken::new();
        let msgs = queue
            .receive(1, Duration::from_millis(20), &cancel)
            .await
            .unwrap();
        assert!(msgs.is_empty());
    }

    #[tokio::test]
    async fn test_receive_cancelled() {
        let queue = MemoryWorkQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let msgs = queue
            .receive(1, Duration::from_secs(60), &cancel)
            .await
            .unwrap();
        assert!(msgs.is_empty());
    }

    #[tokio::test]
    async fn test_requeue_inflight_redelivers() {
        let queue = MemoryWorkQueue::new();
        let cancel = CancellationToken::new();

        queue.send(WorkMessage::new("wf-1", "t000001").encode()).await.unwrap();
        let msgs = queue
            .receive(1, Duration::from_millis(50), &cancel)
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);

        queue.requeue_inflight();
        let again = queue
            .receive(1, Duration::from_millis(50), &cancel)
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, msgs[0].id);
    }
}
