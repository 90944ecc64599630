use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ErrorInfo;

/// One entry in a workflow's append-only history.
///
/// Events are only ever appended within a tick and persisted atomically
/// with the rest of the workflow state; prior events are never rewritten
/// or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    WfCreated {
        ts: DateTime<Utc>,
    },
    WfCompleted {
        ts: DateTime<Utc>,
    },
    WfFailed {
        ts: DateTime<Utc>,
        reason: ErrorInfo,
    },
    TimerScheduled {
        ts: DateTime<Utc>,
        task_id: String,
        run_after: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    TimerFired {
        ts: DateTime<Utc>,
        task_id: String,
    },
    ActivityScheduled {
        ts: DateTime<Utc>,
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    ActivityCompleted {
        ts: DateTime<Utc>,
        task_id: String,
        result: Value,
    },
    ActivityFailed {
        ts: DateTime<Utc>,
        task_id: String,
        error: ErrorInfo,
    },
    ActivityRetry {
        ts: DateTime<Utc>,
        task_id: String,
        after_seconds: i64,
        error: ErrorInfo,
    },
    CtxSet {
        ts: DateTime<Utc>,
        key: String,
    },
    Signal {
        ts: DateTime<Utc>,
        name: String,
        payload: Value,
    },
}

impl Event {
    /// Timestamp the event was recorded at.
    pub fn ts(&self) -> DateTime<Utc> {
        match self {
            Event::WfCreated { ts }
            | Event::WfCompleted { ts }
            | Event::WfFailed { ts, .. }
            | Event::TimerScheduled { ts, .. }
            | Event::TimerFired { ts, .. }
            | Event::ActivityScheduled { ts, .. }
            | Event::ActivityCompleted { ts, .. }
            | Event::ActivityFailed { ts, .. }
            | Event::ActivityRetry { ts, .. }
            | Event::CtxSet { ts, .. }
            | Event::Signal { ts, .. } => *ts,
        }
    }

    /// Task this event refers to, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Event::TimerScheduled { task_id, .. }
            | Event::TimerFired { task_id, .. }
            | Event::ActivityScheduled { task_id, .. }
            | Event::ActivityCompleted { task_id, .. }
            | Event::ActivityFailed { task_id, .. }
            | Event::ActivityRetry { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}
