use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::event::Event;
use super::task::{Task, TaskStatus};

/// Overall workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowStatus::Running)
    }
}

/// A received external signal, kept in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub ts: DateTime<Utc>,
    pub name: String,
    pub payload: Value,
}

/// The complete persisted record of one workflow.
///
/// This is the single blob stored per workflow id. Every engine operation
/// loads it, mutates it in memory, and writes it back under compare-and-swap;
/// there is no other shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    /// Informational revision counter; correctness relies on the store's
    /// CAS token, not on this field.
    pub rev: u64,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// User workflow state plus the reserved `$wf` bookkeeping subtree.
    pub ctx: Value,
    pub history: Vec<Event>,
    /// Tasks keyed by id; `BTreeMap` keeps iteration in lexicographic id
    /// order, which is also creation order.
    pub tasks: BTreeMap<String, Task>,
    pub need_decide: bool,
    pub next_wake: Option<DateTime<Utc>>,
    /// Monotonic counter minting deterministic task ids.
    pub seq: u64,
    pub decider: String,
    pub signals: Vec<SignalRecord>,
}

impl WorkflowState {
    pub fn new(id: impl Into<String>, decider: impl Into<String>, ctx: Value, now: DateTime<Utc>) -> Self {
        let ctx = if ctx.is_null() {
            Value::Object(Default::default())
        } else {
            ctx
        };
        Self {
            id: id.into(),
            rev: 0,
            status: WorkflowStatus::Running,
            created_at: now,
            updated_at: now,
            ctx,
            history: Vec::new(),
            tasks: BTreeMap::new(),
            need_decide: false,
            next_wake: None,
            seq: 0,
            decider: decider.into(),
            signals: Vec::new(),
        }
    }

    /// Mints the next deterministic task id (`t000001`, `t000002`, ...).
    pub fn mint_task_id(&mut self) -> String {
        self.seq += 1;
        format!("t{:06}", self.seq)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Appends an event to history.
    pub fn record(&mut self, event: Event) {
        self.history.push(event);
    }

    /// Earliest future time the workflow needs attention.
    ///
    /// The minimum of `run_after` over pending tasks and `expires_at` over
    /// leased tasks, or `None` when neither exists.
    pub fn compute_next_wake(&self) -> Option<DateTime<Utc>> {
        let mut wake: Option<DateTime<Utc>> = None;
        for task in self.tasks.values() {
            let candidate = match task.status {
                TaskStatus::Pending => Some(task.run_after),
                TaskStatus::Leased => task.as_exec().and_then(|e| e.lease.as_ref()).map(|l| l.expires_at),
                _ => None,
            };
            if let Some(t) = candidate {
                wake = Some(match wake {
                    Some(w) if w <= t => w,
                    _ => t,
                });
            }
        }
        wake
    }
}
