use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ErrorInfo;

/// Default number of attempts before an activity failure becomes permanent.
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// Upper bound on computed exponential backoff, in seconds.
pub const MAX_BACKOFF_SECONDS: i64 = 300;

/// Lifecycle of a task.
///
/// Transitions are `pending → leased → (pending | completed | failed)`;
/// terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Leased,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Leased => "leased",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Exclusive reservation of a task by a worker.
///
/// `token` equals the task's fence counter at reservation time and
/// identifies the single lessee; completion attempts carrying any other
/// token are stale no-ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
    pub token: u64,
}

/// Timer task payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SleepSpec {
    /// Correlation label, e.g. `S:<effect id>` for interpreter timers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Activity task payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecSpec {
    /// Opaque activity payload, conventionally `{action, input}`.
    pub code: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idem_key: Option<String>,
    #[serde(default)]
    pub tries: u32,
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    /// Per-attempt backoff overrides, indexed by attempt number.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_delays: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    /// Monotonic count of lease tokens ever issued for this task.
    #[serde(default)]
    pub fence: u64,
}

fn default_max_tries() -> u32 {
    DEFAULT_MAX_TRIES
}

/// Tagged task variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskSpec {
    Sleep(SleepSpec),
    Exec(ExecSpec),
}

/// One schedulable unit of work owned by a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(flatten)]
    pub spec: TaskSpec,
    pub status: TaskStatus,
    pub run_after: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Task {
    pub fn sleep(id: String, run_after: DateTime<Utc>, label: Option<String>) -> Self {
        Self {
            id,
            spec: TaskSpec::Sleep(SleepSpec { label }),
            status: TaskStatus::Pending,
            run_after,
            result: None,
            error: None,
        }
    }

    pub fn exec(id: String, run_after: DateTime<Utc>, spec: ExecSpec) -> Self {
        Self {
            id,
            spec: TaskSpec::Exec(spec),
            status: TaskStatus::Pending,
            run_after,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_sleep(&self) -> bool {
        matches!(self.spec, TaskSpec::Sleep(_))
    }

    pub fn as_exec(&self) -> Option<&ExecSpec> {
        match &self.spec {
            TaskSpec::Exec(spec) => Some(spec),
            TaskSpec::Sleep(_) => None,
        }
    }

    pub fn as_exec_mut(&mut self) -> Option<&mut ExecSpec> {
        match &mut self.spec {
            TaskSpec::Exec(spec) => Some(spec),
            TaskSpec::Sleep(_) => None,
        }
    }
}

/// Backoff before attempt `tries + 1`, given that `tries` attempts failed.
///
/// Per-attempt overrides win; otherwise exponential doubling capped at
/// [`MAX_BACKOFF_SECONDS`]. `tries` is 1-indexed (the first failure passes
/// `tries = 1` and yields the delay before the second attempt).
pub fn backoff_seconds(tries: u32, retry_delays: &[i64]) -> i64 {
    if let Some(delay) = retry_delays.get((tries as usize).saturating_sub(1)) {
        return *delay;
    }
    let exp = 2i64.checked_pow(tries.min(30)).unwrap_or(i64::MAX);
    exp.min(MAX_BACKOFF_SECONDS)
}
