use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{EngineError, Result};
use crate::core::{
    set_path, ErrorInfo, Event, ExecSpec, Task, WorkflowState, WorkflowStatus, DEFAULT_MAX_TRIES,
};

/// An intent emitted by a decider.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Schedule a timer. Exactly one of `seconds`/`until` must be present.
    Sleep {
        seconds: Option<i64>,
        until: Option<DateTime<Utc>>,
        label: Option<String>,
    },
    /// Schedule an activity.
    Exec(ExecCommand),
    /// Dot-path write into `ctx`.
    Set { key: String, value: Value },
    /// Terminate the workflow successfully.
    CompleteWorkflow,
    /// Terminate the workflow with a failure reason.
    FailWorkflow { reason: Option<Value> },
}

/// Parameters of an `exec` command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecCommand {
    pub name: Option<String>,
    pub code: Value,
    pub run_after: Option<DateTime<Utc>>,
    pub idem_key: Option<String>,
    pub max_tries: Option<u32>,
    pub retry_delays: Option<Vec<i64>>,
}

impl Command {
    pub fn sleep_for(seconds: i64, label: Option<String>) -> Self {
        Command::Sleep {
            seconds: Some(seconds),
            until: None,
            label,
        }
    }

    pub fn sleep_until(until: DateTime<Utc>, label: Option<String>) -> Self {
        Command::Sleep {
            seconds: None,
            until: Some(until),
            label,
        }
    }

    pub fn set(key: impl Into<String>, value: Value) -> Self {
        Command::Set {
            key: key.into(),
            value,
        }
    }
}

fn is_reserved_key(key: &str) -> bool {
    key == "$wf" || key.starts_with("$wf.")
}

/// Applies decider output to the in-memory state.
///
/// Once a terminal command has taken effect, later schedule commands in the
/// same batch are dropped: a terminal workflow never owns new tasks.
pub(crate) fn apply_commands(
    state: &mut WorkflowState,
    commands: Vec<Command>,
    now: DateTime<Utc>,
) -> Result<()> {
    for command in commands {
        match command {
            Command::Sleep {
                seconds,
                until,
                label,
            } => {
                if state.is_terminal() {
                    warn!(wf_id = %state.id, "dropping sleep command on terminal workflow");
                    continue;
                }
                let run_after = match (seconds, until) {
                    (Some(secs), None) => now + Duration::seconds(secs),
                    (None, Some(at)) => at,
                    _ => {
                        return Err(EngineError::InvalidCommand(
                            "sleep requires exactly one of seconds or until".into(),
                        ))
                    }
                };
                let task_id = state.mint_task_id();
                debug!(wf_id = %state.id, task_id = %task_id, %run_after, "timer scheduled");
                state.record(Event::TimerScheduled {
                    ts: now,
                    task_id: task_id.clone(),
                    run_after,
                    label: label.clone(),
                });
                state
                    .tasks
                    .insert(task_id.clone(), Task::sleep(task_id, run_after, label));
            }
            Command::Exec(cmd) => {
                if state.is_terminal() {
                    warn!(wf_id = %state.id, "dropping exec command on terminal workflow");
                    continue;
                }
                let task_id = state.mint_task_id();
                let spec = ExecSpec {
                    code: cmd.code,
                    name: cmd.name.clone(),
                    idem_key: cmd.idem_key,
                    tries: 0,
                    max_tries: cmd.max_tries.unwrap_or(DEFAULT_MAX_TRIES),
                    retry_delays: cmd.retry_delays.unwrap_or_default(),
                    lease: None,
                    fence: 0,
                };
                let run_after = cmd.run_after.unwrap_or(now);
                debug!(wf_id = %state.id, task_id = %task_id, name = ?cmd.name, "activity scheduled");
                state.record(Event::ActivityScheduled {
                    ts: now,
                    task_id: task_id.clone(),
                    name: cmd.name,
                });
                state
                    .tasks
                    .insert(task_id.clone(), Task::exec(task_id, run_after, spec));
            }
            Command::Set { key, value } => {
                set_path(&mut state.ctx, &key, value);
                if !is_reserved_key(&key) {
                    state.record(Event::CtxSet { ts: now, key });
                }
            }
            Command::CompleteWorkflow => {
                state.status = WorkflowStatus::Completed;
                state.record(Event::WfCompleted { ts: now });
                debug!(wf_id = %state.id, "workflow completed");
            }
            Command::FailWorkflow { reason } => {
                let reason = reason
                    .as_ref()
                    .map(ErrorInfo::normalize)
                    .unwrap_or_else(|| ErrorInfo::non_retryable("workflow failed"));
                state.status = WorkflowStatus::Failed;
                warn!(wf_id = %state.id, reason = %reason, "workflow failed");
                state.record(Event::WfFailed { ts: now, reason });
            }
        }
    }
    Ok(())
}
