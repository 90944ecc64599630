//! The workflow engine: one atomic CAS transition per public operation.
//!
//! Every operation follows the same shape: load the workflow blob, mutate
//! it in memory (firing timers, applying decider commands, moving leases),
//! and write it back conditioned on the version it was read at. A conflict
//! means another worker won the race; the operation retries from load.
//! Deciders are pure functions of `(ctx, history)`, so retries converge.

mod command;
mod decider;
mod error;

pub use command::{Command, ExecCommand};
pub use decider::{Decider, DeciderRegistry};
pub use error::{EngineError, Result};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::{
    backoff_seconds, ErrorInfo, Event, Lease, SignalRecord, Task, TaskStatus, WorkflowState,
    WorkflowStatus,
};
use crate::storage::BlobStore;

use self::command::apply_commands;

/// Default key prefix for workflow blobs.
pub const DEFAULT_KEY_PREFIX: &str = "wf/";

/// Result of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickResult {
    pub rev: u64,
    pub next_wake: Option<DateTime<Utc>>,
    pub status: WorkflowStatus,
}

/// Outcome reported for a leased activity.
#[derive(Debug, Clone)]
pub enum ActivityOutcome {
    Success(Value),
    /// Raw failure payload; normalized into the error envelope on receipt.
    Failure(Value),
}

/// Whether a completion call changed state or was a stale no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    /// The task was missing, already terminal, not leased, or the supplied
    /// token did not match the current lease. No state change occurred.
    Already,
}

impl Completion {
    pub fn already(self) -> bool {
        matches!(self, Completion::Already)
    }
}

/// The deterministic-replay workflow engine.
///
/// Lock-free with optimistic concurrency: callers may invoke operations
/// concurrently from any number of processes, and all coordination goes
/// through the blob store's CAS. The engine owns no timers and spawns no
/// tasks; waiting until `next_wake` is the caller's responsibility.
pub struct Engine<S: BlobStore> {
    store: Arc<S>,
    deciders: Arc<DeciderRegistry>,
    key_prefix: String,
}

impl<S: BlobStore> Engine<S> {
    pub fn new(store: Arc<S>, deciders: Arc<DeciderRegistry>) -> Self {
        Self {
            store,
            deciders,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Overrides the blob key prefix (normalized to end with `/`).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        self.key_prefix = prefix;
        self
    }

    fn key(&self, wf_id: &str) -> String {
        format!("{}{}", self.key_prefix, wf_id)
    }

    async fn load(&self, wf_id: &str) -> Result<(WorkflowState, String)> {
        let blob = self
            .store
            .get(&self.key(wf_id))
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(wf_id.to_string()))?;
        let state: WorkflowState = serde_json::from_slice(&blob.data)?;
        Ok((state, blob.version))
    }

    /// Persists `state` under CAS. Returns `Ok(false)` on conflict so the
    /// caller's loop can retry from load.
    async fn save(
        &self,
        state: &mut WorkflowState,
        cas: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        state.rev += 1;
        state.updated_at = now;
        let data = Bytes::from(serde_json::to_vec(state)?);
        match self.store.put(&self.key(&state.id), data, Some(cas)).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_conflict() => {
                debug!(wf_id = %state.id, "CAS conflict, retrying from load");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Initializes a workflow. Fails if the id already exists.
    pub async fn create(
        &self,
        wf_id: &str,
        decider: &str,
        initial_ctx: Value,
        now: DateTime<Utc>,
    ) -> Result<WorkflowState> {
        let mut state = WorkflowState::new(wf_id, decider, initial_ctx, now);
        state.record(Event::WfCreated { ts: now });
        state.need_decide = true;
        state.rev = 1;

        let data = Bytes::from(serde_json::to_vec(&state)?);
        match self.store.put(&self.key(wf_id), data, None).await {
            Ok(_) => {
                info!(wf_id, decider, "workflow created");
                Ok(state)
            }
            Err(err) if err.is_conflict() => Err(EngineError::WorkflowExists(wf_id.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Read-only load of the current workflow record.
    pub async fn get(&self, wf_id: &str) -> Result<WorkflowState> {
        Ok(self.load(wf_id).await?.0)
    }

    /// One atomic step: fire due timers, run the decider if needed, apply
    /// its commands, recompute `next_wake`, persist.
    pub async fn tick(&self, wf_id: &str, now: DateTime<Utc>) -> Result<TickResult> {
        loop {
            let (mut state, cas) = self.load(wf_id).await?;

            let due: Vec<String> = state
                .tasks
                .values()
                .filter(|t| t.is_sleep() && t.status == TaskStatus::Pending && t.run_after <= now)
                .map(|t| t.id.clone())
                .collect();
            for task_id in due {
                if let Some(task) = state.tasks.get_mut(&task_id) {
                    task.status = TaskStatus::Completed;
                }
                debug!(wf_id, task_id = %task_id, "timer fired");
                state.record(Event::TimerFired {
                    ts: now,
                    task_id,
                });
                state.need_decide = true;
            }

            if state.status == WorkflowStatus::Running && state.need_decide {
                let decider = self
                    .deciders
                    .get(&state.decider)
                    .ok_or_else(|| EngineError::DeciderNotFound(state.decider.clone()))?;
                let commands = decider.decide(&state.ctx, &state.history);
                debug!(wf_id, count = commands.len(), "decider produced commands");
                apply_commands(&mut state, commands, now)?;
                state.need_decide = false;
            }

            state.next_wake = state.compute_next_wake();

            if self.save(&mut state, &cas, now).await? {
                return Ok(TickResult {
                    rev: state.rev,
                    next_wake: state.next_wake,
                    status: state.status,
                });
            }
        }
    }

    /// Leases up to `max_n` due activities to `worker_id`, in ascending
    /// task-id order. Returns deep copies of the leased tasks; an empty
    /// result consumes no write.
    pub async fn reserve_ready(
        &self,
        wf_id: &str,
        worker_id: &str,
        max_n: usize,
        lease_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        loop {
            let (mut state, cas) = self.load(wf_id).await?;

            let mut reserved: Vec<String> = Vec::new();
            for task in state.tasks.values_mut() {
                if reserved.len() >= max_n {
                    break;
                }
                if task.is_terminal() || task.as_exec().is_none() {
                    continue;
                }
                if task.status == TaskStatus::Leased {
                    let still_held = task
                        .as_exec()
                        .and_then(|e| e.lease.as_ref())
                        .is_some_and(|l| l.expires_at > now);
                    if still_held {
                        continue;
                    }
                }
                if task.run_after > now {
                    continue;
                }
                let task_id = task.id.clone();
                let Some(exec) = task.as_exec_mut() else {
                    continue;
                };
                exec.fence += 1;
                let token = exec.fence;
                exec.lease = Some(Lease {
                    owner: worker_id.to_string(),
                    expires_at: now + Duration::seconds(lease_secs),
                    token,
                });
                task.status = TaskStatus::Leased;
                info!(wf_id, task_id = %task_id, worker_id, token, "activity leased");
                reserved.push(task_id);
            }

            if reserved.is_empty() {
                return Ok(Vec::new());
            }

            state.next_wake = state.compute_next_wake();
            if self.save(&mut state, &cas, now).await? {
                return Ok(reserved
                    .iter()
                    .filter_map(|id| state.tasks.get(id).cloned())
                    .collect());
            }
        }
    }

    /// Settles a leased activity, idempotently.
    ///
    /// Returns [`Completion::Already`] without any state change when the
    /// task is missing or terminal, when it is not currently leased, or
    /// when `lease_token` does not match the current lease.
    pub async fn complete_activity(
        &self,
        wf_id: &str,
        task_id: &str,
        outcome: ActivityOutcome,
        lease_token: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<Completion> {
        loop {
            let (mut state, cas) = self.load(wf_id).await?;

            let Some(task) = state.tasks.get_mut(task_id) else {
                return Ok(Completion::Already);
            };
            if task.is_terminal() || task.status != TaskStatus::Leased {
                return Ok(Completion::Already);
            }
            let Some(current) = task
                .as_exec()
                .and_then(|e| e.lease.as_ref())
                .map(|l| l.token)
            else {
                return Ok(Completion::Already);
            };
            if lease_token.is_some_and(|supplied| supplied != current) {
                debug!(wf_id, task_id, current, "stale completion token");
                return Ok(Completion::Already);
            }

            match &outcome {
                ActivityOutcome::Success(result) => {
                    task.status = TaskStatus::Completed;
                    task.result = Some(result.clone());
                    info!(wf_id, task_id, "activity completed");
                    state.record(Event::ActivityCompleted {
                        ts: now,
                        task_id: task_id.to_string(),
                        result: result.clone(),
                    });
                    state.need_decide = true;
                }
                ActivityOutcome::Failure(raw) => {
                    let error = ErrorInfo::normalize(raw);
                    let Some(exec) = task.as_exec_mut() else {
                        return Ok(Completion::Already);
                    };
                    exec.tries += 1;
                    let tries = exec.tries;
                    let max_tries = exec.max_tries;
                    let backoff = backoff_seconds(tries, &exec.retry_delays);
                    if tries >= max_tries {
                        task.status = TaskStatus::Failed;
                        task.error = Some(error.clone());
                        warn!(wf_id, task_id, tries, "activity failed permanently");
                        state.record(Event::ActivityFailed {
                            ts: now,
                            task_id: task_id.to_string(),
                            error,
                        });
                        state.status = WorkflowStatus::Failed;
                    } else {
                        exec.lease = None;
                        task.status = TaskStatus::Pending;
                        task.run_after = now + Duration::seconds(backoff);
                        task.error = Some(error.clone());
                        info!(wf_id, task_id, tries, backoff, "activity retry scheduled");
                        state.record(Event::ActivityRetry {
                            ts: now,
                            task_id: task_id.to_string(),
                            after_seconds: backoff,
                            error,
                        });
                        state.need_decide = true;
                    }
                }
            }

            state.next_wake = state.compute_next_wake();
            if self.save(&mut state, &cas, now).await? {
                return Ok(Completion::Applied);
            }
        }
    }

    /// Extends a live lease by `extra_secs` from its current expiry.
    ///
    /// Lease-state violations are hard errors: wrong owner or token, task
    /// not leased, or a lease that has already expired.
    pub async fn extend_lease(
        &self,
        wf_id: &str,
        task_id: &str,
        owner: &str,
        token: u64,
        extra_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        loop {
            let (mut state, cas) = self.load(wf_id).await?;

            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
            if task.status != TaskStatus::Leased {
                return Err(EngineError::lease(task_id, "task is not leased"));
            }
            let exec = task
                .as_exec_mut()
                .ok_or_else(|| EngineError::lease(task_id, "task is not an activity"))?;
            let lease = exec
                .lease
                .as_mut()
                .ok_or_else(|| EngineError::lease(task_id, "no lease on task"))?;
            if lease.owner != owner || lease.token != token {
                return Err(EngineError::lease(task_id, "owner or token mismatch"));
            }
            if lease.expires_at < now {
                return Err(EngineError::lease(task_id, "lease already expired"));
            }

            lease.expires_at += Duration::seconds(extra_secs);
            let new_expiry = lease.expires_at;
            debug!(wf_id, task_id, %new_expiry, "lease extended");

            state.next_wake = state.compute_next_wake();
            if self.save(&mut state, &cas, now).await? {
                return Ok(new_expiry);
            }
        }
    }

    /// Records an external signal and marks the workflow for decision.
    ///
    /// Works regardless of status; terminal workflows keep the record but
    /// the decider never runs for them.
    pub async fn signal(
        &self,
        wf_id: &str,
        name: &str,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        loop {
            let (mut state, cas) = self.load(wf_id).await?;

            state.signals.push(SignalRecord {
                ts: now,
                name: name.to_string(),
                payload: payload.clone(),
            });
            state.record(Event::Signal {
                ts: now,
                name: name.to_string(),
                payload: payload.clone(),
            });
            state.need_decide = true;
            info!(wf_id, signal = name, "signal recorded");

            if self.save(&mut state, &cas, now).await? {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;
    use serde_json::json;

    fn engine_with<D: Decider + 'static>(name: &str, decider: D) -> Engine<MemoryBlobStore> {
        let mut registry = DeciderRegistry::new();
        registry.register(name, decider);
        Engine::new(Arc::new(MemoryBlobStore::new()), Arc::new(registry))
    }

    fn idle_engine() -> Engine<MemoryBlobStore> {
        engine_with("idle", |_ctx: &Value, _history: &[Event]| Vec::new())
    }

    /// Decider that schedules a single activity once, then waits forever.
    fn one_exec_decider(max_tries: Option<u32>, retry_delays: Option<Vec<i64>>) -> impl Decider {
        move |_ctx: &Value, history: &[Event]| {
            let scheduled = history
                .iter()
                .any(|e| matches!(e, Event::ActivityScheduled { .. }));
            if scheduled {
                Vec::new()
            } else {
                vec![Command::Exec(ExecCommand {
                    name: Some("E:0".into()),
                    code: json!({"action": "flaky", "input": {}}),
                    max_tries,
                    retry_delays: retry_delays.clone(),
                    ..Default::default()
                })]
            }
        }
    }

    #[tokio::test]
    async fn test_create_is_exclusive() {
        let engine = idle_engine();
        let now = Utc::now();
        engine.create("wf-1", "idle", json!({}), now).await.unwrap();

        let err = engine
            .create("wf-1", "idle", json!({}), now)
            .await
            .expect_err("duplicate create must fail");
        assert!(matches!(err, EngineError::WorkflowExists(_)));
    }

    #[tokio::test]
    async fn test_missing_workflow_is_hard_error() {
        let engine = idle_engine();
        let err = engine.tick("ghost", Utc::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn test_tick_fires_due_timers_only() {
        let engine = engine_with("timers", |_ctx: &Value, history: &[Event]| {
            if history
                .iter()
                .any(|e| matches!(e, Event::TimerScheduled { .. }))
            {
                Vec::new()
            } else {
                vec![
                    Command::sleep_for(5, Some("soon".into())),
                    Command::sleep_for(500, Some("later".into())),
                ]
            }
        });
        let t0 = Utc::now();
        engine.create("wf-1", "timers", json!({}), t0).await.unwrap();

        let tick = engine.tick("wf-1", t0).await.unwrap();
        assert_eq!(tick.status, WorkflowStatus::Running);
        assert_eq!(tick.next_wake, Some(t0 + Duration::seconds(5)));

        let tick = engine.tick("wf-1", t0 + Duration::seconds(6)).await.unwrap();
        let state = engine.get("wf-1").await.unwrap();
        assert_eq!(state.tasks["t000001"].status, TaskStatus::Completed);
        assert_eq!(state.tasks["t000002"].status, TaskStatus::Pending);
        assert_eq!(tick.next_wake, Some(t0 + Duration::seconds(500)));
        assert_eq!(
            state
                .history
                .iter()
                .filter(|e| matches!(e, Event::TimerFired { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_next_wake_matches_invariant_after_tick() {
        let engine = engine_with("mix", |_ctx: &Value, history: &[Event]| {
            if history
                .iter()
                .any(|e| matches!(e, Event::ActivityScheduled { .. }))
            {
                Vec::new()
            } else {
                vec![
                    Command::Exec(ExecCommand {
                        code: json!({"action": "a", "input": {}}),
                        ..Default::default()
                    }),
                    Command::sleep_for(60, None),
                ]
            }
        });
        let t0 = Utc::now();
        engine.create("wf-1", "mix", json!({}), t0).await.unwrap();
        let tick = engine.tick("wf-1", t0).await.unwrap();

        let state = engine.get("wf-1").await.unwrap();
        assert_eq!(tick.next_wake, state.compute_next_wake());
        // The exec task is due immediately, so the wake is t0.
        assert_eq!(tick.next_wake, Some(t0));
    }

    #[tokio::test]
    async fn test_reserve_empty_consumes_no_write() {
        let engine = engine_with("one", one_exec_decider(None, None));
        let t0 = Utc::now();
        engine.create("wf-1", "one", json!({}), t0).await.unwrap();
        engine.tick("wf-1", t0).await.unwrap();

        let store = engine.store.clone();
        let before = store.version_of("wf/wf-1").unwrap();

        // A due task with max_n = 0 skips the write entirely.
        let zero = engine.reserve_ready("wf-1", "w1", 0, 30, t0).await.unwrap();
        assert!(zero.is_empty());
        assert_eq!(store.version_of("wf/wf-1").unwrap(), before);

        // Once everything is leased, an empty scan also skips the write.
        let leased = engine.reserve_ready("wf-1", "w1", 4, 30, t0).await.unwrap();
        assert_eq!(leased.len(), 1);
        let after = store.version_of("wf/wf-1").unwrap();
        let again = engine.reserve_ready("wf-1", "w2", 4, 30, t0).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(store.version_of("wf/wf-1").unwrap(), after);
    }

    #[tokio::test]
    async fn test_reserve_orders_by_task_id_and_fences() {
        let engine = engine_with("two", |_ctx: &Value, history: &[Event]| {
            if history
                .iter()
                .any(|e| matches!(e, Event::ActivityScheduled { .. }))
            {
                Vec::new()
            } else {
                vec![
                    Command::Exec(ExecCommand {
                        code: json!({"action": "first", "input": {}}),
                        ..Default::default()
                    }),
                    Command::Exec(ExecCommand {
                        code: json!({"action": "second", "input": {}}),
                        ..Default::default()
                    }),
                ]
            }
        });
        let t0 = Utc::now();
        engine.create("wf-1", "two", json!({}), t0).await.unwrap();
        engine.tick("wf-1", t0).await.unwrap();

        let first = engine
            .reserve_ready("wf-1", "w1", 1, 30, t0)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, "t000001");
        assert_eq!(first[0].as_exec().unwrap().fence, 1);
        assert_eq!(first[0].status, TaskStatus::Leased);

        let second = engine
            .reserve_ready("wf-1", "w2", 4, 30, t0)
            .await
            .unwrap();
        assert_eq!(second.len(), 1, "t000001 is still leased");
        assert_eq!(second[0].id, "t000002");
    }

    #[tokio::test]
    async fn test_expired_lease_is_retaken_with_higher_token() {
        let engine = engine_with("one", one_exec_decider(None, None));
        let t0 = Utc::now();
        engine.create("wf-1", "one", json!({}), t0).await.unwrap();
        engine.tick("wf-1", t0).await.unwrap();

        let lease1 = engine
            .reserve_ready("wf-1", "w1", 1, 1, t0)
            .await
            .unwrap();
        let token1 = lease1[0].as_exec().unwrap().lease.as_ref().unwrap().token;

        let lease2 = engine
            .reserve_ready("wf-1", "w2", 1, 30, t0 + Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(lease2.len(), 1);
        let lease = lease2[0].as_exec().unwrap().lease.as_ref().unwrap();
        assert!(lease.token > token1);
        assert_eq!(lease.owner, "w2");
    }

    #[tokio::test]
    async fn test_completion_fencing_and_idempotence() {
        let engine = engine_with("one", one_exec_decider(None, None));
        let t0 = Utc::now();
        engine.create("wf-1", "one", json!({}), t0).await.unwrap();
        engine.tick("wf-1", t0).await.unwrap();

        let leased = engine
            .reserve_ready("wf-1", "w1", 1, 30, t0)
            .await
            .unwrap();
        let token = leased[0].as_exec().unwrap().lease.as_ref().unwrap().token;

        // Wrong token: stale no-op, task stays leased.
        let ack = engine
            .complete_activity(
                "wf-1",
                "t000001",
                ActivityOutcome::Success(json!({"ok": true})),
                Some(token + 1),
                t0,
            )
            .await
            .unwrap();
        assert!(ack.already());
        let state = engine.get("wf-1").await.unwrap();
        assert_eq!(state.tasks["t000001"].status, TaskStatus::Leased);

        // Correct token applies.
        let ack = engine
            .complete_activity(
                "wf-1",
                "t000001",
                ActivityOutcome::Success(json!({"ok": true})),
                Some(token),
                t0,
            )
            .await
            .unwrap();
        assert_eq!(ack, Completion::Applied);

        // Replayed delivery is a no-op with identical final state.
        let snapshot = engine.get("wf-1").await.unwrap();
        let ack = engine
            .complete_activity(
                "wf-1",
                "t000001",
                ActivityOutcome::Success(json!({"ok": true})),
                Some(token),
                t0,
            )
            .await
            .unwrap();
        assert!(ack.already());
        assert_eq!(engine.get("wf-1").await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_failure_backoff_schedule_then_workflow_failure() {
        let engine = engine_with("one", one_exec_decider(None, None));
        let mut now = Utc::now();
        engine.create("wf-1", "one", json!({}), now).await.unwrap();
        engine.tick("wf-1", now).await.unwrap();

        let mut backoffs = Vec::new();
        for _ in 0..3 {
            now += Duration::seconds(600);
            let leased = engine
                .reserve_ready("wf-1", "w1", 1, 30, now)
                .await
                .unwrap();
            assert_eq!(leased.len(), 1);
            let token = leased[0].as_exec().unwrap().lease.as_ref().unwrap().token;
            engine
                .complete_activity(
                    "wf-1",
                    "t000001",
                    ActivityOutcome::Failure(json!({"type": "retryable", "message": "boom"})),
                    Some(token),
                    now,
                )
                .await
                .unwrap();

            let state = engine.get("wf-1").await.unwrap();
            if let Some(Event::ActivityRetry { after_seconds, .. }) = state.history.last() {
                backoffs.push(*after_seconds);
            }
        }

        assert_eq!(backoffs, vec![2, 4]);
        let state = engine.get("wf-1").await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(state.tasks["t000001"].status, TaskStatus::Failed);
        assert!(state
            .history
            .iter()
            .any(|e| matches!(e, Event::ActivityFailed { .. })));
    }

    #[tokio::test]
    async fn test_retry_delay_overrides() {
        let engine = engine_with("one", one_exec_decider(Some(3), Some(vec![2, 2])));
        let mut now = Utc::now();
        engine.create("wf-1", "one", json!({}), now).await.unwrap();
        engine.tick("wf-1", now).await.unwrap();

        let mut backoffs = Vec::new();
        for _ in 0..2 {
            now += Duration::seconds(60);
            let leased = engine
                .reserve_ready("wf-1", "w1", 1, 30, now)
                .await
                .unwrap();
            let token = leased[0].as_exec().unwrap().lease.as_ref().unwrap().token;
            engine
                .complete_activity(
                    "wf-1",
                    "t000001",
                    ActivityOutcome::Failure(json!("boom")),
                    Some(token),
                    now,
                )
                .await
                .unwrap();
            let state = engine.get("wf-1").await.unwrap();
            if let Some(Event::ActivityRetry { after_seconds, .. }) = state.history.last() {
                backoffs.push(*after_seconds);
            }
        }
        assert_eq!(backoffs, vec![2, 2]);
    }

    #[tokio::test]
    async fn test_extend_lease_rules() {
        let engine = engine_with("one", one_exec_decider(None, None));
        let t0 = Utc::now();
        engine.create("wf-1", "one", json!({}), t0).await.unwrap();
        engine.tick("wf-1", t0).await.unwrap();

        let leased = engine
            .reserve_ready("wf-1", "w1", 1, 10, t0)
            .await
            .unwrap();
        let token = leased[0].as_exec().unwrap().lease.as_ref().unwrap().token;
        let expiry = leased[0].as_exec().unwrap().lease.as_ref().unwrap().expires_at;

        // Extension is from the current expiry, not from `now`.
        let new_expiry = engine
            .extend_lease("wf-1", "t000001", "w1", token, 20, t0 + Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(new_expiry, expiry + Duration::seconds(20));

        let err = engine
            .extend_lease("wf-1", "t000001", "w2", token, 20, t0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Lease { .. }));

        let err = engine
            .extend_lease("wf-1", "t000001", "w1", token + 1, 20, t0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Lease { .. }));

        // Past the (already extended) expiry, the lease cannot be renewed.
        let err = engine
            .extend_lease(
                "wf-1",
                "t000001",
                "w1",
                token,
                20,
                new_expiry + Duration::seconds(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Lease { .. }));
    }

    #[tokio::test]
    async fn test_signal_on_terminal_is_recorded_but_inert() {
        let engine = engine_with("done", |_ctx: &Value, _history: &[Event]| {
            vec![Command::CompleteWorkflow]
        });
        let t0 = Utc::now();
        engine.create("wf-1", "done", json!({}), t0).await.unwrap();
        engine.tick("wf-1", t0).await.unwrap();
        assert_eq!(
            engine.get("wf-1").await.unwrap().status,
            WorkflowStatus::Completed
        );

        engine
            .signal("wf-1", "late", json!({"n": 1}), t0)
            .await
            .unwrap();
        let state = engine.get("wf-1").await.unwrap();
        assert_eq!(state.signals.len(), 1);
        assert!(state.need_decide);

        let tasks_before = state.tasks.len();
        engine.tick("wf-1", t0 + Duration::seconds(1)).await.unwrap();
        let state = engine.get("wf-1").await.unwrap();
        assert_eq!(state.tasks.len(), tasks_before);
        assert_eq!(state.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_history_is_append_only_across_ticks() {
        let engine = engine_with("one", one_exec_decider(None, None));
        let t0 = Utc::now();
        engine.create("wf-1", "one", json!({}), t0).await.unwrap();

        engine.tick("wf-1", t0).await.unwrap();
        let before = engine.get("wf-1").await.unwrap().history;

        engine.tick("wf-1", t0 + Duration::seconds(1)).await.unwrap();
        let after = engine.get("wf-1").await.unwrap().history;

        assert!(after.len() >= before.len());
        assert_eq!(&after[..before.len()], &before[..]);
    }

    #[tokio::test]
    async fn test_unknown_decider_is_hard_error() {
        let engine = idle_engine();
        let t0 = Utc::now();
        engine
            .create("wf-1", "unregistered", json!({}), t0)
            .await
            .unwrap();
        let err = engine.tick("wf-1", t0).await.unwrap_err();
        assert!(matches!(err, EngineError::DeciderNotFound(_)));
    }
}
