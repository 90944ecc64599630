//! Stateless orchestration: turning leased tasks into activity executions.
//!
//! The runner owns no workflow state. It reserves ready activities from the
//! engine, executes them through the [`ActivityRegistry`], completes each
//! with its fencing token, and ticks so the decider reacts. Everything it
//! knows at any moment it re-derives from the engine, which is what makes
//! it safe to run any number of runners against the same store.

mod activity;
mod clock;

pub use activity::{ActivityRegistry, ActivityResult};
pub use clock::{Clock, SimulatedClock, SystemClock};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{ErrorInfo, Task, WorkflowState};
use crate::engine::{ActivityOutcome, Engine, Result};
use crate::storage::{BlobStore, WorkMessage, WorkQueue};

const DEFAULT_LEASE_SECS: i64 = 30;
const DEFAULT_BATCH: usize = 16;
const DEFAULT_RECEIVE_WAIT: Duration = Duration::from_secs(5);

/// Drives workflows by executing their ready activities.
pub struct Runner<S: BlobStore> {
    engine: Arc<Engine<S>>,
    activities: Arc<ActivityRegistry>,
    clock: Arc<dyn Clock>,
    worker_id: String,
    lease_secs: i64,
    batch: usize,
}

impl<S: BlobStore> Runner<S> {
    pub fn new(
        engine: Arc<Engine<S>>,
        activities: Arc<ActivityRegistry>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            activities,
            clock: Arc::new(SystemClock),
            worker_id: worker_id.into(),
            lease_secs: DEFAULT_LEASE_SECS,
            batch: DEFAULT_BATCH,
        }
    }

    /// Swaps the time source; tests use [`SimulatedClock`] to step straight
    /// to `next_wake`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lease_secs(mut self, secs: i64) -> Self {
        self.lease_secs = secs;
        self
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch;
        self
    }

    /// Reserves and executes ready activities until none remain.
    ///
    /// Each completion carries the lease token issued at reservation and is
    /// followed by a tick so the decider can react. Returns the number of
    /// activities executed.
    pub async fn drain_execs(&self, wf_id: &str) -> Result<usize> {
        let mut executed = 0;
        loop {
            let tasks = self
                .engine
                .reserve_ready(
                    wf_id,
                    &self.worker_id,
                    self.batch,
                    self.lease_secs,
                    self.clock.now(),
                )
                .await?;
            if tasks.is_empty() {
                return Ok(executed);
            }
            for task in tasks {
                self.execute_one(wf_id, &task).await?;
                executed += 1;
                self.engine.tick(wf_id, self.clock.now()).await?;
            }
        }
    }

    async fn execute_one(&self, wf_id: &str, task: &Task) -> Result<()> {
        let Some(exec) = task.as_exec() else {
            return Ok(());
        };
        let Some(lease) = exec.lease.as_ref() else {
            return Ok(());
        };
        let token = lease.token;

        let action = exec.code["action"].as_str().unwrap_or("").to_string();
        let input = exec.code["input"].clone();

        let outcome = match self.activities.get(&action) {
            Some(handler) => {
                debug!(wf_id, task_id = %task.id, action = %action, "executing activity");
                handler(input).await
            }
            None => Err(ErrorInfo::non_retryable(format!(
                "no activity registered for '{action}'"
            ))),
        };

        let outcome = match outcome {
            Ok(result) => ActivityOutcome::Success(result),
            Err(error) => {
                warn!(wf_id, task_id = %task.id, action = %action, error = %error, "activity failed");
                ActivityOutcome::Failure(serde_json::to_value(&error)?)
            }
        };

        let ack = self
            .engine
            .complete_activity(wf_id, &task.id, outcome, Some(token), self.clock.now())
            .await?;
        if ack.already() {
            debug!(wf_id, task_id = %task.id, "completion was stale; another lease won");
        }
        Ok(())
    }

    /// Ticks and drains until the workflow is terminal, stepping the clock
    /// to `next_wake` between rounds.
    ///
    /// Returns early with the current state when the workflow goes idle
    /// with no wake time — it is then waiting on external input (a signal),
    /// and only a later `signal` + rerun can move it.
    pub async fn run_to_completion(&self, wf_id: &str) -> Result<WorkflowState> {
        loop {
            let tick = self.engine.tick(wf_id, self.clock.now()).await?;
            if tick.status.is_terminal() {
                break;
            }
            if self.drain_execs(wf_id).await? > 0 {
                continue;
            }
            let state = self.engine.get(wf_id).await?;
            if state.status.is_terminal() {
                break;
            }
            match state.next_wake {
                Some(at) if at > self.clock.now() => self.clock.wait_until(at).await,
                Some(_) => continue,
                None => {
                    info!(wf_id, "workflow idle, awaiting external input");
                    break;
                }
            }
        }
        self.engine.get(wf_id).await
    }

    /// Single-message path used by queue workers.
    pub async fn process_work_message(&self, wf_id: &str, task_id: Option<&str>) -> Result<()> {
        debug!(wf_id, task_id = task_id.unwrap_or("-"), "processing work message");
        self.engine.tick(wf_id, self.clock.now()).await?;
        self.drain_execs(wf_id).await?;
        Ok(())
    }

    /// Enqueues a `{wfId, taskId}` nudge for another worker to pick up.
    pub async fn nudge<Q: WorkQueue>(&self, queue: &Q, wf_id: &str, task_id: &str) -> Result<()> {
        queue.send(WorkMessage::new(wf_id, task_id).encode()).await?;
        Ok(())
    }

    /// Polls the queue until cancelled: receive → validate → process →
    /// acknowledge.
    ///
    /// Malformed bodies are deleted immediately to avoid poison loops.
    /// Messages whose processing fails are left unacknowledged for
    /// redelivery.
    pub async fn run_queue_worker<Q: WorkQueue>(
        &self,
        queue: Arc<Q>,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!(worker_id = %self.worker_id, "queue worker started");
        while !cancel.is_cancelled() {
            let messages = queue
                .receive(self.batch, DEFAULT_RECEIVE_WAIT, &cancel)
                .await?;
            for message in messages {
                match WorkMessage::decode(&message.body) {
                    Some(work) => {
                        match self
                            .process_work_message(&work.wf_id, work.task_id.as_deref())
                            .await
                        {
                            Ok(()) => queue.delete(&message.id).await?,
                            Err(err) => {
                                warn!(wf_id = %work.wf_id, error = %err, "work message failed, leaving for redelivery");
                            }
                        }
                    }
                    None => {
                        warn!(body = %message.body, "deleting malformed work message");
                        queue.delete(&message.id).await?;
                    }
                }
            }
        }
        info!(worker_id = %self.worker_id, "queue worker stopped");
        Ok(())
    }
}

impl<S: BlobStore> Runner<S> {
    pub fn engine(&self) -> &Arc<Engine<S>> {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DeciderRegistry;
    use crate::interpreter::{Flow, FlowInterpreter, Io};
    use crate::storage::{MemoryBlobStore, MemoryWorkQueue};
    use crate::WorkflowStatus;
    use chrono::Utc;
    use serde_json::json;

    fn simple_runner<F>(
        decider_name: &str,
        body: F,
        activities: ActivityRegistry,
    ) -> (Runner<MemoryBlobStore>, Arc<SimulatedClock>)
    where
        F: Fn(&mut Io) -> Flow + Send + Sync + 'static,
    {
        let mut deciders = DeciderRegistry::new();
        deciders.register(decider_name, FlowInterpreter::new(body));
        let engine = Arc::new(Engine::new(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(deciders),
        ));
        let clock = Arc::new(SimulatedClock::new(Utc::now()));
        let runner = Runner::new(engine, Arc::new(activities), "worker-1")
            .with_clock(clock.clone() as Arc<dyn Clock>);
        (runner, clock)
    }

    #[tokio::test]
    async fn test_run_to_completion_with_sleep() {
        let mut activities = ActivityRegistry::new();
        activities.register("greet", |input| async move {
            Ok(json!({"msg": format!("hi {}", input["name"].as_str().unwrap_or("?"))}))
        });

        let (runner, clock) = simple_runner(
            "greeter",
            |io: &mut Io| {
                let r = io.exec("greet", json!({"name": "ada"}))?;
                io.set("greeting", r["msg"].clone())?;
                io.sleep(60)?;
                io.complete(Some(json!({"done": true})))
            },
            activities,
        );

        runner
            .engine()
            .create("wf-1", "greeter", json!({}), clock.now())
            .await
            .unwrap();

        let state = runner.run_to_completion("wf-1").await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.ctx["greeting"], json!("hi ada"));
        assert_eq!(state.ctx["result"]["done"], json!(true));
    }

    #[tokio::test]
    async fn test_unregistered_activity_fails_workflow() {
        let (runner, clock) = simple_runner(
            "lost",
            |io: &mut Io| {
                let _ = io.exec("missing", json!({}))?;
                io.complete(None)
            },
            ActivityRegistry::new(),
        );

        runner
            .engine()
            .create("wf-1", "lost", json!({}), clock.now())
            .await
            .unwrap();

        let state = runner.run_to_completion("wf-1").await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        let task = state.tasks.values().next().unwrap();
        assert_eq!(task.as_exec().unwrap().tries, 3);
    }

    #[tokio::test]
    async fn test_idle_workflow_returns_waiting() {
        let (runner, clock) = simple_runner(
            "waiter",
            |io: &mut Io| {
                let payload = io.signal("go")?;
                io.set("got", payload)?;
                io.complete(None)
            },
            ActivityRegistry::new(),
        );

        runner
            .engine()
            .create("wf-1", "waiter", json!({}), clock.now())
            .await
            .unwrap();

        let state = runner.run_to_completion("wf-1").await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Running);

        runner
            .engine()
            .signal("wf-1", "go", json!(7), clock.now())
            .await
            .unwrap();
        let state = runner.run_to_completion("wf-1").await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.ctx["got"], json!(7));
    }

    #[tokio::test]
    async fn test_queue_worker_handles_poison_and_work() {
        let mut activities = ActivityRegistry::new();
        activities.register("ping", |_| async move { Ok(json!("pong")) });

        let (runner, clock) = simple_runner(
            "pinger",
            |io: &mut Io| {
                let r = io.exec("ping", json!({}))?;
                io.set("reply", r)?;
                io.complete(None)
            },
            activities,
        );
        let runner = Arc::new(runner);

        runner
            .engine()
            .create("wf-1", "pinger", json!({}), clock.now())
            .await
            .unwrap();
        runner.engine().tick("wf-1", clock.now()).await.unwrap();

        let queue = Arc::new(MemoryWorkQueue::new());
        queue.send("not json".into()).await.unwrap();
        queue.send(r#"{"taskId": "t000001"}"#.into()).await.unwrap();
        runner.nudge(queue.as_ref(), "wf-1", "t000001").await.unwrap();

        let cancel = CancellationToken::new();
        let worker = {
            let runner = runner.clone();
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { runner.run_queue_worker(queue, cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        worker.await.unwrap().unwrap();

        let state = runner.engine().get("wf-1").await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.ctx["reply"], json!("pong"));

        // Poison messages were acknowledged, nothing left in flight.
        queue.requeue_inflight();
        assert_eq!(queue.ready_len(), 0);
    }
}
