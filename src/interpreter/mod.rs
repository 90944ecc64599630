//! The workflow interpreter: a DSL body compiled to a pure decider.
//!
//! A workflow body is an ordinary function `Fn(&mut Io) -> Flow` that is
//! re-executed from the top on every decision. Each [`Io`] call is one
//! effect with a deterministic monotonic cursor id. Effects that history
//! has already settled return their recorded value immediately; the first
//! effect that cannot be resolved stages its command and suspends the run
//! by unwinding through `?`. This makes the body a pure function of
//! `(ctx, history)`: same history in, same commands out.
//!
//! Scheduled work is correlated against history by embedding the effect id
//! in the command's user-visible name (`E:<id>` for activities, `S:<id>`
//! for timers). Children of `all`/`race` append `.<index>` or `.<key>`.
//!
//! The interpreter keeps its own bookkeeping under the reserved `$wf`
//! subtree of `ctx` (`cursor`, `sigCount`); workflow bodies must not touch
//! it. Bodies must also be deterministic: no randomness, no wall-clock
//! reads, no I/O outside `exec` — that is the user's obligation.

mod effect;
mod index;

pub use effect::{ChildEffect, ExecOpts};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::core::{get_path, set_path, Event};
use crate::engine::{Command, Decider, ExecCommand};

use self::index::{HistoryIndex, EXEC_TAG, TIMER_TAG};

/// Marker unwound through `?` when the next effect is not yet resolvable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suspend;

/// Result of a single effect.
pub type Step<T> = std::result::Result<T, Suspend>;

/// Result of a whole workflow body.
pub type Flow = Step<()>;

/// Winning branch of a `race`.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceWinner {
    pub key: String,
    pub value: Value,
}

enum ChildState {
    Done(Value),
    Waiting,
    Unscheduled,
}

/// Effect handle passed to workflow bodies.
///
/// All reads go through [`Io::ctx`], which reflects the persisted context
/// with this run's staged writes already applied, so a body observes its
/// own `set` calls immediately.
pub struct Io {
    index: HistoryIndex,
    ctx: Value,
    defaults: ExecOpts,
    cursor: u64,
    resolved_cursor: u64,
    stored_cursor: u64,
    sig_consumed: HashMap<String, u64>,
    staged_sets: Vec<(String, Value)>,
    staged: Vec<Command>,
    needs_init: bool,
    stopped: bool,
}

impl Io {
    fn new(ctx: &Value, history: &[Event], defaults: ExecOpts) -> Self {
        let stored_cursor = get_path(ctx, "$wf.cursor")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Self {
            index: HistoryIndex::build(history),
            ctx: ctx.clone(),
            defaults,
            cursor: 0,
            resolved_cursor: 0,
            stored_cursor,
            sig_consumed: HashMap::new(),
            staged_sets: Vec::new(),
            staged: Vec::new(),
            needs_init: get_path(ctx, "$wf").is_none(),
            stopped: false,
        }
    }

    /// Current context: persisted state plus this run's staged writes.
    pub fn ctx(&self) -> &Value {
        &self.ctx
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// Runs an activity, returning its recorded result once completed.
    pub fn exec(&mut self, action: &str, input: Value) -> Step<Value> {
        self.exec_with(action, input, ExecOpts::default())
    }

    pub fn exec_with(&mut self, action: &str, input: Value, opts: ExecOpts) -> Step<Value> {
        let eid = self.begin_effect()?;
        match self.exec_state(&eid) {
            ChildState::Done(value) => {
                self.advanced();
                Ok(value)
            }
            ChildState::Waiting => self.suspend(),
            ChildState::Unscheduled => {
                self.stage_exec(&eid, action, input, &opts);
                self.suspend()
            }
        }
    }

    /// Pauses the workflow for `seconds`.
    pub fn sleep(&mut self, seconds: i64) -> Step<()> {
        let eid = self.begin_effect()?;
        match self.timer_state(&eid) {
            ChildState::Done(_) => {
                self.advanced();
                Ok(())
            }
            ChildState::Waiting => self.suspend(),
            ChildState::Unscheduled => {
                let label = Some(format!("{TIMER_TAG}{eid}"));
                self.staged.push(Command::sleep_for(seconds, label));
                self.suspend()
            }
        }
    }

    /// Pauses the workflow until an absolute instant.
    pub fn sleep_until(&mut self, at: DateTime<Utc>) -> Step<()> {
        let eid = self.begin_effect()?;
        match self.timer_state(&eid) {
            ChildState::Done(_) => {
                self.advanced();
                Ok(())
            }
            ChildState::Waiting => self.suspend(),
            ChildState::Unscheduled => {
                let label = Some(format!("{TIMER_TAG}{eid}"));
                self.staged.push(Command::sleep_until(at, label));
                self.suspend()
            }
        }
    }

    /// Waits for the next unconsumed arrival of the named signal.
    pub fn signal(&mut self, name: &str) -> Step<Value> {
        self.begin_effect()?;
        match self.take_signal(name) {
            Some(payload) => {
                self.advanced();
                Ok(payload)
            }
            None => self.suspend(),
        }
    }

    /// Dot-path write into `ctx`, visible to later effects in this run.
    pub fn set(&mut self, key: &str, value: Value) -> Step<()> {
        self.begin_effect()?;
        self.stage_set(key, value);
        self.advanced();
        Ok(())
    }

    /// Terminates the workflow successfully, optionally recording a result
    /// under `ctx.result`.
    pub fn complete(&mut self, value: Option<Value>) -> Flow {
        self.begin_effect()?;
        if let Some(v) = value {
            self.stage_set("result", v);
        }
        self.staged.push(Command::CompleteWorkflow);
        self.suspend()
    }

    /// Terminates the workflow with a failure reason.
    pub fn fail(&mut self, reason: Value) -> Flow {
        self.begin_effect()?;
        self.staged.push(Command::FailWorkflow {
            reason: Some(reason),
        });
        self.suspend()
    }

    /// Fan-out: runs every child, resuming only when all have settled.
    ///
    /// Results are returned in child order; timer children yield `null`.
    pub fn all(&mut self, children: Vec<ChildEffect>) -> Step<Vec<Value>> {
        let eid = self.begin_effect()?;

        let mut peeks = self.sig_consumed.clone();
        let mut states = Vec::with_capacity(children.len());
        let mut all_done = true;
        for (i, child) in children.iter().enumerate() {
            let cid = format!("{eid}.{i}");
            let state = match child {
                ChildEffect::Exec { .. } => self.exec_state(&cid),
                ChildEffect::Sleep { .. } | ChildEffect::Until { .. } => self.timer_state(&cid),
                ChildEffect::Signal { name } => {
                    let consumed = peeks.get(name).copied().unwrap_or(0);
                    match self.peek_signal(name, consumed) {
                        Some((_, payload)) => {
                            peeks.insert(name.clone(), consumed + 1);
                            ChildState::Done(payload)
                        }
                        None => ChildState::Waiting,
                    }
                }
            };
            if !matches!(state, ChildState::Done(_)) {
                all_done = false;
            }
            states.push(state);
        }

        if all_done {
            for child in &children {
                if let ChildEffect::Signal { name } = child {
                    self.take_signal(name);
                }
            }
            self.advanced();
            return Ok(states
                .into_iter()
                .map(|s| match s {
                    ChildState::Done(value) => value,
                    _ => Value::Null,
                })
                .collect());
        }

        for (i, (child, state)) in children.iter().zip(&states).enumerate() {
            if matches!(state, ChildState::Unscheduled) {
                let cid = format!("{eid}.{i}");
                self.stage_child(&cid, child);
            }
        }
        self.suspend()
    }

    /// Race: schedules every pending child and resumes with the winner.
    ///
    /// An unconsumed signal wins first (earliest arrival); otherwise the
    /// earliest-settled task in history order. Losing children keep
    /// running.
    pub fn race<K: Into<String>>(&mut self, children: Vec<(K, ChildEffect)>) -> Step<RaceWinner> {
        let eid = self.begin_effect()?;
        let children: Vec<(String, ChildEffect)> =
            children.into_iter().map(|(k, c)| (k.into(), c)).collect();

        for (key, child) in &children {
            let cid = format!("{eid}.{key}");
            let unscheduled = match child {
                ChildEffect::Exec { .. } => matches!(self.exec_state(&cid), ChildState::Unscheduled),
                ChildEffect::Sleep { .. } | ChildEffect::Until { .. } => {
                    matches!(self.timer_state(&cid), ChildState::Unscheduled)
                }
                ChildEffect::Signal { .. } => false,
            };
            if unscheduled {
                self.stage_child(&cid, child);
            }
        }

        // Unconsumed signals win, earliest timestamp first.
        let mut best: Option<(DateTime<Utc>, usize, Value)> = None;
        for (i, (_, child)) in children.iter().enumerate() {
            if let ChildEffect::Signal { name } = child {
                let consumed = self.sig_consumed.get(name).copied().unwrap_or(0);
                if let Some((ts, payload)) = self.peek_signal(name, consumed) {
                    let earlier = best.as_ref().map_or(true, |(bts, _, _)| ts < *bts);
                    if earlier {
                        best = Some((ts, i, payload));
                    }
                }
            }
        }
        if let Some((_, i, payload)) = best {
            let (key, child) = &children[i];
            let key = key.clone();
            if let ChildEffect::Signal { name } = child {
                let name = name.clone();
                self.take_signal(&name);
            }
            self.advanced();
            return Ok(RaceWinner {
                key,
                value: payload,
            });
        }

        // Then the earliest settled task in completion order.
        let mut best: Option<(usize, usize, Value)> = None;
        for (i, (key, child)) in children.iter().enumerate() {
            let cid = format!("{eid}.{key}");
            let settled = match child {
                ChildEffect::Exec { .. } => self.index.exec_task(&cid).and_then(|task_id| {
                    self.index
                        .exec_result(task_id)
                        .map(|v| (task_id.to_string(), v.clone()))
                }),
                ChildEffect::Sleep { .. } | ChildEffect::Until { .. } => {
                    self.index.timer_task(&cid).and_then(|task_id| {
                        self.index
                            .timer_fired(task_id)
                            .then(|| (task_id.to_string(), Value::Null))
                    })
                }
                ChildEffect::Signal { .. } => None,
            };
            if let Some((task_id, value)) = settled {
                if let Some(pos) = self.index.settle_pos(&task_id) {
                    let earlier = best.as_ref().map_or(true, |(bpos, _, _)| pos < *bpos);
                    if earlier {
                        best = Some((pos, i, value));
                    }
                }
            }
        }
        if let Some((_, i, value)) = best {
            self.advanced();
            return Ok(RaceWinner {
                key: children[i].0.clone(),
                value,
            });
        }

        self.suspend()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn begin_effect(&mut self) -> Step<String> {
        if self.stopped {
            return Err(Suspend);
        }
        let eid = self.cursor.to_string();
        self.cursor += 1;
        Ok(eid)
    }

    fn advanced(&mut self) {
        self.resolved_cursor = self.cursor;
    }

    fn suspend<T>(&mut self) -> Step<T> {
        self.stopped = true;
        Err(Suspend)
    }

    fn exec_state(&self, eid: &str) -> ChildState {
        match self.index.exec_task(eid) {
            Some(task_id) => match self.index.exec_result(task_id) {
                Some(value) => ChildState::Done(value.clone()),
                None => ChildState::Waiting,
            },
            None => ChildState::Unscheduled,
        }
    }

    fn timer_state(&self, eid: &str) -> ChildState {
        match self.index.timer_task(eid) {
            Some(task_id) => {
                if self.index.timer_fired(task_id) {
                    ChildState::Done(Value::Null)
                } else {
                    ChildState::Waiting
                }
            }
            None => ChildState::Unscheduled,
        }
    }

    fn peek_signal(&self, name: &str, consumed: u64) -> Option<(DateTime<Utc>, Value)> {
        self.index.signals(name).get(consumed as usize).cloned()
    }

    fn take_signal(&mut self, name: &str) -> Option<Value> {
        let consumed = self.sig_consumed.get(name).copied().unwrap_or(0);
        let (_, payload) = self.peek_signal(name, consumed)?;
        let count = consumed + 1;
        self.sig_consumed.insert(name.to_string(), count);
        self.stage_set(&format!("$wf.sigCount.{name}"), json!(count));
        Some(payload)
    }

    /// Stages a context write, skipping no-ops so an unchanged replay does
    /// not re-append `CTX_SET` history.
    fn stage_set(&mut self, key: &str, value: Value) {
        if get_path(&self.ctx, key) == Some(&value) {
            return;
        }
        set_path(&mut self.ctx, key, value.clone());
        self.staged_sets.push((key.to_string(), value));
    }

    fn stage_exec(&mut self, eid: &str, action: &str, input: Value, opts: &ExecOpts) {
        let opts = opts.merged(&self.defaults);
        self.staged.push(Command::Exec(ExecCommand {
            name: Some(format!("{EXEC_TAG}{eid}")),
            code: json!({"action": action, "input": input}),
            run_after: opts.run_after,
            idem_key: opts.idem_key,
            max_tries: opts.max_tries,
            retry_delays: opts.retry_delays,
        }));
    }

    fn stage_child(&mut self, cid: &str, child: &ChildEffect) {
        match child {
            ChildEffect::Exec {
                action,
                input,
                opts,
            } => self.stage_exec(cid, action, input.clone(), opts),
            ChildEffect::Sleep { seconds } => {
                let label = Some(format!("{TIMER_TAG}{cid}"));
                self.staged.push(Command::sleep_for(*seconds, label));
            }
            ChildEffect::Until { at } => {
                let label = Some(format!("{TIMER_TAG}{cid}"));
                self.staged.push(Command::sleep_until(*at, label));
            }
            ChildEffect::Signal { .. } => {}
        }
    }

    /// Orders the staged output: context writes first (including `$wf`
    /// bookkeeping), then schedules and terminal commands.
    fn into_commands(mut self, body_finished: bool) -> Vec<Command> {
        if body_finished && !self.stopped {
            self.staged.push(Command::CompleteWorkflow);
        }
        let mut commands = Vec::new();
        if self.needs_init {
            commands.push(Command::set("$wf", json!({"cursor": 0, "sigCount": {}})));
        }
        for (key, value) in self.staged_sets {
            commands.push(Command::Set { key, value });
        }
        if self.resolved_cursor != self.stored_cursor {
            commands.push(Command::set("$wf.cursor", json!(self.resolved_cursor)));
        }
        commands.extend(self.staged);
        commands
    }
}

/// Compiles a workflow body into a [`Decider`].
///
/// ```ignore
/// let decider = FlowInterpreter::new(|io: &mut Io| {
///     let r = io.exec("fetch", json!({"url": "..."}))?;
///     io.set("fetched", r)?;
///     io.complete(None)
/// });
/// deciders.register("fetcher", decider);
/// ```
pub struct FlowInterpreter<F> {
    body: F,
    exec_defaults: ExecOpts,
}

impl<F> FlowInterpreter<F>
where
    F: Fn(&mut Io) -> Flow + Send + Sync,
{
    pub fn new(body: F) -> Self {
        Self {
            body,
            exec_defaults: ExecOpts::default(),
        }
    }

    /// Workflow-level retry defaults applied to every `exec` that does not
    /// override them at the call site.
    pub fn with_exec_defaults(mut self, defaults: ExecOpts) -> Self {
        self.exec_defaults = defaults;
        self
    }
}

impl<F> Decider for FlowInterpreter<F>
where
    F: Fn(&mut Io) -> Flow + Send + Sync,
{
    fn decide(&self, ctx: &Value, history: &[Event]) -> Vec<Command> {
        let mut io = Io::new(ctx, history, self.exec_defaults.clone());
        let finished = (self.body)(&mut io).is_ok();
        io.into_commands(finished)
    }
}
