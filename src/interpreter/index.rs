//! Single-pass index over workflow history for replay lookups.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::core::Event;

/// Prefix embedding an effect id into an activity's correlation name.
pub(crate) const EXEC_TAG: &str = "E:";
/// Prefix embedding an effect id into a timer's correlation label.
pub(crate) const TIMER_TAG: &str = "S:";

#[derive(Debug, Default)]
pub(crate) struct HistoryIndex {
    /// Effect id → task id, from `ACTIVITY_SCHEDULED` correlation names.
    exec_scheduled: HashMap<String, String>,
    /// Task id → recorded result.
    exec_results: HashMap<String, Value>,
    /// Effect id → task id, from `TIMER_SCHEDULED` correlation labels.
    timer_scheduled: HashMap<String, String>,
    timers_fired: HashSet<String>,
    /// Signal name → arrivals in history order.
    signals: HashMap<String, Vec<(DateTime<Utc>, Value)>>,
    /// Task ids in completion/firing order; race tie-break.
    settle_order: Vec<String>,
}

impl HistoryIndex {
    pub fn build(history: &[Event]) -> Self {
        let mut index = Self::default();
        for event in history {
            match event {
                Event::ActivityScheduled {
                    task_id,
                    name: Some(name),
                    ..
                } => {
                    if let Some(eid) = name.strip_prefix(EXEC_TAG) {
                        index.exec_scheduled.insert(eid.to_string(), task_id.clone());
                    }
                }
                Event::ActivityCompleted {
                    task_id, result, ..
                } => {
                    index.exec_results.insert(task_id.clone(), result.clone());
                    index.settle_order.push(task_id.clone());
                }
                Event::TimerScheduled {
                    task_id,
                    label: Some(label),
                    ..
                } => {
                    if let Some(eid) = label.strip_prefix(TIMER_TAG) {
                        index.timer_scheduled.insert(eid.to_string(), task_id.clone());
                    }
                }
                Event::TimerFired { task_id, .. } => {
                    index.timers_fired.insert(task_id.clone());
                    index.settle_order.push(task_id.clone());
                }
                Event::Signal { ts, name, payload } => {
                    index
                        .signals
                        .entry(name.clone())
                        .or_default()
                        .push((*ts, payload.clone()));
                }
                _ => {}
            }
        }
        index
    }

    pub fn exec_task(&self, eid: &str) -> Option<&str> {
        self.exec_scheduled.get(eid).map(String::as_str)
    }

    pub fn exec_result(&self, task_id: &str) -> Option<&Value> {
        self.exec_results.get(task_id)
    }

    pub fn timer_task(&self, eid: &str) -> Option<&str> {
        self.timer_scheduled.get(eid).map(String::as_str)
    }

    pub fn timer_fired(&self, task_id: &str) -> bool {
        self.timers_fired.contains(task_id)
    }

    pub fn signals(&self, name: &str) -> &[(DateTime<Utc>, Value)] {
        self.signals.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Position of `task_id` in completion order.
    pub fn settle_pos(&self, task_id: &str) -> Option<usize> {
        self.settle_order.iter().position(|id| id == task_id)
    }
}
