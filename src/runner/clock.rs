//! Time source seam.
//!
//! Engine operations take `now` explicitly; the runner is the only place
//! that reads a clock. Swapping in [`SimulatedClock`] lets tests step
//! straight to `next_wake` instead of sleeping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Returns once the clock has reached `at`.
    async fn wait_until(&self, at: DateTime<Utc>);
}

/// Wall-clock time; waits with the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn wait_until(&self, at: DateTime<Utc>) {
        let now = Utc::now();
        if at > now {
            if let Ok(delta) = (at - now).to_std() {
                tokio::time::sleep(delta).await;
            }
        }
    }
}

/// Manually driven clock for tests; `wait_until` advances instantly.
#[derive(Debug)]
pub struct SimulatedClock {
    now: Mutex<DateTime<Utc>>,
}

impl SimulatedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += chrono::Duration::seconds(secs);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        if at > *now {
            *now = at;
        }
    }
}

#[async_trait]
impl Clock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }

    async fn wait_until(&self, at: DateTime<Utc>) {
        self.set(at);
    }
}
