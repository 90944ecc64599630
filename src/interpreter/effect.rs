use chrono::{DateTime, Utc};
use serde_json::Value;

/// Per-call options for an `exec` effect.
///
/// Fields left `None` fall back to the interpreter's workflow-level
/// defaults (and from there to the engine defaults).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOpts {
    pub max_tries: Option<u32>,
    pub retry_delays: Option<Vec<i64>>,
    pub idem_key: Option<String>,
    pub run_after: Option<DateTime<Utc>>,
}

impl ExecOpts {
    pub fn max_tries(mut self, n: u32) -> Self {
        self.max_tries = Some(n);
        self
    }

    pub fn retry_delays(mut self, delays: Vec<i64>) -> Self {
        self.retry_delays = Some(delays);
        self
    }

    pub fn idem_key(mut self, key: impl Into<String>) -> Self {
        self.idem_key = Some(key.into());
        self
    }

    pub fn run_after(mut self, at: DateTime<Utc>) -> Self {
        self.run_after = Some(at);
        self
    }

    /// Per-call options win; workflow defaults fill the retry policy gaps.
    pub(crate) fn merged(&self, defaults: &ExecOpts) -> ExecOpts {
        ExecOpts {
            max_tries: self.max_tries.or(defaults.max_tries),
            retry_delays: self
                .retry_delays
                .clone()
                .or_else(|| defaults.retry_delays.clone()),
            idem_key: self.idem_key.clone(),
            run_after: self.run_after,
        }
    }
}

/// A child effect passed to `all`/`race`.
///
/// These are plain descriptors rather than closures so the interpreter can
/// correlate each child against history by position (`<parent>.<index>`)
/// or name (`<parent>.<key>`).
#[derive(Debug, Clone, PartialEq)]
pub enum ChildEffect {
    Exec {
        action: String,
        input: Value,
        opts: ExecOpts,
    },
    Sleep {
        seconds: i64,
    },
    Until {
        at: DateTime<Utc>,
    },
    Signal {
        name: String,
    },
}

impl ChildEffect {
    pub fn exec(action: impl Into<String>, input: Value) -> Self {
        ChildEffect::Exec {
            action: action.into(),
            input,
            opts: ExecOpts::default(),
        }
    }

    pub fn exec_with(action: impl Into<String>, input: Value, opts: ExecOpts) -> Self {
        ChildEffect::Exec {
            action: action.into(),
            input,
            opts,
        }
    }

    pub fn sleep(seconds: i64) -> Self {
        ChildEffect::Sleep { seconds }
    }

    pub fn until(at: DateTime<Utc>) -> Self {
        ChildEffect::Until { at }
    }

    pub fn signal(name: impl Into<String>) -> Self {
        ChildEffect::Signal { name: name.into() }
    }
}
