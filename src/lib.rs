//! Telos: a portable, serverless-friendly durable workflow engine.
//!
//! A workflow is a user-authored program that interleaves side-effectful
//! activities with control-flow effects (sleep, signal, fan-out, race,
//! complete, fail). Execution is durable: any worker holding the workflow's
//! persisted state may resume the computation, tolerating crashes, duplicate
//! deliveries, and concurrent attempts.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Engine::tick                             │
//! │                                                                  │
//! │   1. Load workflow blob (CAS token)                              │
//! │   2. Fire due timers                                             │
//! │   3. Invoke decider over (ctx, history) → commands               │
//! │   4. Apply commands (schedule tasks, set ctx, complete/fail)     │
//! │   5. Recompute next_wake                                         │
//! │   6. Compare-and-swap put; on conflict, retry from load          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! There are no background threads and no locks shared across processes:
//! every public engine operation is an optimistic load → mutate → CAS-put
//! transition on a single workflow blob. Activity execution is coordinated
//! through per-task leases with monotonic fencing tokens, so a stale worker
//! can never overwrite the result of a newer reservation.
//!
//! # Example
//!
//! ```ignore
//! use telos::prelude::*;
//!
//! fn greeter(io: &mut Io) -> Flow {
//!     let reply = io.exec("greet", json!({"name": "world"}))?;
//!     io.set("greeting", reply)?;
//!     io.complete(None)
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryBlobStore::new());
//!     let mut deciders = DeciderRegistry::new();
//!     deciders.register("greeter", FlowInterpreter::new(greeter));
//!     let engine = Arc::new(Engine::new(store, Arc::new(deciders)));
//!
//!     let mut activities = ActivityRegistry::new();
//!     activities.register("greet", |input| async move {
//!         Ok(json!(format!("hello, {}", input["name"])))
//!     });
//!
//!     let runner = Runner::new(engine.clone(), Arc::new(activities), "worker-1");
//!     engine.create("wf-1", "greeter", json!({}), Utc::now()).await?;
//!     let state = runner.run_to_completion("wf-1").await?;
//!     println!("finished: {:?}", state.status);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! Each module hides a design decision that is likely to change:
//!
//! - [`core`]: Data model (hides the persisted representation)
//! - [`storage`]: Blob store and work queue seams (hides the backend choice)
//! - [`engine`]: Tick loop, leases, command application (hides the CAS protocol)
//! - [`interpreter`]: Workflow DSL compiled to a pure decider (hides replay)
//! - [`runner`]: Activity execution and orchestration (hides the worker loop)

pub mod config;
pub mod core;
pub mod engine;
pub mod interpreter;
pub mod runner;
pub mod storage;

pub use crate::core::{
    backoff_seconds, set_path, ErrorInfo, ErrorKind, Event, ExecSpec, Lease, SignalRecord,
    SleepSpec, Task, TaskSpec, TaskStatus, WorkflowState, WorkflowStatus,
};
pub use config::{ConfigError, StoreConfig};
pub use engine::{
    ActivityOutcome, Command, Completion, Decider, DeciderRegistry, Engine, EngineError,
    ExecCommand, TickResult,
};
pub use interpreter::{ChildEffect, ExecOpts, Flow, FlowInterpreter, Io, RaceWinner, Step, Suspend};
pub use runner::{
    ActivityRegistry, ActivityResult, Clock, Runner, SimulatedClock, SystemClock,
};
pub use storage::{
    BlobStore, MemoryBlobStore, MemoryWorkQueue, QueueMessage, StorageError, VersionedBlob,
    WorkMessage, WorkQueue,
};

/// Prelude module for convenient glob imports.
///
/// ```ignore
/// use telos::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{ErrorInfo, ErrorKind, Event, WorkflowState, WorkflowStatus};
    pub use crate::engine::{Command, Decider, DeciderRegistry, Engine};
    pub use crate::interpreter::{ChildEffect, ExecOpts, Flow, FlowInterpreter, Io};
    pub use crate::runner::{ActivityRegistry, Runner, SimulatedClock, SystemClock};
    pub use crate::storage::{BlobStore, MemoryBlobStore};

    pub use chrono::Utc;
    pub use serde_json::json;
    pub use std::sync::Arc;
}
