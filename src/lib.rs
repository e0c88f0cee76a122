//! # Taskflow
//!
//! Small task graphs that run in your process.
//!
//! A [`Task`] runs in four phases: `prepare` reads what it needs from the
//! [`SharedData`], `execute` does the work, `post` picks an [`Outcome`]
//! label and `merge` writes the result back. Tasks are wrapped in
//! [`TaskNode`]s and connected by outcome labels; a [`Flow`] runs the graph
//! one task at a time, following each task's outcome until a task returns
//! `end` or `error`, or returns a label with no successor.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use taskflow::{Flow, SharedData, TaskNode};
//!
//! let validate = TaskNode::new(Validate);
//! let process = TaskNode::new(Process);
//!
//! let mut flow = Flow::chain("signup", &[validate, process])?;
//! let mut shared = SharedData::from_value(json!({ "name": "John", "age": 25 }))?;
//!
//! let summary = flow.execute(&mut shared).await;
//! assert_eq!(summary.visited, ["validate", "process"]);
//! ```
//!
//! ## Batch Tasks
//!
//! A [`ParallelTask`] fans a list of items out to a per-item worker under a
//! concurrency cap. Wrap it in [`Parallel`] to place it in a graph:
//!
//! ```rust,ignore
//! let enrich = TaskNode::new(Parallel::new(EnrichUsers, ParallelConfig::new(4)?)?);
//! ```
//!
//! Items run in chunks of `max_concurrency`; a failing item lands in
//! [`ParallelTaskResult::errors`] without stopping the others.
//!
//! ## Failures
//!
//! [`Flow::execute`] and [`TaskNode::run`] never fail. A failing phase is
//! logged through `tracing` and turns into the `error` outcome, leaving the
//! shared data as it was. [`TaskNode::run_checked`] returns the underlying
//! [`RunError`] instead.

pub mod flow;
pub mod node;
pub mod outcome;
pub mod parallel;
pub mod recorder;
pub mod retry;
pub mod shared;
pub mod task;

pub use flow::{Flow, FlowError, FlowGraph, FlowSummary, GraphEdge, GraphTask, Termination};
pub use node::TaskNode;
pub use outcome::Outcome;
pub use parallel::{ItemError, Parallel, ParallelConfig, ParallelTask, ParallelTaskResult};
pub use recorder::{
    MemoryRecorder, NoopRecorder, Recorder, RunId, RunRecord, RunStatus, StepId, TaskRecord,
    TaskStatus,
};
pub use retry::RetryPolicy;
pub use shared::{Key, SharedData};
pub use task::{Phase, RunError, Task, TaskError};
