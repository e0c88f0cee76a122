//! Recording interface for flow execution history.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::outcome::Outcome;

/// Identifier of one `Flow::execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RunId(pub u64);

/// Identifier of one task run within a flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StepId(pub u64);

/// How a flow run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Stopped on `end`, or ran out of successors.
    Completed,
    /// Stopped on `error`.
    Failed,
    /// Stopped by the step budget.
    Aborted { steps: usize },
}

/// How a single task run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Completed { outcome: Outcome },
    Failed { error: String },
}

/// Receives flow execution events for observability.
///
/// Errors returned here are logged by the flow and otherwise ignored.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn start_run(&self, flow_name: &str) -> anyhow::Result<RunId>;

    async fn start_task(&self, run_id: RunId, task_name: &str, index: usize)
        -> anyhow::Result<StepId>;

    async fn complete_task(&self, step_id: StepId, status: TaskStatus) -> anyhow::Result<()>;

    async fn complete_run(&self, run_id: RunId, status: RunStatus) -> anyhow::Result<()>;
}

/// A recorder that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopRecorder;

#[async_trait]
impl Recorder for NoopRecorder {
    async fn start_run(&self, _flow_name: &str) -> anyhow::Result<RunId> {
        Ok(RunId(0))
    }

    async fn start_task(
        &self,
        _run_id: RunId,
        _task_name: &str,
        _index: usize,
    ) -> anyhow::Result<StepId> {
        Ok(StepId(0))
    }

    async fn complete_task(&self, _step_id: StepId, _status: TaskStatus) -> anyhow::Result<()> {
        Ok(())
    }

    async fn complete_run(&self, _run_id: RunId, _status: RunStatus) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One recorded task run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub run_id: RunId,
    pub step_id: StepId,
    pub task: String,
    pub index: usize,
    pub status: Option<TaskStatus>,
}

/// One recorded flow run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub flow: String,
    pub status: Option<RunStatus>,
}

/// Keeps every event in memory. Useful in tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    next_id: AtomicU64,
    runs: Mutex<Vec<RunRecord>>,
    tasks: Mutex<Vec<TaskRecord>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.lock().clone()
    }

    pub fn tasks(&self) -> Vec<TaskRecord> {
        self.tasks.lock().clone()
    }

    /// Task names visited during a run, in order.
    pub fn visited(&self, run_id: RunId) -> Vec<String> {
        self.tasks
            .lock()
            .iter()
            .filter(|t| t.run_id == run_id)
            .map(|t| t.task.clone())
            .collect()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
    async fn start_run(&self, flow_name: &str) -> anyhow::Result<RunId> {
        let run_id = RunId(self.next_id());
        self.runs.lock().push(RunRecord {
            run_id,
            flow: flow_name.to_string(),
            status: None,
        });
        Ok(run_id)
    }

    async fn start_task(
        &self,
        run_id: RunId,
        task_name: &str,
        index: usize,
    ) -> anyhow::Result<StepId> {
        let step_id = StepId(self.next_id());
        self.tasks.lock().push(TaskRecord {
            run_id,
            step_id,
            task: task_name.to_string(),
            index,
            status: None,
        });
        Ok(step_id)
    }

    async fn complete_task(&self, step_id: StepId, status: TaskStatus) -> anyhow::Result<()> {
        let mut tasks = self.tasks.lock();
        let record = tasks
            .iter_mut()
            .find(|t| t.step_id == step_id)
            .ok_or_else(|| anyhow::anyhow!("unknown step {:?}", step_id))?;
        record.status = Some(status);
        Ok(())
    }

    async fn complete_run(&self, run_id: RunId, status: RunStatus) -> anyhow::Result<()> {
        let mut runs = self.runs.lock();
        let record = runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| anyhow::anyhow!("unknown run {:?}", run_id))?;
        record.status = Some(status);
        Ok(())
    }
}
