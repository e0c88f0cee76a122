//! Flow: walks a task graph by following outcome labels.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::node::TaskNode;
use crate::outcome::Outcome;
use crate::recorder::{NoopRecorder, Recorder, RunId, RunStatus, StepId, TaskStatus};
use crate::shared::SharedData;

/// Error returned while building a task graph.
#[derive(Error, Debug)]
pub enum FlowError {
    /// The task declares its outcomes and this label is not among them.
    #[error("task '{task}' does not declare outcome '{outcome}'")]
    UndeclaredOutcome { task: String, outcome: String },

    #[error("cannot chain an empty list of tasks")]
    EmptyChain,

    #[error("task name must not be empty")]
    EmptyName,
}

/// Why a flow stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    /// The last task returned `end` or `error`.
    Outcome { outcome: Outcome },
    /// The last task returned a label it has no successor for.
    MissingSuccessor { task: String, outcome: Outcome },
    /// There was no current task to run.
    Exhausted,
    /// The step budget ran out before the graph finished.
    StepLimit { steps: usize },
}

/// What happened during one [`Flow::execute`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowSummary {
    /// Names of the tasks that ran, in order.
    pub visited: Vec<String>,
    pub last_outcome: Option<Outcome>,
    pub termination: Termination,
}

impl FlowSummary {
    /// Returns true if the flow stopped on the `error` outcome.
    pub fn is_error(&self) -> bool {
        matches!(
            &self.termination,
            Termination::Outcome { outcome } if outcome.as_str() == Outcome::ERROR
        )
    }
}

/// Serializable shape of a task graph, for inspection and visualization.
#[derive(Debug, Clone, Serialize)]
pub struct FlowGraph {
    pub name: String,
    pub start: usize,
    pub tasks: Vec<GraphTask>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphTask {
    pub id: usize,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
    pub outcome: String,
}

/// Runs a task graph from a start task, one task at a time.
///
/// The flow keeps a cursor on the task to run next. `execute` advances it
/// until a task returns `end` or `error` (the cursor stays on that task),
/// or returns a label with no successor (the cursor is cleared). `reset`
/// moves it back to the start task.
pub struct Flow {
    name: String,
    start: Arc<TaskNode>,
    current: Option<Arc<TaskNode>>,
    max_steps: Option<usize>,
    recorder: Arc<dyn Recorder>,
}

impl Flow {
    pub fn new(name: impl Into<String>, start: Arc<TaskNode>) -> Self {
        Self {
            name: name.into(),
            current: Some(Arc::clone(&start)),
            start,
            max_steps: None,
            recorder: Arc::new(NoopRecorder),
        }
    }

    /// Connect each task to the next under `default` and start at the first.
    pub fn chain(name: impl Into<String>, tasks: &[Arc<TaskNode>]) -> Result<Self, FlowError> {
        let first = tasks.first().ok_or(FlowError::EmptyChain)?;
        for pair in tasks.windows(2) {
            pair[0].connect_default(&pair[1])?;
        }
        Ok(Self::new(name, Arc::clone(first)))
    }

    /// Stop after running `steps` tasks in one `execute` call.
    ///
    /// Without a budget a cycle that never returns `end` or `error` runs forever.
    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn with_recorder<R: Recorder + 'static>(mut self, recorder: R) -> Self {
        self.recorder = Arc::new(recorder);
        self
    }

    /// Share a recorder with other flows or with the caller.
    pub fn with_shared_recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Name attached to the flow's span and run records.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The task `reset` returns the cursor to.
    pub fn start(&self) -> &Arc<TaskNode> {
        &self.start
    }

    pub fn current(&self) -> Option<&Arc<TaskNode>> {
        self.current.as_ref()
    }

    /// Move the cursor, e.g. to resume a graph from a given task.
    pub fn set_current(&mut self, task: Option<Arc<TaskNode>>) {
        self.current = task;
    }

    /// Move the cursor back to the start task. Shared data is not touched.
    pub fn reset(&mut self) {
        self.current = Some(Arc::clone(&self.start));
    }

    /// Run tasks from the cursor until the graph stops.
    ///
    /// Never fails: task failures become the `error` outcome and a missing
    /// successor ends the flow with a warning.
    pub async fn execute(&mut self, shared: &mut SharedData) -> FlowSummary {
        let span = info_span!("flow", flow = %self.name);
        self.drive(shared).instrument(span).await
    }

    async fn drive(&mut self, shared: &mut SharedData) -> FlowSummary {
        let run_id = self.start_run().await;
        let mut visited = Vec::new();
        let mut last_outcome = None;

        let termination = loop {
            let Some(node) = self.current.clone() else {
                break Termination::Exhausted;
            };

            if let Some(limit) = self.max_steps {
                if visited.len() >= limit {
                    warn!(limit, task = %node.name(), "Step budget exhausted");
                    break Termination::StepLimit { steps: limit };
                }
            }

            debug!(task = %node.name(), step = visited.len(), "Running task");
            let step_id = self.start_task(run_id, &node, visited.len()).await;
            let result = node.run_checked(shared).await;
            let status = match &result {
                Ok(outcome) => TaskStatus::Completed {
                    outcome: outcome.clone(),
                },
                Err(e) => TaskStatus::Failed {
                    error: e.to_string(),
                },
            };
            self.complete_task(step_id, status).await;
            let outcome = node.settle(result);

            visited.push(node.name().to_string());
            last_outcome = Some(outcome.clone());

            if outcome.is_terminal() {
                break Termination::Outcome { outcome };
            }

            match node.successor(outcome.as_str()) {
                Some(next) => self.current = Some(next),
                None => {
                    warn!(
                        task = %node.name(),
                        outcome = %outcome,
                        "No successor for outcome, stopping flow"
                    );
                    self.current = None;
                    break Termination::MissingSuccessor {
                        task: node.name().to_string(),
                        outcome,
                    };
                }
            }
        };

        let status = match &termination {
            Termination::Outcome { outcome } if outcome.as_str() == Outcome::ERROR => {
                RunStatus::Failed
            }
            Termination::StepLimit { steps } => RunStatus::Aborted { steps: *steps },
            _ => RunStatus::Completed,
        };
        self.complete_run(run_id, status).await;

        info!(steps = visited.len(), termination = ?termination, "Flow finished");

        FlowSummary {
            visited,
            last_outcome,
            termination,
        }
    }

    /// Export every task reachable from the start task and the edges between them.
    pub fn to_graph(&self) -> FlowGraph {
        let mut ids: HashMap<*const TaskNode, usize> = HashMap::new();
        let mut tasks = Vec::new();
        let mut edges = Vec::new();
        let mut queue = VecDeque::new();

        ids.insert(Arc::as_ptr(&self.start), 0);
        tasks.push(GraphTask {
            id: 0,
            name: self.start.name().to_string(),
        });
        queue.push_back(Arc::clone(&self.start));

        while let Some(node) = queue.pop_front() {
            let from = ids[&Arc::as_ptr(&node)];
            for (outcome, next) in node.successors() {
                let key = Arc::as_ptr(&next);
                let to = match ids.get(&key) {
                    Some(id) => *id,
                    None => {
                        let id = tasks.len();
                        ids.insert(key, id);
                        tasks.push(GraphTask {
                            id,
                            name: next.name().to_string(),
                        });
                        queue.push_back(next);
                        id
                    }
                };
                edges.push(GraphEdge { from, to, outcome });
            }
        }

        FlowGraph {
            name: self.name.clone(),
            start: 0,
            tasks,
            edges,
        }
    }

    async fn start_run(&self) -> RunId {
        match self.recorder.start_run(&self.name).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Recorder failed to start run");
                RunId(0)
            }
        }
    }

    async fn start_task(&self, run_id: RunId, node: &TaskNode, index: usize) -> StepId {
        match self.recorder.start_task(run_id, node.name(), index).await {
            Ok(id) => id,
            Err(e) => {
                warn!(task = %node.name(), error = %e, "Recorder failed to start task");
                StepId(0)
            }
        }
    }

    async fn complete_task(&self, step_id: StepId, status: TaskStatus) {
        if let Err(e) = self.recorder.complete_task(step_id, status).await {
            warn!(error = %e, "Recorder failed to complete task");
        }
    }

    async fn complete_run(&self, run_id: RunId, status: RunStatus) {
        if let Err(e) = self.recorder.complete_run(run_id, status).await {
            warn!(error = %e, "Recorder failed to complete run");
        }
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("start", &self.start.name())
            .field("current", &self.current.as_ref().map(|n| n.name().to_string()))
            .field("max_steps", &self.max_steps)
            .finish()
    }
}
