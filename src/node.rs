//! Task graph nodes: a task plus its labelled successor edges.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::flow::FlowError;
use crate::outcome::Outcome;
use crate::retry::RetryPolicy;
use crate::shared::SharedData;
use crate::task::{Phase, RunError, Task, TaskError};

/// Object-safe view of a [`Task`], so nodes of different task types can
/// share one graph.
#[async_trait]
trait ErasedTask: Send + Sync {
    fn name(&self) -> &str;

    fn outcomes(&self) -> Option<&[&'static str]>;

    async fn run(&self, shared: &mut SharedData, retry: &RetryPolicy) -> Result<Outcome, RunError>;
}

struct TaskWrapper<T>(T);

impl<T: Task> TaskWrapper<T> {
    fn failed(&self, phase: Phase) -> impl FnOnce(TaskError) -> RunError + '_ {
        move |source| RunError {
            task: self.0.name().to_string(),
            phase,
            source,
        }
    }

    async fn execute_with_retry(
        &self,
        prepared: &T::Prepared,
        retry: &RetryPolicy,
    ) -> Result<T::Output, TaskError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.0.execute(prepared).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() => match retry.delay_after(attempt) {
                    Some(delay) => {
                        debug!(
                            task = self.0.name(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retrying execute"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<T: Task> ErasedTask for TaskWrapper<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn outcomes(&self) -> Option<&[&'static str]> {
        self.0.outcomes()
    }

    async fn run(&self, shared: &mut SharedData, retry: &RetryPolicy) -> Result<Outcome, RunError> {
        let prepared = self
            .0
            .prepare(shared)
            .await
            .map_err(self.failed(Phase::Prepare))?;

        let output = self
            .execute_with_retry(&prepared, retry)
            .await
            .map_err(self.failed(Phase::Execute))?;

        let outcome = self
            .0
            .post(shared, &prepared, &output)
            .await
            .map_err(self.failed(Phase::Post))?;

        self.0
            .merge(shared, output)
            .map_err(self.failed(Phase::Merge))?;

        Ok(outcome)
    }
}

/// A task placed in a graph.
///
/// Nodes are shared as `Arc<TaskNode>`: one node may be the successor of
/// many others, and successors can be added after the node is shared.
/// A cyclic graph is an `Arc` cycle and stays alive until one of its
/// nodes calls [`disconnect_all`](Self::disconnect_all).
pub struct TaskNode {
    name: String,
    task: Box<dyn ErasedTask>,
    retry: RetryPolicy,
    successors: RwLock<HashMap<String, Arc<TaskNode>>>,
}

impl TaskNode {
    /// Wrap a task in a node.
    ///
    /// # Panics
    ///
    /// Panics if the task name is empty.
    pub fn new<T: Task + 'static>(task: T) -> Arc<Self> {
        Self::try_new(task, RetryPolicy::None).expect("task name must not be empty")
    }

    /// Wrap a task in a node whose execute phase is retried per `retry`.
    ///
    /// # Panics
    ///
    /// Panics if the task name is empty.
    pub fn with_retry<T: Task + 'static>(task: T, retry: RetryPolicy) -> Arc<Self> {
        Self::try_new(task, retry).expect("task name must not be empty")
    }

    pub fn try_new<T: Task + 'static>(task: T, retry: RetryPolicy) -> Result<Arc<Self>, FlowError> {
        let name = task.name().to_string();
        if name.is_empty() {
            return Err(FlowError::EmptyName);
        }
        Ok(Arc::new(Self {
            name,
            task: Box::new(TaskWrapper(task)),
            retry,
            successors: RwLock::new(HashMap::new()),
        }))
    }

    /// The wrapped task's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Retry policy applied to the execute phase.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Add or replace the successor for `outcome`, returning `next` so
    /// calls can be chained.
    ///
    /// Fails when the task declares its outcomes and `outcome` is not one
    /// of them.
    pub fn connect(
        &self,
        next: &Arc<TaskNode>,
        outcome: impl Into<Outcome>,
    ) -> Result<Arc<TaskNode>, FlowError> {
        let outcome = outcome.into();
        if !self.accepts(&outcome) {
            return Err(FlowError::UndeclaredOutcome {
                task: self.name.clone(),
                outcome: outcome.to_string(),
            });
        }

        let previous = self
            .successors
            .write()
            .insert(outcome.to_string(), Arc::clone(next));
        if outcome.is_terminal() {
            warn!(
                task = %self.name,
                outcome = %outcome,
                next = %next.name,
                "Successor under a terminal outcome is never followed"
            );
        }
        if let Some(previous) = previous {
            warn!(
                task = %self.name,
                outcome = %outcome,
                replaced = %previous.name,
                "Overwriting successor"
            );
        }
        Ok(Arc::clone(next))
    }

    /// Connect `next` under the `default` outcome.
    pub fn connect_default(&self, next: &Arc<TaskNode>) -> Result<Arc<TaskNode>, FlowError> {
        self.connect(next, Outcome::Default)
    }

    /// Returns true if `outcome` is a sentinel or one of the task's declared outcomes.
    pub fn accepts(&self, outcome: &Outcome) -> bool {
        if outcome.is_sentinel() {
            return true;
        }
        match self.task.outcomes() {
            None => true,
            Some(declared) => declared.contains(&outcome.as_str()),
        }
    }

    pub fn has_successor(&self, outcome: &str) -> bool {
        self.successors.read().contains_key(outcome)
    }

    pub fn successor(&self, outcome: &str) -> Option<Arc<TaskNode>> {
        self.successors.read().get(outcome).cloned()
    }

    /// Successor edges, ordered by outcome label.
    pub fn successors(&self) -> BTreeMap<String, Arc<TaskNode>> {
        self.successors
            .read()
            .iter()
            .map(|(label, node)| (label.clone(), Arc::clone(node)))
            .collect()
    }

    /// Drop every outgoing edge.
    pub fn disconnect_all(&self) {
        self.successors.write().clear();
    }

    /// Run the task's lifecycle and return the real failure, if any.
    ///
    /// On failure `shared` keeps whatever it held before the run.
    pub async fn run_checked(&self, shared: &mut SharedData) -> Result<Outcome, RunError> {
        self.task.run(shared, &self.retry).await
    }

    /// Run the task's lifecycle. Failures are logged and become [`Outcome::Error`].
    pub async fn run(&self, shared: &mut SharedData) -> Outcome {
        let result = self.run_checked(shared).await;
        self.settle(result)
    }

    /// Collapse a checked run into the outcome a flow routes on, logging failures.
    /// Sentinel names built as `Outcome::Label` come back as their variants.
    pub(crate) fn settle(&self, result: Result<Outcome, RunError>) -> Outcome {
        match result {
            Ok(Outcome::Label(label)) => Outcome::new(label),
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    task = %self.name,
                    phase = %e.phase,
                    error = %e.source,
                    details = ?e.source,
                    "Task failed"
                );
                Outcome::Error
            }
        }
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let successors: BTreeMap<String, String> = self
            .successors
            .read()
            .iter()
            .map(|(label, node)| (label.clone(), node.name.clone()))
            .collect();
        f.debug_struct("TaskNode")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .field("successors", &successors)
            .finish()
    }
}
