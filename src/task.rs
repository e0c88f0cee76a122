//! Task trait and error types.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::outcome::Outcome;
use crate::shared::SharedData;

/// Error returned by a task phase or a batch item.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Transient failure - worth retrying.
    #[error("retryable: {0}")]
    Retryable(#[source] anyhow::Error),

    /// Permanent failure - won't succeed on retry.
    #[error("permanent: {0}")]
    Permanent(#[source] anyhow::Error),

    /// A key the task needs is not present in shared data.
    #[error("missing shared key '{0}'")]
    MissingKey(String),

    /// A shared value could not be converted to or from JSON.
    #[error("shared key '{key}': {source}")]
    Shared {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A batch item did not settle within its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The task was built with unusable settings.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TaskError {
    /// Create a retryable error.
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        Self::Retryable(err.into())
    }

    /// Create a permanent error.
    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        Self::Permanent(err.into())
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Lifecycle phase in which a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Prepare,
    Execute,
    Post,
    Merge,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prepare => "prepare",
            Self::Execute => "execute",
            Self::Post => "post",
            Self::Merge => "merge",
        })
    }
}

/// A failed task run, tagged with the task and the phase that failed.
#[derive(Error, Debug)]
#[error("task '{task}' failed during {phase}: {source}")]
pub struct RunError {
    pub task: String,
    pub phase: Phase,
    #[source]
    pub source: TaskError,
}

/// A unit of work with a prepare → execute → post → merge lifecycle.
///
/// Only `execute` carries the task's real work. `prepare` shapes the shared
/// data into the task's input, `post` picks the outcome label and `merge`
/// writes the result back. The conventional identity prepare is
/// `type Prepared = SharedData` returning `Ok(shared.clone())`.
#[async_trait]
pub trait Task: Send + Sync {
    /// Input produced by `prepare`.
    type Prepared: Send + Sync;

    /// Result produced by `execute`.
    type Output: Send + Sync + Serialize;

    /// The name of this task, used in logs and as the default merge key.
    fn name(&self) -> &str;

    /// Labels this task may route to besides `default`, `end` and `error`.
    ///
    /// `None` accepts any label when connecting successors.
    fn outcomes(&self) -> Option<&[&'static str]> {
        None
    }

    /// Read what the task needs out of shared data.
    async fn prepare(&self, shared: &SharedData) -> Result<Self::Prepared, TaskError>;

    /// Do the work.
    async fn execute(&self, prepared: &Self::Prepared) -> Result<Self::Output, TaskError>;

    /// Choose the outcome label.
    async fn post(
        &self,
        _shared: &SharedData,
        _prepared: &Self::Prepared,
        _output: &Self::Output,
    ) -> Result<Outcome, TaskError> {
        Ok(Outcome::Default)
    }

    /// Write the result into shared data. Defaults to `shared[name] = output`.
    fn merge(&self, shared: &mut SharedData, output: Self::Output) -> Result<(), TaskError> {
        shared.insert(self.name(), &output)
    }
}
