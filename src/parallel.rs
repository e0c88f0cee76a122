//! Bounded-concurrency batch tasks.
//!
//! A [`ParallelTask`] prepares a list of items and processes each one with
//! [`ParallelTask::execute_item`]. Wrapped in [`Parallel`], it becomes a
//! regular [`Task`] and can sit in the same graph as any other task.
//!
//! Items are processed in contiguous chunks of `max_concurrency`. All items
//! of a chunk run concurrently; the next chunk starts only once every item
//! of the current one has settled. A failing item is recorded in
//! [`ParallelTaskResult::errors`] and never stops its siblings.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize, Serializer};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::outcome::Outcome;
use crate::shared::SharedData;
use crate::task::{Task, TaskError};

/// Settings for a [`Parallel`] task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Items in flight at once. Must be at least 1.
    pub max_concurrency: usize,

    /// Per-item deadline. An item that runs past it is recorded as
    /// [`TaskError::Timeout`]. No deadline when unset.
    #[serde(default)]
    pub item_timeout: Option<Duration>,
}

impl ParallelConfig {
    pub fn new(max_concurrency: usize) -> Result<Self, TaskError> {
        let config = Self {
            max_concurrency,
            item_timeout: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        if self.max_concurrency == 0 {
            return Err(TaskError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.item_timeout == Some(Duration::ZERO) {
            return Err(TaskError::InvalidConfig(
                "item_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A failed item: its position in the input, the error and the item itself.
#[derive(Debug, Serialize)]
pub struct ItemError<I> {
    pub index: usize,
    #[serde(serialize_with = "error_message")]
    pub error: TaskError,
    pub item: I,
}

/// Aggregate outcome of one batch.
///
/// `results` is positional but sparse: it only grows when an item succeeds,
/// padding skipped slots with `None`. Failed items at the tail of the input
/// therefore leave `results` shorter than `total_processed`.
#[derive(Debug, Serialize)]
pub struct ParallelTaskResult<I, R> {
    pub results: Vec<Option<R>>,
    pub errors: Vec<ItemError<I>>,
    pub total_processed: usize,
    pub total_errors: usize,
    #[serde(rename = "processing_time_ms", serialize_with = "as_millis")]
    pub processing_time: Duration,
}

impl<I, R> ParallelTaskResult<I, R> {
    fn new(total_processed: usize) -> Self {
        Self {
            results: Vec::new(),
            errors: Vec::new(),
            total_processed,
            total_errors: 0,
            processing_time: Duration::ZERO,
        }
    }

    fn record_success(&mut self, index: usize, value: R) {
        if self.results.len() <= index {
            self.results.resize_with(index + 1, || None);
        }
        self.results[index] = Some(value);
    }

    fn record_failure(&mut self, index: usize, error: TaskError, item: I) {
        self.errors.push(ItemError { index, error, item });
        self.total_errors = self.errors.len();
    }

    /// Output for the item at `index`, if it succeeded.
    pub fn get(&self, index: usize) -> Option<&R> {
        self.results.get(index).and_then(Option::as_ref)
    }

    pub fn success_count(&self) -> usize {
        self.total_processed - self.total_errors
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.errors.iter().map(|e| e.index).collect()
    }

    /// Share of items that failed, `0.0` for an empty batch.
    pub fn error_rate(&self) -> f64 {
        if self.total_processed == 0 {
            return 0.0;
        }
        self.total_errors as f64 / self.total_processed as f64
    }
}

fn error_message<S: Serializer>(error: &TaskError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// A task that processes a prepared list of items one by one.
#[async_trait]
pub trait ParallelTask: Send + Sync {
    type Item: Clone + Send + Sync + Serialize;
    type Output: Send + Sync + Serialize;

    /// The name of this task, used in logs and as the default merge key.
    fn name(&self) -> &str;

    fn outcomes(&self) -> Option<&[&'static str]> {
        None
    }

    /// Produce the items to process, in order.
    async fn prepare(&self, shared: &SharedData) -> Result<Vec<Self::Item>, TaskError>;

    /// Process a single item. Runs concurrently with other items of its chunk.
    async fn execute_item(&self, item: Self::Item) -> Result<Self::Output, TaskError>;

    /// Choose the outcome label. Item failures do not change the default.
    async fn post(
        &self,
        _shared: &SharedData,
        _items: &[Self::Item],
        _result: &ParallelTaskResult<Self::Item, Self::Output>,
    ) -> Result<Outcome, TaskError> {
        Ok(Outcome::Default)
    }

    /// Write the batch result into shared data. Defaults to `shared[name] = result`.
    fn merge(
        &self,
        shared: &mut SharedData,
        result: ParallelTaskResult<Self::Item, Self::Output>,
    ) -> Result<(), TaskError> {
        shared.insert(self.name(), &result)
    }
}

/// Adapts a [`ParallelTask`] into a [`Task`].
pub struct Parallel<P> {
    task: P,
    config: ParallelConfig,
}

impl<P: ParallelTask> Parallel<P> {
    pub fn new(task: P, config: ParallelConfig) -> Result<Self, TaskError> {
        config.validate()?;
        Ok(Self { task, config })
    }

    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }

    pub fn inner(&self) -> &P {
        &self.task
    }

    /// Process `items` chunk by chunk.
    pub async fn process(&self, items: &[P::Item]) -> ParallelTaskResult<P::Item, P::Output> {
        let started = Instant::now();
        let mut result = ParallelTaskResult::new(items.len());
        let chunk_size = self.config.max_concurrency;

        for (chunk_index, chunk) in items.chunks(chunk_size).enumerate() {
            let offset = chunk_index * chunk_size;
            debug!(
                task = self.task.name(),
                chunk = chunk_index,
                size = chunk.len(),
                "Processing chunk"
            );

            let settled = join_all(chunk.iter().cloned().map(|item| self.execute_one(item))).await;

            for (position, (item, outcome)) in chunk.iter().zip(settled).enumerate() {
                let index = offset + position;
                match outcome {
                    Ok(value) => result.record_success(index, value),
                    Err(e) => {
                        debug!(task = self.task.name(), index, error = %e, "Item failed");
                        result.record_failure(index, e, item.clone());
                    }
                }
            }
        }

        result.processing_time = started.elapsed();
        info!(
            task = self.task.name(),
            total = result.total_processed,
            errors = result.total_errors,
            elapsed_ms = result.processing_time.as_millis() as u64,
            "Batch finished"
        );
        result
    }

    async fn execute_one(&self, item: P::Item) -> Result<P::Output, TaskError> {
        match self.config.item_timeout {
            None => self.task.execute_item(item).await,
            Some(limit) => tokio::time::timeout(limit, self.task.execute_item(item))
                .await
                .unwrap_or(Err(TaskError::Timeout(limit))),
        }
    }
}

#[async_trait]
impl<P: ParallelTask> Task for Parallel<P> {
    type Prepared = Vec<P::Item>;
    type Output = ParallelTaskResult<P::Item, P::Output>;

    fn name(&self) -> &str {
        self.task.name()
    }

    fn outcomes(&self) -> Option<&[&'static str]> {
        self.task.outcomes()
    }

    async fn prepare(&self, shared: &SharedData) -> Result<Self::Prepared, TaskError> {
        self.task.prepare(shared).await
    }

    async fn execute(&self, items: &Self::Prepared) -> Result<Self::Output, TaskError> {
        if items.is_empty() {
            warn!(task = self.task.name(), "No items to process");
            return Ok(ParallelTaskResult::new(0));
        }
        Ok(self.process(items).await)
    }

    async fn post(
        &self,
        shared: &SharedData,
        items: &Self::Prepared,
        result: &Self::Output,
    ) -> Result<Outcome, TaskError> {
        if items.is_empty() {
            return Ok(Outcome::Default);
        }
        self.task.post(shared, items, result).await
    }

    fn merge(&self, shared: &mut SharedData, result: Self::Output) -> Result<(), TaskError> {
        if result.total_processed == 0 {
            return Ok(());
        }
        self.task.merge(shared, result)
    }
}
