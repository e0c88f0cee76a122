//! Tests for the chunked batch executor: ordering, concurrency cap,
//! chunk timing and per-item failure isolation.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskflow::{
    Flow, Outcome, Parallel, ParallelConfig, ParallelTask, ParallelTaskResult, SharedData,
    TaskError, TaskNode,
};
use tokio::sync::Mutex;

/// Sleeps for the item's delay, then returns its value doubled.
/// Negative values fail.
struct SlowDouble {
    concurrent: Arc<AtomicUsize>,
    max_observed: Arc<AtomicUsize>,
    started: Arc<Mutex<Vec<i64>>>,
}

impl SlowDouble {
    fn new() -> Self {
        Self {
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_observed: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct Job {
    value: i64,
    delay_ms: u64,
}

#[async_trait]
impl ParallelTask for SlowDouble {
    type Item = Job;
    type Output = i64;

    fn name(&self) -> &str {
        "slow_double"
    }

    async fn prepare(&self, shared: &SharedData) -> Result<Vec<Job>, TaskError> {
        shared.get("jobs")
    }

    async fn execute_item(&self, job: Job) -> Result<i64, TaskError> {
        self.started.lock().await.push(job.value);
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_observed.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(job.delay_ms)).await;

        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        if job.value < 0 {
            return Err(TaskError::permanent(anyhow::anyhow!(
                "negative value {}",
                job.value
            )));
        }
        Ok(job.value * 2)
    }
}

fn jobs(values: &[(i64, u64)]) -> Vec<Job> {
    values
        .iter()
        .map(|&(value, delay_ms)| Job { value, delay_ms })
        .collect()
}

fn parallel(task: SlowDouble, max_concurrency: usize) -> Parallel<SlowDouble> {
    Parallel::new(task, ParallelConfig::new(max_concurrency).unwrap()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_results_keep_input_order() {
    // Earlier items take longer, so they finish last within each chunk.
    let input = jobs(&[(1, 40), (2, 30), (3, 20), (4, 10), (5, 5)]);

    for max_concurrency in 1..=6 {
        let task = parallel(SlowDouble::new(), max_concurrency);
        let result = task.process(&input).await;

        assert_eq!(
            result.results,
            vec![Some(2), Some(4), Some(6), Some(8), Some(10)],
            "max_concurrency = {}",
            max_concurrency
        );
        assert_eq!(result.total_processed, 5);
        assert_eq!(result.total_errors, 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_never_exceeds_max_concurrency() {
    let task = SlowDouble::new();
    let max_observed = task.max_observed.clone();
    let task = parallel(task, 3);

    let input = jobs(&[(1, 10); 10]);
    let result = task.process(&input).await;

    assert_eq!(result.total_processed, 10);
    assert_eq!(max_observed.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_single_concurrency_is_sequential() {
    let task = parallel(SlowDouble::new(), 1);

    let result = task.process(&jobs(&[(1, 10), (2, 10), (3, 10)])).await;

    assert!(result.processing_time >= Duration::from_millis(30));
}

#[tokio::test(start_paused = true)]
async fn test_chunks_run_back_to_back() {
    let task = parallel(SlowDouble::new(), 2);

    let result = task
        .process(&jobs(&[(1, 10), (2, 10), (3, 10), (4, 10)]))
        .await;

    assert!(result.processing_time >= Duration::from_millis(20));
    assert!(result.processing_time < Duration::from_millis(30));
}

#[tokio::test(start_paused = true)]
async fn test_next_chunk_waits_for_slowest_item() {
    // Chunk one holds a slow item; a sliding window would start item 3 at 5ms.
    let task = SlowDouble::new();
    let started = task.started.clone();
    let task = parallel(task, 2);

    let result = task.process(&jobs(&[(1, 50), (2, 5), (3, 5)])).await;

    assert_eq!(*started.lock().await, vec![1, 2, 3]);
    assert!(result.processing_time >= Duration::from_millis(55));
}

#[tokio::test(start_paused = true)]
async fn test_failing_item_does_not_affect_siblings() {
    let task = parallel(SlowDouble::new(), 2);

    let result = task
        .process(&jobs(&[(1, 10), (-5, 10), (3, 10), (4, 10), (5, 10)]))
        .await;

    assert_eq!(result.failed_indices(), vec![1]);
    assert_eq!(result.errors[0].item.value, -5);
    assert!(result.errors[0].error.to_string().contains("negative value -5"));
    assert_eq!(
        result.results,
        vec![Some(2), None, Some(6), Some(8), Some(10)]
    );
    assert_eq!(result.total_processed, 5);
    assert_eq!(result.total_errors, result.errors.len());
}

#[tokio::test(start_paused = true)]
async fn test_item_timeout_is_recorded() {
    let config = ParallelConfig::new(2)
        .unwrap()
        .with_item_timeout(Duration::from_millis(20));
    let task = Parallel::new(SlowDouble::new(), config).unwrap();

    let result = task.process(&jobs(&[(1, 5), (2, 100), (3, 5)])).await;

    assert_eq!(result.failed_indices(), vec![1]);
    assert!(matches!(
        result.errors[0].error,
        TaskError::Timeout(limit) if limit == Duration::from_millis(20)
    ));
    assert_eq!(result.results, vec![Some(2), None, Some(6)]);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_task_in_flow_merges_result() {
    let node = TaskNode::new(parallel(SlowDouble::new(), 2));
    let mut flow = Flow::new("batch", node);
    let mut shared = SharedData::from_value(json!({
        "jobs": [
            { "value": 1, "delay_ms": 1 },
            { "value": 2, "delay_ms": 1 },
            { "value": -3, "delay_ms": 1 }
        ]
    }))
    .unwrap();

    let summary = flow.execute(&mut shared).await;

    assert_eq!(summary.visited, vec!["slow_double"]);
    assert_eq!(summary.last_outcome, Some(Outcome::Default));

    let merged = shared.get_value("slow_double").unwrap();
    assert_eq!(merged["results"], json!([2, 4]));
    assert_eq!(merged["total_processed"], 3);
    assert_eq!(merged["total_errors"], 1);
    assert_eq!(merged["errors"][0]["index"], 2);
    assert_eq!(merged["errors"][0]["item"]["value"], -3);
}

/// Routes to `degraded` when more than half of the items failed.
struct ThresholdRouted(SlowDouble);

#[async_trait]
impl ParallelTask for ThresholdRouted {
    type Item = Job;
    type Output = i64;

    fn name(&self) -> &str {
        "threshold"
    }

    async fn prepare(&self, shared: &SharedData) -> Result<Vec<Job>, TaskError> {
        self.0.prepare(shared).await
    }

    async fn execute_item(&self, job: Job) -> Result<i64, TaskError> {
        self.0.execute_item(job).await
    }

    async fn post(
        &self,
        _shared: &SharedData,
        _items: &[Job],
        result: &ParallelTaskResult<Job, i64>,
    ) -> Result<Outcome, TaskError> {
        Ok(if result.error_rate() > 0.5 {
            Outcome::from("degraded")
        } else {
            Outcome::Default
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_post_can_route_on_error_rate() {
    let node = TaskNode::new(
        Parallel::new(ThresholdRouted(SlowDouble::new()), ParallelConfig::new(4).unwrap())
            .unwrap(),
    );
    let mut flow = Flow::new("threshold", node);
    let mut shared = SharedData::from_value(json!({
        "jobs": [
            { "value": -1, "delay_ms": 1 },
            { "value": -2, "delay_ms": 1 },
            { "value": 3, "delay_ms": 1 }
        ]
    }))
    .unwrap();

    let summary = flow.execute(&mut shared).await;

    assert_eq!(summary.last_outcome, Some(Outcome::from("degraded")));
}
