//! Basic usage example for taskflow.
//!
//! This example demonstrates:
//! - Implementing the Task trait with prepare/execute/post
//! - Chaining tasks into a flow and routing on outcome labels
//! - Fanning a batch out with a ParallelTask
//! - Retrying a flaky execute phase
//!
//! Run with `RUST_LOG=debug cargo run --example basic` to see the flow logs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use taskflow::{
    Flow, Outcome, Parallel, ParallelConfig, ParallelTask, RetryPolicy, SharedData, Task,
    TaskError, TaskNode,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Order {
    id: u32,
    quantity: i32,
}

/// Step 1: reject an empty order list.
struct ValidateOrders;

#[async_trait]
impl Task for ValidateOrders {
    type Prepared = Vec<Order>;
    type Output = usize;

    fn name(&self) -> &str {
        "validate"
    }

    async fn prepare(&self, shared: &SharedData) -> Result<Vec<Order>, TaskError> {
        shared.get("orders")
    }

    async fn execute(&self, orders: &Vec<Order>) -> Result<usize, TaskError> {
        Ok(orders.len())
    }

    async fn post(
        &self,
        _shared: &SharedData,
        _orders: &Vec<Order>,
        count: &usize,
    ) -> Result<Outcome, TaskError> {
        Ok(if *count == 0 { Outcome::End } else { Outcome::Default })
    }
}

/// Step 2: price every order, two at a time. Negative quantities fail.
struct PriceOrders;

#[async_trait]
impl ParallelTask for PriceOrders {
    type Item = Order;
    type Output = f64;

    fn name(&self) -> &str {
        "price"
    }

    async fn prepare(&self, shared: &SharedData) -> Result<Vec<Order>, TaskError> {
        shared.get("orders")
    }

    async fn execute_item(&self, order: Order) -> Result<f64, TaskError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if order.quantity < 0 {
            return Err(TaskError::permanent(anyhow::anyhow!(
                "order {} has negative quantity",
                order.id
            )));
        }
        Ok(order.quantity as f64 * 9.99)
    }
}

/// Step 3: a notifier that fails twice before it gets through.
struct Notify {
    attempts: AtomicU32,
}

#[async_trait]
impl Task for Notify {
    type Prepared = ();
    type Output = u32;

    fn name(&self) -> &str {
        "notify"
    }

    async fn prepare(&self, _shared: &SharedData) -> Result<(), TaskError> {
        Ok(())
    }

    async fn execute(&self, _prepared: &()) -> Result<u32, TaskError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < 3 {
            return Err(TaskError::retryable(anyhow::anyhow!(
                "mail server busy (attempt {})",
                attempt
            )));
        }
        Ok(attempt)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let validate = TaskNode::new(ValidateOrders);
    let price = TaskNode::new(Parallel::new(PriceOrders, ParallelConfig::new(2)?)?);
    let notify = TaskNode::with_retry(
        Notify {
            attempts: AtomicU32::new(0),
        },
        RetryPolicy::fixed(3, Duration::from_millis(50)),
    );

    let mut flow = Flow::chain("orders", &[validate, price, notify])?;
    println!("Graph: {}", serde_json::to_string_pretty(&flow.to_graph())?);

    let mut shared = SharedData::from_value(json!({
        "orders": [
            { "id": 1, "quantity": 3 },
            { "id": 2, "quantity": -1 },
            { "id": 3, "quantity": 5 }
        ]
    }))?;

    let summary = flow.execute(&mut shared).await;

    println!("Visited: {:?}", summary.visited);
    println!("Stopped: {:?}", summary.termination);
    println!(
        "Shared data: {}",
        serde_json::to_string_pretty(&shared.into_value())?
    );

    Ok(())
}
