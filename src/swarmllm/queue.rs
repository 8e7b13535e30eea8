//! Per-agent task lanes.
//!
//! Delegations (and any other work that must not overlap on one agent) are
//! pushed through an [`AgentTaskQueue`]: a map from agent id to a
//! single-consumer channel whose consumer task is spawned lazily on first
//! use.  Tasks for the same agent run strictly in enqueue order, one at a
//! time; tasks for different agents run in parallel.  A task that fails
//! does not abort its lane — the failure travels only on the future handed
//! back to the producer.
//!
//! There is no bound on lane length; back-pressure is the caller's
//! responsibility.
//!
//! # Example
//!
//! ```rust
//! use swarmllm::queue::AgentTaskQueue;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let queue = AgentTaskQueue::new();
//! let done = queue
//!     .enqueue("dev-1", Box::new(|| Box::pin(async { Ok("done".to_string()) })))
//!     .await;
//! assert_eq!(done.await.unwrap().unwrap(), "done");
//! # }
//! ```

use crate::swarmllm::engine::SwarmError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::{mpsc, oneshot, Mutex};

/// Outcome of one queued task.
pub type TaskOutcome = Result<String, SwarmError>;
/// Boxed future produced by a task thunk.
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskOutcome> + Send>>;
/// A deferred task: invoked by the lane consumer when its turn comes.
pub type TaskThunk = Box<dyn FnOnce() -> TaskFuture + Send>;

struct Job {
    thunk: TaskThunk,
    done: oneshot::Sender<TaskOutcome>,
}

/// Serialises work per agent id while letting distinct agents proceed in
/// parallel.
pub struct AgentTaskQueue {
    lanes: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
}

impl AgentTaskQueue {
    /// Create an empty queue; lanes appear on first enqueue.
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueue a task for `agent_id`.
    ///
    /// Non-blocking: returns immediately with a receiver that resolves to
    /// the task's own outcome once the lane reaches it.  If the lane was
    /// torn down before the task ran, the receiver resolves to an error.
    pub async fn enqueue(&self, agent_id: &str, thunk: TaskThunk) -> oneshot::Receiver<TaskOutcome> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut job = Job {
            thunk,
            done: done_tx,
        };

        let mut lanes = self.lanes.lock().await;
        loop {
            let send_result = lanes
                .entry(agent_id.to_string())
                .or_insert_with(|| Self::spawn_lane(agent_id))
                .send(job);
            match send_result {
                Ok(()) => break,
                Err(mpsc::error::SendError(returned)) => {
                    // Consumer is gone (lane was removed concurrently) —
                    // recreate it and retry with the same job.
                    job = returned;
                    lanes.remove(agent_id);
                }
            }
        }
        done_rx
    }

    /// Tear down the lane for `agent_id`.
    ///
    /// Queued-but-unstarted tasks are dropped (their futures resolve to a
    /// receive error); the currently running task finishes.  Call this only
    /// on agent deletion.
    pub async fn remove_lane(&self, agent_id: &str) {
        self.lanes.lock().await.remove(agent_id);
    }

    fn spawn_lane(agent_id: &str) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let lane_id = agent_id.to_string();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let outcome = (job.thunk)().await;
                if let Err(e) = &outcome {
                    log::debug!("task on lane {} finished with error: {}", lane_id, e);
                }
                // The producer may have dropped its receiver; that is fine.
                let _ = job.done.send(outcome);
            }
            log::debug!("lane {} shut down", lane_id);
        });
        tx
    }
}

impl Default for AgentTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_within_lane() {
        let queue = AgentTaskQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let order = Arc::clone(&order);
            let rx = queue
                .enqueue(
                    "a",
                    Box::new(move || {
                        Box::pin(async move {
                            // Later tasks sleep less: without serialisation
                            // they would finish out of order.
                            tokio::time::sleep(Duration::from_millis(20 - i * 4)).await;
                            order.lock().await.push(i);
                            Ok(i.to_string())
                        })
                    }),
                )
                .await;
            handles.push(rx);
        }
        for rx in handles {
            rx.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_lanes_run_in_parallel() {
        let queue = AgentTaskQueue::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for lane in ["a", "b", "c"] {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let rx = queue
                .enqueue(
                    lane,
                    Box::new(move || {
                        Box::pin(async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                            Ok(String::new())
                        })
                    }),
                )
                .await;
            handles.push(rx);
        }
        for rx in handles {
            rx.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_kill_lane() {
        let queue = AgentTaskQueue::new();
        let first = queue
            .enqueue(
                "a",
                Box::new(|| Box::pin(async { Err(SwarmError::Tool("boom".into())) })),
            )
            .await;
        let second = queue
            .enqueue("a", Box::new(|| Box::pin(async { Ok("fine".to_string()) })))
            .await;

        assert!(first.await.unwrap().is_err());
        assert_eq!(second.await.unwrap().unwrap(), "fine");
    }
}
