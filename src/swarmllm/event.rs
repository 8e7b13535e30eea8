//! Realtime event bus.
//!
//! Every observable transition in the kernel is published as a
//! [`SwarmEvent`] on the [`EventBus`].  The bus is a process-wide
//! multi-producer / multi-subscriber surface built on
//! [`tokio::sync::broadcast`]: publishing never blocks, a slow subscriber
//! lags (and eventually drops events) rather than stalling the engine, and
//! delivery to any single subscriber is FIFO.
//!
//! Events carry a kind tag (the `agent:*` strings the realtime transport
//! republishes verbatim) and a JSON-shaped payload.  Agent records inside
//! payloads are always sanitised — no credential ever travels on the bus.
//!
//! # Example
//!
//! ```rust
//! use swarmllm::event::{EventBus, SwarmEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.publish(SwarmEvent::Stopped {
//!     id: "a1".to_string(),
//!     name: "Architect".to_string(),
//! });
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.kind(), "agent:stopped");
//! # }
//! ```

use crate::swarmllm::agent::{AgentStatus, AgentView};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Default capacity of the broadcast channel backing an [`EventBus`].
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Events emitted by the kernel, one variant per realtime event kind.
#[derive(Debug, Clone)]
pub enum SwarmEvent {
    /// A new agent record was created.
    AgentCreated { agent: AgentView },
    /// An agent record was updated through the whitelisted update path.
    AgentUpdated { agent: AgentView },
    /// An agent record was deleted (in-flight work was aborted first).
    AgentDeleted { agent: AgentView },
    /// An agent's runtime status changed.
    StatusChanged { id: String, status: AgentStatus },
    /// The agent's in-progress assistant text grew.
    Thinking { id: String, thinking: String },
    /// A model stream was opened.
    StreamStarted { id: String },
    /// A text delta arrived on the model stream.
    StreamChunk { id: String, chunk: String },
    /// The model stream closed normally.
    StreamEnded { id: String },
    /// The model stream failed.
    StreamFailed { id: String, error: String },
    /// A tool call is about to be dispatched.
    ToolStarted {
        id: String,
        name: String,
        tool: String,
        args: Vec<String>,
    },
    /// A tool call succeeded.
    ToolCompleted {
        id: String,
        name: String,
        tool: String,
        args: Vec<String>,
        preview: String,
    },
    /// A tool call failed.
    ToolFailed {
        id: String,
        name: String,
        tool: String,
        args: Vec<String>,
        error: String,
    },
    /// A leader dispatched a delegation to another agent.
    Delegation {
        from_id: String,
        from_name: String,
        to_id: String,
        to_name: String,
        task: String,
    },
    /// An agent signalled a structured error report via `@report_error`.
    ErrorReport {
        id: String,
        name: String,
        description: String,
        timestamp: DateTime<Utc>,
    },
    /// A scripted cross-agent handoff was initiated.
    Handoff {
        from_id: String,
        from_name: String,
        to_id: String,
        to_name: String,
    },
    /// An agent's in-flight work was stopped by the user.
    Stopped { id: String, name: String },
}

impl SwarmEvent {
    /// The realtime kind tag for this event.
    pub fn kind(&self) -> &'static str {
        match self {
            SwarmEvent::AgentCreated { .. } => "agent:created",
            SwarmEvent::AgentUpdated { .. } => "agent:updated",
            SwarmEvent::AgentDeleted { .. } => "agent:deleted",
            SwarmEvent::StatusChanged { .. } => "agent:status",
            SwarmEvent::Thinking { .. } => "agent:thinking",
            SwarmEvent::StreamStarted { .. } => "agent:stream:start",
            SwarmEvent::StreamChunk { .. } => "agent:stream:chunk",
            SwarmEvent::StreamEnded { .. } => "agent:stream:end",
            SwarmEvent::StreamFailed { .. } => "agent:stream:error",
            SwarmEvent::ToolStarted { .. } => "agent:tool:start",
            SwarmEvent::ToolCompleted { .. } => "agent:tool:result",
            SwarmEvent::ToolFailed { .. } => "agent:tool:error",
            SwarmEvent::Delegation { .. } => "agent:delegation",
            SwarmEvent::ErrorReport { .. } => "agent:error:report",
            SwarmEvent::Handoff { .. } => "agent:handoff",
            SwarmEvent::Stopped { .. } => "agent:stopped",
        }
    }

    /// The JSON payload the realtime transport forwards to clients.
    pub fn payload(&self) -> Value {
        match self {
            SwarmEvent::AgentCreated { agent }
            | SwarmEvent::AgentUpdated { agent }
            | SwarmEvent::AgentDeleted { agent } => {
                serde_json::to_value(agent).unwrap_or(Value::Null)
            }
            SwarmEvent::StatusChanged { id, status } => json!({
                "id": id,
                "status": status,
            }),
            SwarmEvent::Thinking { id, thinking } => json!({
                "id": id,
                "thinking": thinking,
            }),
            SwarmEvent::StreamStarted { id } => json!({ "id": id }),
            SwarmEvent::StreamChunk { id, chunk } => json!({
                "id": id,
                "chunk": chunk,
            }),
            SwarmEvent::StreamEnded { id } => json!({ "id": id }),
            SwarmEvent::StreamFailed { id, error } => json!({
                "id": id,
                "error": error,
            }),
            SwarmEvent::ToolStarted {
                id,
                name,
                tool,
                args,
            } => json!({
                "id": id,
                "name": name,
                "tool": tool,
                "args": args,
            }),
            SwarmEvent::ToolCompleted {
                id,
                name,
                tool,
                args,
                preview,
            } => json!({
                "id": id,
                "name": name,
                "tool": tool,
                "args": args,
                "preview": preview,
            }),
            SwarmEvent::ToolFailed {
                id,
                name,
                tool,
                args,
                error,
            } => json!({
                "id": id,
                "name": name,
                "tool": tool,
                "args": args,
                "error": error,
            }),
            SwarmEvent::Delegation {
                from_id,
                from_name,
                to_id,
                to_name,
                task,
            } => json!({
                "fromId": from_id,
                "fromName": from_name,
                "toId": to_id,
                "toName": to_name,
                "task": task,
            }),
            SwarmEvent::ErrorReport {
                id,
                name,
                description,
                timestamp,
            } => json!({
                "id": id,
                "name": name,
                "description": description,
                "timestamp": timestamp,
            }),
            SwarmEvent::Handoff {
                from_id,
                from_name,
                to_id,
                to_name,
            } => json!({
                "fromId": from_id,
                "fromName": from_name,
                "toId": to_id,
                "toName": to_name,
            }),
            SwarmEvent::Stopped { id, name } => json!({
                "id": id,
                "name": name,
            }),
        }
    }
}

/// Non-blocking fan-out of [`SwarmEvent`]s to any number of subscribers.
///
/// Cloning the bus is cheap; all clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SwarmEvent>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event.  Best-effort: with no subscribers the event is
    /// silently dropped, and a lagging subscriber loses its oldest events
    /// rather than back-pressuring the publisher.
    pub fn publish(&self, event: SwarmEvent) {
        let _ = self.tx.send(event);
    }

    /// Register a new subscriber.  The receiver observes events published
    /// after this call, in publish order.
    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers (diagnostics only).
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        let event = SwarmEvent::StreamChunk {
            id: "a".into(),
            chunk: "hi".into(),
        };
        assert_eq!(event.kind(), "agent:stream:chunk");
        assert_eq!(event.payload()["chunk"], "hi");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(SwarmEvent::StreamStarted { id: "a".into() });
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(SwarmEvent::StreamChunk {
                id: "a".into(),
                chunk: i.to_string(),
            });
        }
        for i in 0..5 {
            match rx.recv().await.unwrap() {
                SwarmEvent::StreamChunk { chunk, .. } => assert_eq!(chunk, i.to_string()),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }
}
