//! The conversation engine.
//!
//! This module is the heart of the kernel: the per-agent turn loop that
//! streams model output, detects tool invocations and delegations as the
//! text grows, executes them, and recurses with the results until the
//! conversation settles.
//!
//! # Anatomy of a turn
//!
//! A turn moves through `building → streaming → post-processing`:
//!
//! - **building** composes the prompt from the agent record: system
//!   instructions, the team roster (leaders at recursion depth 0), RAG
//!   documents, the todo list, the project tool vocabulary, the last 50
//!   history entries, and the inbound message.
//! - **streaming** consumes the provider stream.  Every text chunk is
//!   appended to the growing response, forwarded to the subscriber
//!   callback, published on the bus, and — for leaders — fed through the
//!   delegation parser so newly completed `@delegate(...)` commands are
//!   dispatched *eagerly* onto the target's task lane while the leader is
//!   still talking.  The per-agent cancellation token is polled between
//!   chunks.
//! - **post-processing** appends the assistant history entry, bumps
//!   metrics, then either feeds tool results (`[TOOL RESULTS]`) or awaited
//!   delegation results (`[DELEGATION RESULTS]`) back into the engine at
//!   depth + 1, or returns the raw text.
//!
//! Recursion is bounded by [`SwarmConfig::max_depth`]; at the limit,
//! tool and delegation processing is skipped with a log notice and the raw
//! assistant text is returned.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use swarmllm::agent::Agent;
//! use swarmllm::config::SwarmConfig;
//! use swarmllm::engine::SwarmEngine;
//! use swarmllm::event::EventBus;
//! use swarmllm::registry::AgentRegistry;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = EventBus::default();
//! let registry = Arc::new(AgentRegistry::new(bus.clone()));
//! registry.create(Agent::new("dev-1", "Developer")).await?;
//!
//! let engine = SwarmEngine::new(registry, bus, SwarmConfig::default());
//! let reply = engine
//!     .chat("dev-1", "Hello!", Arc::new(|chunk: &str| print!("{}", chunk)))
//!     .await?;
//! println!("\nfinal: {}", reply);
//! # Ok(())
//! # }
//! ```

use crate::swarmllm::agent::{
    Agent, AgentStatus, HistoryEntry, HistoryKind, RagDoc, Todo,
};
use crate::swarmllm::cancel::CancelRegistry;
use crate::swarmllm::client_wrapper::{ChatOptions, ClientWrapper, Message, Role, StreamChunk};
use crate::swarmllm::clients;
use crate::swarmllm::config::SwarmConfig;
use crate::swarmllm::delegation::{parse_delegations, Delegation, DelegationResult};
use crate::swarmllm::event::{EventBus, SwarmEvent};
use crate::swarmllm::queue::{AgentTaskQueue, TaskOutcome};
use crate::swarmllm::registry::AgentRegistry;
use crate::swarmllm::tool_parser::parse_tool_calls;
use crate::swarmllm::tools::{ToolCall, ToolDispatcher, ToolName, ToolResult};
use async_recursion::async_recursion;
use chrono::Utc;
use futures_util::StreamExt;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by the kernel.
///
/// Transient provider failures never appear here — the adapters absorb
/// them.  Tool failures during post-processing are embedded into the
/// `[TOOL RESULTS]` continuation instead of aborting the turn, so
/// [`SwarmError::Tool`] and [`SwarmError::Containment`] only surface from
/// direct dispatcher use.
#[derive(Debug, Clone)]
pub enum SwarmError {
    /// The referenced agent or todo does not exist.
    NotFound(String),
    /// A required field is missing or invalid.
    BadRequest(String),
    /// A non-transient provider failure.
    Provider(String),
    /// The user stopped the turn; the agent ends idle, not errored.
    Cancelled,
    /// A containment violation (path traversal, blocked command).
    Containment(String),
    /// A filesystem or exec failure inside a tool.
    Tool(String),
}

impl fmt::Display for SwarmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwarmError::NotFound(msg) => write!(f, "{}", msg),
            SwarmError::BadRequest(msg) => write!(f, "{}", msg),
            SwarmError::Provider(msg) => write!(f, "{}", msg),
            SwarmError::Cancelled => write!(f, "stopped by user"),
            SwarmError::Containment(msg) => write!(f, "{}", msg),
            SwarmError::Tool(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error for SwarmError {}

/// Subscriber callback receiving assistant text chunks and engine-injected
/// section markers.  Must be non-blocking.
pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Seam for constructing the streaming client a turn will use.
///
/// The default factory builds wire clients from the agent record's
/// provider selector; tests plug in scripted mocks.
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, agent: &Agent) -> Result<Arc<dyn ClientWrapper>, SwarmError>;
}

struct WireClientFactory {
    config: SwarmConfig,
}

impl ClientFactory for WireClientFactory {
    fn client_for(&self, agent: &Agent) -> Result<Arc<dyn ClientWrapper>, SwarmError> {
        clients::client_for_agent(agent, self.config.retry)
    }
}

/// Configuration snapshot taken at the start of a turn, so the streaming
/// loop never holds the record lock.
struct TurnSnapshot {
    id: String,
    name: String,
    leader: bool,
    project: Option<String>,
    instructions: String,
    temperature: f32,
    max_tokens: u32,
    todos: Vec<Todo>,
    rag_docs: Vec<RagDoc>,
    history_tail: Vec<HistoryEntry>,
}

/// A delegation dispatched during streaming, awaiting its outcome.
struct PendingDelegation {
    target_id: String,
    target_name: String,
    task: String,
    rx: Option<oneshot::Receiver<TaskOutcome>>,
    /// Set when the target never resolved; replaces the queue future.
    immediate_error: Option<String>,
}

/// How many history entries are replayed into each prompt.
const HISTORY_WINDOW: usize = 50;
/// How many history entries a handoff carries to the target.
const HANDOFF_WINDOW: usize = 10;
/// Preview length for tool-result events.
const PREVIEW_CHARS: usize = 200;

/// The orchestration engine.  Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct SwarmEngine {
    registry: Arc<AgentRegistry>,
    bus: EventBus,
    queue: Arc<AgentTaskQueue>,
    cancels: Arc<CancelRegistry>,
    config: Arc<SwarmConfig>,
    factory: Arc<dyn ClientFactory>,
}

impl SwarmEngine {
    /// Create an engine over an existing registry and bus.
    pub fn new(registry: Arc<AgentRegistry>, bus: EventBus, config: SwarmConfig) -> Self {
        let factory = Arc::new(WireClientFactory {
            config: config.clone(),
        });
        Self {
            registry,
            bus,
            queue: Arc::new(AgentTaskQueue::new()),
            cancels: Arc::new(CancelRegistry::new()),
            config: Arc::new(config),
            factory,
        }
    }

    /// Replace the client factory (builder pattern).  Used by tests to
    /// inject scripted providers.
    pub fn with_client_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// The registry this engine drives.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// The event bus this engine publishes on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // ---- Primary operations ------------------------------------------------

    /// Run one user turn against an agent and return the final assistant
    /// text (after any tool/delegation recursion).
    pub async fn chat(
        &self,
        id: &str,
        message: &str,
        on_chunk: ChunkCallback,
    ) -> Result<String, SwarmError> {
        self.turn_with_status(id, message.to_string(), HistoryKind::Plain, 0, on_chunk)
            .await
    }

    /// Run one turn on every agent in parallel and collect per-agent
    /// outcomes, in registry order.
    ///
    /// Broadcast dispatches directly rather than through the task lanes:
    /// each target is distinct, so there is nothing to serialise.
    pub async fn broadcast(
        &self,
        message: &str,
        on_chunk: ChunkCallback,
    ) -> Vec<(String, Result<String, SwarmError>)> {
        let views = self.registry.list().await;
        let mut joins = Vec::with_capacity(views.len());
        for view in views {
            let engine = self.clone();
            let id = view.id.clone();
            let msg = message.to_string();
            let cb = Arc::clone(&on_chunk);
            joins.push((
                view.id,
                tokio::spawn(async move {
                    engine
                        .turn_with_status(&id, msg, HistoryKind::Plain, 0, cb)
                        .await
                }),
            ));
        }

        let mut outcomes = Vec::with_capacity(joins.len());
        for (id, join) in joins {
            let result = match join.await {
                Ok(result) => result,
                Err(e) => Err(SwarmError::Provider(format!("broadcast task failed: {}", e))),
            };
            outcomes.push((id, result));
        }
        outcomes
    }

    /// Transfer context from one agent to another: the target receives a
    /// synthetic user message carrying the source's recent history.
    pub async fn handoff(
        &self,
        from_id: &str,
        to_id: &str,
        context: &str,
        on_chunk: ChunkCallback,
    ) -> Result<String, SwarmError> {
        let source = self
            .registry
            .get(from_id)
            .await
            .ok_or_else(|| SwarmError::NotFound(format!("agent {} not found", from_id)))?;
        let (from_name, recent) = {
            let agent = source.read().await;
            let tail_start = agent.history.len().saturating_sub(HANDOFF_WINDOW);
            let recent: Vec<String> = agent.history[tail_start..]
                .iter()
                .map(|entry| format!("{}: {}", entry.role, entry.content))
                .collect();
            (agent.name.clone(), recent.join("\n"))
        };
        let target = self.registry.view(to_id).await?;

        self.bus.publish(SwarmEvent::Handoff {
            from_id: from_id.to_string(),
            from_name: from_name.clone(),
            to_id: to_id.to_string(),
            to_name: target.name,
        });

        let mut message = format!("[HANDOFF from {}]: {}", from_name, context);
        if !recent.is_empty() {
            message.push_str("\n\nRecent conversation:\n");
            message.push_str(&recent);
        }
        self.turn_with_status(to_id, message, HistoryKind::Plain, 0, on_chunk)
            .await
    }

    /// Stop an agent's in-flight work: trip its cancellation token, clear
    /// the thinking buffer, set status idle, publish `agent:stopped`.
    pub async fn stop(&self, id: &str) -> Result<(), SwarmError> {
        let handle = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| SwarmError::NotFound(format!("agent {} not found", id)))?;

        self.cancels.cancel(id);
        let name = {
            let mut agent = handle.write().await;
            agent.thinking.clear();
            agent.status = AgentStatus::Idle;
            agent.name.clone()
        };
        self.bus.publish(SwarmEvent::StatusChanged {
            id: id.to_string(),
            status: AgentStatus::Idle,
        });
        self.bus.publish(SwarmEvent::Stopped {
            id: id.to_string(),
            name,
        });
        Ok(())
    }

    /// Delete an agent: cancel its work, tear down its task lane, remove
    /// the record.
    pub async fn delete_agent(&self, id: &str) -> Result<(), SwarmError> {
        self.cancels.cancel(id);
        self.cancels.remove(id);
        self.queue.remove_lane(id).await;
        self.registry.delete(id).await?;
        Ok(())
    }

    // ---- History operations ------------------------------------------------

    /// The agent's full conversation history.
    pub async fn history(&self, id: &str) -> Result<Vec<HistoryEntry>, SwarmError> {
        let handle = self.agent_handle(id).await?;
        let agent = handle.read().await;
        Ok(agent.history.clone())
    }

    /// Clear the history.  Idempotent.
    pub async fn clear_history(&self, id: &str) -> Result<(), SwarmError> {
        let handle = self.agent_handle(id).await?;
        {
            let mut agent = handle.write().await;
            agent.history.clear();
            self.registry.persist_record(&agent);
        }
        Ok(())
    }

    /// Drop every entry with index greater than `after_index` (the
    /// "restart from here" primitive).  Returns the remaining length.
    pub async fn truncate_history(&self, id: &str, after_index: usize) -> Result<usize, SwarmError> {
        let handle = self.agent_handle(id).await?;
        let mut agent = handle.write().await;
        let keep = after_index.saturating_add(1).min(agent.history.len());
        agent.history.truncate(keep);
        self.registry.persist_record(&agent);
        Ok(agent.history.len())
    }

    // ---- Todo operations ---------------------------------------------------

    /// Append a pending todo.
    pub async fn add_todo(&self, id: &str, text: &str) -> Result<Todo, SwarmError> {
        if text.trim().is_empty() {
            return Err(SwarmError::BadRequest("todo text is required".to_string()));
        }
        let handle = self.agent_handle(id).await?;
        let mut agent = handle.write().await;
        let todo = Todo::new(text);
        agent.todos.push(todo.clone());
        self.registry.persist_record(&agent);
        Ok(todo)
    }

    /// Flip a todo's done flag.  Toggling twice restores the original
    /// state; manual toggles never set a completion timestamp.
    pub async fn toggle_todo(&self, id: &str, todo_id: &str) -> Result<Todo, SwarmError> {
        let handle = self.agent_handle(id).await?;
        let mut agent = handle.write().await;
        let todo = agent
            .todos
            .iter_mut()
            .find(|t| t.id == todo_id)
            .ok_or_else(|| SwarmError::NotFound(format!("todo {} not found", todo_id)))?;
        todo.done = !todo.done;
        if !todo.done {
            todo.completed_at = None;
        }
        let snapshot = todo.clone();
        self.registry.persist_record(&agent);
        Ok(snapshot)
    }

    /// Remove a todo.
    pub async fn delete_todo(&self, id: &str, todo_id: &str) -> Result<(), SwarmError> {
        let handle = self.agent_handle(id).await?;
        let mut agent = handle.write().await;
        let before = agent.todos.len();
        agent.todos.retain(|t| t.id != todo_id);
        if agent.todos.len() == before {
            return Err(SwarmError::NotFound(format!("todo {} not found", todo_id)));
        }
        self.registry.persist_record(&agent);
        Ok(())
    }

    /// Send a todo's text through the engine as a user turn; mark the todo
    /// done (with a completion timestamp) on success.
    pub async fn execute_todo(
        &self,
        id: &str,
        todo_id: &str,
        on_chunk: ChunkCallback,
    ) -> Result<String, SwarmError> {
        let text = {
            let handle = self.agent_handle(id).await?;
            let agent = handle.read().await;
            agent
                .todos
                .iter()
                .find(|t| t.id == todo_id)
                .map(|t| t.text.clone())
                .ok_or_else(|| SwarmError::NotFound(format!("todo {} not found", todo_id)))?
        };

        let response = self
            .turn_with_status(id, text, HistoryKind::Plain, 0, on_chunk)
            .await?;
        self.complete_todo(id, todo_id).await;
        Ok(response)
    }

    /// Run all pending todos sequentially, tolerating individual failures.
    /// Returns `(todo_id, outcome)` pairs in list order.
    pub async fn execute_all_todos(
        &self,
        id: &str,
        on_chunk: ChunkCallback,
    ) -> Result<Vec<(String, Result<String, SwarmError>)>, SwarmError> {
        let pending: Vec<String> = {
            let handle = self.agent_handle(id).await?;
            let agent = handle.read().await;
            agent
                .todos
                .iter()
                .filter(|t| !t.done)
                .map(|t| t.id.clone())
                .collect()
        };

        let mut outcomes = Vec::with_capacity(pending.len());
        for todo_id in pending {
            let result = self
                .execute_todo(id, &todo_id, Arc::clone(&on_chunk))
                .await;
            if let Err(e) = &result {
                log::warn!("todo {} on agent {} failed: {}", todo_id, id, e);
            }
            outcomes.push((todo_id, result));
        }
        Ok(outcomes)
    }

    // ---- RAG operations ----------------------------------------------------

    /// Attach a reference document.
    pub async fn add_rag_doc(
        &self,
        id: &str,
        name: &str,
        content: &str,
    ) -> Result<RagDoc, SwarmError> {
        if name.trim().is_empty() {
            return Err(SwarmError::BadRequest("document name is required".to_string()));
        }
        let handle = self.agent_handle(id).await?;
        let mut agent = handle.write().await;
        let doc = RagDoc::new(name, content);
        agent.rag_docs.push(doc.clone());
        self.registry.persist_record(&agent);
        Ok(doc)
    }

    /// Remove a reference document.
    pub async fn delete_rag_doc(&self, id: &str, doc_id: &str) -> Result<(), SwarmError> {
        let handle = self.agent_handle(id).await?;
        let mut agent = handle.write().await;
        let before = agent.rag_docs.len();
        agent.rag_docs.retain(|d| d.id != doc_id);
        if agent.rag_docs.len() == before {
            return Err(SwarmError::NotFound(format!("document {} not found", doc_id)));
        }
        self.registry.persist_record(&agent);
        Ok(())
    }

    // ---- Turn machinery ----------------------------------------------------

    async fn agent_handle(
        &self,
        id: &str,
    ) -> Result<Arc<tokio::sync::RwLock<Agent>>, SwarmError> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| SwarmError::NotFound(format!("agent {} not found", id)))
    }

    /// Wrapper around [`run_turn`](Self::run_turn) that owns the agent's
    /// busy/idle status, error accounting, and cancellation-token
    /// lifecycle.  Every per-agent entry point (chat, delegation lane
    /// tasks, broadcast, handoff, todo execution) goes through here once;
    /// recursive continuations inside the turn do not.
    async fn turn_with_status(
        &self,
        id: &str,
        message: String,
        inbound: HistoryKind,
        depth: usize,
        on_chunk: ChunkCallback,
    ) -> Result<String, SwarmError> {
        let handle = self.agent_handle(id).await?;
        {
            let mut agent = handle.write().await;
            agent.status = AgentStatus::Busy;
        }
        self.bus.publish(SwarmEvent::StatusChanged {
            id: id.to_string(),
            status: AgentStatus::Busy,
        });

        // Registering up front keeps the invariant: a busy agent has
        // exactly one token, shared by its recursive continuations.
        let _token = self.cancels.token_for(id);

        let result = self.run_turn(id, message, inbound, depth, on_chunk).await;

        let status = match &result {
            Ok(_) | Err(SwarmError::Cancelled) => AgentStatus::Idle,
            Err(_) => AgentStatus::Error,
        };
        {
            let mut agent = handle.write().await;
            agent.status = status;
            agent.thinking.clear();
            if let Err(e) = &result {
                if !matches!(e, SwarmError::Cancelled) {
                    agent.metrics.errors += 1;
                }
            }
            agent.updated_at = Utc::now();
            self.registry.persist_record(&agent);
        }
        self.bus.publish(SwarmEvent::StatusChanged {
            id: id.to_string(),
            status,
        });
        self.cancels.remove(id);
        result
    }

    /// One engine invocation: stream, detect, recurse.
    #[async_recursion]
    async fn run_turn(
        &self,
        id: &str,
        message: String,
        inbound: HistoryKind,
        depth: usize,
        on_chunk: ChunkCallback,
    ) -> Result<String, SwarmError> {
        let handle = self.agent_handle(id).await?;
        let token = self.cancels.token_for(id);

        // -- building --------------------------------------------------------
        let snapshot = {
            let agent = handle.read().await;
            let tail_start = agent.history.len().saturating_sub(HISTORY_WINDOW);
            TurnSnapshot {
                id: agent.id.clone(),
                name: agent.name.clone(),
                leader: agent.leader,
                project: agent.project.clone(),
                instructions: agent.instructions.clone(),
                temperature: agent.temperature,
                max_tokens: agent.max_tokens,
                todos: agent.todos.clone(),
                rag_docs: agent.rag_docs.clone(),
                history_tail: agent.history[tail_start..].to_vec(),
            }
        };

        let roster = if snapshot.leader && depth == 0 {
            Some(self.build_roster(&snapshot.id).await)
        } else {
            None
        };

        {
            let mut agent = handle.write().await;
            agent
                .history
                .push(HistoryEntry::new(Role::User, message.clone(), inbound.clone()));
        }

        let prompt = compose_prompt(&snapshot, roster.as_deref(), &message);
        let options = ChatOptions {
            temperature: snapshot.temperature,
            max_tokens: snapshot.max_tokens,
        };
        let client = {
            let agent = handle.read().await;
            self.factory.client_for(&agent)?
        };

        // -- streaming -------------------------------------------------------
        self.bus.publish(SwarmEvent::StreamStarted {
            id: id.to_string(),
        });
        let mut stream = match client.stream_chat(&prompt, &options).await {
            Ok(stream) => stream,
            Err(e) => {
                self.bus.publish(SwarmEvent::StreamFailed {
                    id: id.to_string(),
                    error: e.to_string(),
                });
                return Err(SwarmError::Provider(e.to_string()));
            }
        };

        let mut full_response = String::new();
        let mut usage = (0usize, 0usize);
        let mut detected = 0usize;
        let mut pending: Vec<PendingDelegation> = Vec::new();
        let delegations_allowed = snapshot.leader && depth < self.config.max_depth;

        loop {
            let item = tokio::select! {
                _ = token.cancelled() => return Err(SwarmError::Cancelled),
                item = stream.next() => item,
            };
            match item {
                None => break,
                Some(Err(e)) => {
                    self.bus.publish(SwarmEvent::StreamFailed {
                        id: id.to_string(),
                        error: e.to_string(),
                    });
                    return Err(SwarmError::Provider(e.to_string()));
                }
                Some(Ok(StreamChunk::Done {
                    input_tokens,
                    output_tokens,
                })) => {
                    usage = (input_tokens, output_tokens);
                }
                Some(Ok(StreamChunk::Text { delta })) => {
                    full_response.push_str(&delta);
                    {
                        let mut agent = handle.write().await;
                        agent.thinking = full_response.clone();
                    }
                    self.bus.publish(SwarmEvent::Thinking {
                        id: id.to_string(),
                        thinking: full_response.clone(),
                    });
                    self.bus.publish(SwarmEvent::StreamChunk {
                        id: id.to_string(),
                        chunk: delta.clone(),
                    });
                    on_chunk(&delta);

                    if delegations_allowed {
                        let found = parse_delegations(&full_response);
                        while detected < found.len() {
                            let dispatched = self
                                .dispatch_delegation(&snapshot, &found[detected], depth, &on_chunk)
                                .await;
                            pending.push(dispatched);
                            detected += 1;
                        }
                    }
                }
            }
        }
        self.bus.publish(SwarmEvent::StreamEnded {
            id: id.to_string(),
        });

        // -- post-processing -------------------------------------------------
        {
            let mut agent = handle.write().await;
            agent.history.push(HistoryEntry::new(
                Role::Assistant,
                full_response.clone(),
                HistoryKind::Plain,
            ));
            agent.metrics.input_tokens += usage.0 as u64;
            agent.metrics.output_tokens += usage.1 as u64;
            if inbound.is_task() {
                agent.metrics.total_messages += 1;
            }
            agent.metrics.last_active = Some(Utc::now());
            agent.thinking.clear();
            self.registry.persist_record(&agent);
        }

        let at_limit = depth >= self.config.max_depth;

        if snapshot.project.is_some() && !at_limit {
            let calls = parse_tool_calls(&full_response);
            if !calls.is_empty() {
                let results = self.execute_tools(&snapshot, &calls, &token).await?;
                let continuation = format_tool_results(&results);
                return self
                    .run_turn(
                        id,
                        continuation,
                        HistoryKind::ToolResult { results },
                        depth + 1,
                        on_chunk,
                    )
                    .await;
            }
        }

        if delegations_allowed {
            // Finalise delegations that completed between the last text
            // chunk and stream end.
            let found = parse_delegations(&full_response);
            while detected < found.len() {
                let dispatched = self
                    .dispatch_delegation(&snapshot, &found[detected], depth, &on_chunk)
                    .await;
                pending.push(dispatched);
                detected += 1;
            }

            if !pending.is_empty() {
                let results = self.await_delegations(pending, &token).await?;
                let continuation = format_delegation_results(&results);
                return self
                    .run_turn(
                        id,
                        continuation,
                        HistoryKind::DelegationResult { results },
                        depth + 1,
                        on_chunk,
                    )
                    .await;
            }
        }

        if at_limit && (snapshot.project.is_some() || snapshot.leader) {
            log::warn!(
                "agent {}: recursion depth {} reached the limit, returning raw response",
                id,
                depth
            );
        }

        Ok(full_response)
    }

    /// Roster block enumerating every *other* agent, plus the delegation
    /// teaching text.  Leaders receive this at recursion depth 0 only.
    async fn build_roster(&self, self_id: &str) -> String {
        let mut roster = String::from("## Team roster\nYou lead a team. Your teammates:\n");
        for view in self.registry.list().await {
            if view.id == self_id {
                continue;
            }
            let role = if view.role.is_empty() {
                "specialist"
            } else {
                view.role.as_str()
            };
            roster.push_str(&format!("- {} ({}): {}\n", view.name, role, view.description));
        }
        roster.push_str(
            "\nTo delegate a subtask, write @delegate(AgentName, \"task description\") in your \
             reply. Delegate only to teammates on the roster. If a teammate reports an error, \
             decide whether to retry, reassign, or handle it yourself.",
        );
        roster
    }

    /// Resolve and dispatch one delegation onto the target's task lane.
    async fn dispatch_delegation(
        &self,
        leader: &TurnSnapshot,
        delegation: &Delegation,
        depth: usize,
        on_chunk: &ChunkCallback,
    ) -> PendingDelegation {
        let resolved = self
            .registry
            .resolve_by_name(&delegation.agent, Some(&leader.id))
            .await;

        let (target_id, target_name) = match resolved {
            Some(found) => found,
            None => {
                log::warn!(
                    "agent {}: delegation target {} not found",
                    leader.id,
                    delegation.agent
                );
                return PendingDelegation {
                    target_id: String::new(),
                    target_name: delegation.agent.clone(),
                    task: delegation.task.clone(),
                    rx: None,
                    immediate_error: Some(format!(
                        "Agent \"{}\" not found in swarm",
                        delegation.agent
                    )),
                };
            }
        };

        self.bus.publish(SwarmEvent::Delegation {
            from_id: leader.id.clone(),
            from_name: leader.name.clone(),
            to_id: target_id.clone(),
            to_name: target_name.clone(),
            task: delegation.task.clone(),
        });
        on_chunk(&format!("\n--- Delegating to {} ---\n", target_name));

        // Track the handoff as a todo on the target.
        let todo_id = match self.registry.get(&target_id).await {
            Some(handle) => {
                let mut agent = handle.write().await;
                let todo = Todo::new(format!("[From {}] {}", leader.name, delegation.task));
                let todo_id = todo.id.clone();
                agent.todos.push(todo);
                Some(todo_id)
            }
            None => None,
        };

        let engine = self.clone();
        let lane_target = target_id.clone();
        let message = format!("[TASK from {}]: {}", leader.name, delegation.task);
        let kind = HistoryKind::DelegationTask {
            from_name: leader.name.clone(),
        };
        let callback = Arc::clone(on_chunk);
        let next_depth = depth + 1;

        let rx = self
            .queue
            .enqueue(
                &target_id,
                Box::new(move || {
                    Box::pin(async move {
                        let outcome = engine
                            .turn_with_status(&lane_target, message, kind, next_depth, callback)
                            .await;
                        if let Some(todo_id) = todo_id {
                            engine.complete_todo(&lane_target, &todo_id).await;
                        }
                        outcome
                    })
                }),
            )
            .await;

        PendingDelegation {
            target_id,
            target_name,
            task: delegation.task.clone(),
            rx: Some(rx),
            immediate_error: None,
        }
    }

    /// Await every in-flight delegation, in textual order, honouring the
    /// leader's cancellation token while waiting.
    async fn await_delegations(
        &self,
        pending: Vec<PendingDelegation>,
        token: &CancellationToken,
    ) -> Result<Vec<DelegationResult>, SwarmError> {
        let mut results = Vec::with_capacity(pending.len());
        for delegation in pending {
            let mut result = DelegationResult {
                agent_id: delegation.target_id,
                agent_name: delegation.target_name,
                task: delegation.task,
                response: None,
                error: None,
            };
            match (delegation.immediate_error, delegation.rx) {
                (Some(error), _) => result.error = Some(error),
                (None, None) => result.error = Some("delegation was not dispatched".to_string()),
                (None, Some(rx)) => {
                    let outcome = tokio::select! {
                        _ = token.cancelled() => return Err(SwarmError::Cancelled),
                        outcome = rx => outcome,
                    };
                    match outcome {
                        Ok(Ok(response)) => result.response = Some(response),
                        Ok(Err(e)) => result.error = Some(e.to_string()),
                        Err(_) => result.error = Some("delegation was cancelled".to_string()),
                    }
                }
            }
            results.push(result);
        }
        Ok(results)
    }

    /// Execute parsed tool calls in textual order, publishing tool events
    /// and honouring cancellation between calls.
    async fn execute_tools(
        &self,
        snapshot: &TurnSnapshot,
        calls: &[ToolCall],
        token: &CancellationToken,
    ) -> Result<Vec<ToolResult>, SwarmError> {
        let project = snapshot
            .project
            .as_deref()
            .unwrap_or_default();
        let dispatcher = ToolDispatcher::new(self.config.projects_root.join(project));

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if token.is_cancelled() {
                return Err(SwarmError::Cancelled);
            }

            if call.name == ToolName::ReportError {
                let description = call.args.first().cloned().unwrap_or_default();
                self.bus.publish(SwarmEvent::ErrorReport {
                    id: snapshot.id.clone(),
                    name: snapshot.name.clone(),
                    description,
                    timestamp: Utc::now(),
                });
                results.push(ToolResult::error_report(call));
                continue;
            }

            self.bus.publish(SwarmEvent::ToolStarted {
                id: snapshot.id.clone(),
                name: snapshot.name.clone(),
                tool: call.name.to_string(),
                args: call.args.clone(),
            });
            let result = dispatcher.dispatch(call).await;
            if result.success {
                self.bus.publish(SwarmEvent::ToolCompleted {
                    id: snapshot.id.clone(),
                    name: snapshot.name.clone(),
                    tool: call.name.to_string(),
                    args: call.args.clone(),
                    preview: preview(&result.output),
                });
            } else {
                self.bus.publish(SwarmEvent::ToolFailed {
                    id: snapshot.id.clone(),
                    name: snapshot.name.clone(),
                    tool: call.name.to_string(),
                    args: call.args.clone(),
                    error: result.error.clone().unwrap_or_default(),
                });
            }
            results.push(result);
        }
        Ok(results)
    }

    /// Mark a todo done with a completion timestamp (engine-completed path).
    async fn complete_todo(&self, id: &str, todo_id: &str) {
        if let Some(handle) = self.registry.get(id).await {
            let mut agent = handle.write().await;
            if let Some(todo) = agent.todos.iter_mut().find(|t| t.id == todo_id) {
                todo.done = true;
                todo.completed_at = Some(Utc::now());
            }
            self.registry.persist_record(&agent);
        }
    }
}

/// First `PREVIEW_CHARS` characters of `text`, for event payloads.
fn preview(text: &str) -> String {
    let mut end = text.len().min(PREVIEW_CHARS);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Documentation of the tool vocabulary injected into project-bound prompts.
const TOOL_DOCS: &str = "\
You can operate on the project files with these tools. Write each invocation \
on its own line, exactly as shown:\n\
- @read_file(\"path/to/file\") — read a file\n\
- @write_file(path/to/file, \"\"\"full file content\"\"\") — create or overwrite a file\n\
- @append_file(path/to/file, \"\"\"content to append\"\"\") — append to a file\n\
- @list_dir(\"path\") — list a directory\n\
- @search_files(*.rs, pattern) — find text across files matching a glob\n\
- @run_command(\"command\") — run a shell command in the project root\n\
- @report_error(\"what is blocking you\") — signal that you are blocked\n\
Multi-line content goes between triple quotes. All paths are relative to the \
project root. After your tools run, the results are sent back to you.";

/// Compose the role-tagged prompt sequence for one turn.
fn compose_prompt(snapshot: &TurnSnapshot, roster: Option<&str>, message: &str) -> Vec<Message> {
    let mut system = snapshot.instructions.clone();

    if let Some(roster) = roster {
        system.push_str("\n\n");
        system.push_str(roster);
    }
    for doc in &snapshot.rag_docs {
        system.push_str(&format!("\n\n## Reference: {}\n{}", doc.name, doc.content));
    }
    if !snapshot.todos.is_empty() {
        system.push_str("\n\n## Todo list\n");
        for todo in &snapshot.todos {
            system.push_str(&format!(
                "- [{}] {}\n",
                if todo.done { 'x' } else { ' ' },
                todo.text
            ));
        }
    }
    if let Some(project) = &snapshot.project {
        system.push_str(&format!(
            "\n\n## Project context\nYou are working inside the project \"{}\".\n{}",
            project, TOOL_DOCS
        ));
    }

    let mut messages = vec![Message::new(Role::System, system)];
    for entry in &snapshot.history_tail {
        messages.push(Message::new(entry.role, entry.content.clone()));
    }
    messages.push(Message::new(Role::User, message));
    messages
}

/// Format tool outcomes into the `[TOOL RESULTS]` continuation message.
fn format_tool_results(results: &[ToolResult]) -> String {
    let mut message = String::from("[TOOL RESULTS]\n");
    for result in results {
        message.push_str(&format!("--- {}({}) ---\n", result.tool, result.args.join(", ")));
        if result.success {
            message.push_str(&result.output);
            if result.truncated {
                message.push_str("\n[output truncated]");
            }
        } else {
            message.push_str(&format!(
                "ERROR: {}",
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
        message.push_str("\n\n");
    }

    let any_failure = results.iter().any(|r| !r.success);
    let any_report = results.iter().any(|r| r.is_error_report);
    if any_failure {
        message.push_str("Some tool calls failed. Review the errors and adapt your approach.");
    } else if any_report {
        message.push_str(
            "You reported an error. Summarise what went wrong so your manager can decide how to proceed.",
        );
    } else {
        message.push_str("Use these results to continue the task.");
    }
    message
}

/// Format delegation outcomes into the `[DELEGATION RESULTS]` continuation.
fn format_delegation_results(results: &[DelegationResult]) -> String {
    let mut message = String::from("[DELEGATION RESULTS]\n");
    for result in results {
        match (&result.response, &result.error) {
            (Some(response), _) => {
                message.push_str(&format!("--- Response from {} ---\n{}\n\n", result.agent_name, response));
            }
            (None, Some(error)) => {
                message.push_str(&format!("--- Error from {} ---\n{}\n\n", result.agent_name, error));
            }
            (None, None) => {
                message.push_str(&format!("--- Response from {} ---\n(no output)\n\n", result.agent_name));
            }
        }
    }

    if results.iter().any(|r| r.error.is_some()) {
        message.push_str(
            "Some agents reported errors. Decide whether to retry, reassign, or adapt your plan accordingly.",
        );
    } else {
        message.push_str("Synthesise these results into a single coherent answer for the user.");
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> TurnSnapshot {
        TurnSnapshot {
            id: "a1".to_string(),
            name: "Agent".to_string(),
            leader: false,
            project: Some("demo".to_string()),
            instructions: "Be helpful.".to_string(),
            temperature: 0.5,
            max_tokens: 1024,
            todos: vec![],
            rag_docs: vec![],
            history_tail: vec![],
        }
    }

    #[test]
    fn test_compose_prompt_shape() {
        let mut snap = snapshot();
        snap.rag_docs.push(RagDoc::new("Style guide", "Use tabs."));
        snap.todos.push(Todo::new("ship it"));
        snap.history_tail.push(HistoryEntry::new(
            Role::User,
            "earlier question",
            HistoryKind::Plain,
        ));

        let prompt = compose_prompt(&snap, Some("## Team roster\n- QA (qa): tests"), "now");
        assert_eq!(prompt.len(), 3);
        let system = &prompt[0].content;
        assert!(system.starts_with("Be helpful."));
        assert!(system.contains("## Team roster"));
        assert!(system.contains("## Reference: Style guide"));
        assert!(system.contains("- [ ] ship it"));
        assert!(system.contains("## Project context"));
        assert!(system.contains("@write_file"));
        assert_eq!(prompt[1].content, "earlier question");
        assert_eq!(prompt[2].content, "now");
    }

    #[test]
    fn test_tool_results_formatting() {
        let read = ToolCall::new(ToolName::ReadFile, vec!["README.md".into()]);
        let ok = ToolResult::ok(&read, "# Hello");
        let formatted = format_tool_results(&[ok.clone()]);
        assert!(formatted.starts_with("[TOOL RESULTS]\n--- read_file(README.md) ---\n# Hello\n\n"));
        assert!(formatted.ends_with("Use these results to continue the task."));

        let bad = ToolResult::err(&read, "path traversal not allowed");
        let formatted = format_tool_results(&[ok.clone(), bad]);
        assert!(formatted.contains("ERROR: path traversal not allowed"));
        assert!(formatted.ends_with("adapt your approach."));

        let report = ToolResult::error_report(&ToolCall::new(
            ToolName::ReportError,
            vec!["missing dep".into()],
        ));
        let formatted = format_tool_results(&[ok, report]);
        assert!(formatted.contains("You reported an error."));
    }

    #[test]
    fn test_delegation_results_formatting() {
        let good = DelegationResult {
            agent_id: "d1".into(),
            agent_name: "Developer".into(),
            task: "build".into(),
            response: Some("done".into()),
            error: None,
        };
        let bad = DelegationResult {
            agent_id: String::new(),
            agent_name: "Ghost".into(),
            task: "haunt".into(),
            response: None,
            error: Some("Agent \"Ghost\" not found in swarm".into()),
        };

        let formatted = format_delegation_results(&[good.clone()]);
        assert!(formatted.contains("--- Response from Developer ---\ndone"));
        assert!(formatted.ends_with("Synthesise these results into a single coherent answer for the user."));

        let formatted = format_delegation_results(&[good, bad]);
        assert!(formatted.contains("--- Error from Ghost ---"));
        assert!(formatted.ends_with("adapt your plan accordingly."));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(SwarmError::Cancelled.to_string(), "stopped by user");
        assert_eq!(
            SwarmError::NotFound("agent x not found".into()).to_string(),
            "agent x not found"
        );
    }
}
