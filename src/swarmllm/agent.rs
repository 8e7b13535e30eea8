//! Agent records and their owned data.
//!
//! This module defines the [`Agent`] struct — the persistent configuration
//! that binds a model, an identity, instruction text, an optional project,
//! and runtime state — together with everything the record owns:
//! [`Todo`]s, [`RagDoc`]s, [`HistoryEntry`]s, and the [`Metrics`] counters.
//!
//! Records live inside the [`AgentRegistry`](crate::registry::AgentRegistry)
//! and are driven by the [`SwarmEngine`](crate::engine::SwarmEngine).  Reads
//! that leave the kernel go through [`Agent::sanitized`], which replaces the
//! credential with a boolean so secrets never travel on the event bus.
//!
//! # Example
//!
//! ```rust
//! use swarmllm::agent::{Agent, ProviderKind};
//!
//! let agent = Agent::new("architect", "Architect")
//!     .with_role("architect")
//!     .with_description("Designs the system and delegates implementation work.")
//!     .with_provider(ProviderKind::Anthropic)
//!     .with_model("claude-sonnet-4-0")
//!     .with_instructions("You are the lead architect of a software team.")
//!     .as_leader();
//!
//! assert!(agent.leader);
//! assert_eq!(agent.sanitized().name, "Architect");
//! ```

use crate::swarmllm::client_wrapper::Role;
use crate::swarmllm::delegation::DelegationResult;
use crate::swarmllm::tools::ToolResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Selector for the model backend an agent talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    /// A local chat server speaking newline-delimited JSON (e.g. Ollama).
    #[serde(rename = "localChat")]
    LocalChat,
    /// Anthropic's Messages API.
    #[serde(rename = "anthropic")]
    Anthropic,
    /// OpenAI's Chat Completions API.
    #[serde(rename = "openAIChat")]
    OpenAiChat,
    /// OpenAI's legacy Completions API (single joined prompt).
    #[serde(rename = "openAICompletion")]
    OpenAiCompletion,
    /// Any OpenAI-compatible chat endpoint reachable at a custom base URL.
    #[serde(rename = "openAICompatible")]
    OpenAiCompatible,
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::LocalChat
    }
}

/// Runtime status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// No turn in flight.
    Idle,
    /// A turn is streaming or post-processing.
    Busy,
    /// The last turn failed; cleared by the next successful turn.
    Error,
}

impl Default for AgentStatus {
    fn default() -> Self {
        AgentStatus::Idle
    }
}

/// A single todo item owned by an agent.
///
/// The completion timestamp is set only when the todo was completed through
/// the engine (a finished delegation or [`execute_todo`](crate::engine::SwarmEngine::execute_todo));
/// manually toggled todos carry none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    /// Opaque identifier (uuid-v4).
    pub id: String,
    /// The task text.
    pub text: String,
    /// Whether the todo is done.
    pub done: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Completion time, present only for engine-completed todos.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Todo {
    /// Create a pending todo with a fresh id.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            done: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// A reference document attached to an agent and injected into its prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagDoc {
    /// Opaque identifier (uuid-v4).
    pub id: String,
    /// Display name used as the block label in prompts.
    pub name: String,
    /// Full document text.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl RagDoc {
    /// Create a document with a fresh id.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Provenance of a history entry.
///
/// The tag is authoritative: the engine never infers provenance from content
/// prefixes.  Serialised with a `kind` discriminant field so persisted blobs
/// and realtime payloads carry the same shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum HistoryKind {
    /// A user-typed message or a plain assistant response.
    Plain,
    /// An engine-built continuation carrying tool outcomes.
    ToolResult {
        /// The structured results, in execution order.
        results: Vec<ToolResult>,
    },
    /// An engine-built continuation carrying delegation outcomes.
    DelegationResult {
        /// The structured results, in textual order of the delegations.
        results: Vec<DelegationResult>,
    },
    /// A task handed to this agent by a leader.
    DelegationTask {
        /// Display name of the delegating leader.
        from_name: String,
    },
}

impl HistoryKind {
    /// Whether this entry represents a real inbound task (as opposed to an
    /// engine-generated continuation).  Turns fed by a real task bump
    /// `total_messages`; continuations do not.
    pub fn is_task(&self) -> bool {
        matches!(self, HistoryKind::Plain | HistoryKind::DelegationTask { .. })
    }
}

/// One entry in an agent's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Who authored the entry.
    pub role: Role,
    /// The entry text.
    pub content: String,
    /// Append time.
    pub timestamp: DateTime<Utc>,
    /// Provenance tag and structured payload.
    #[serde(flatten)]
    pub kind: HistoryKind,
}

impl HistoryEntry {
    /// Create an entry timestamped now.
    pub fn new(role: Role, content: impl Into<String>, kind: HistoryKind) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Per-agent usage counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    /// Completed assistant turns (continuations excluded).
    pub total_messages: u64,
    /// Cumulative prompt tokens across all streams.
    pub input_tokens: u64,
    /// Cumulative generated tokens across all streams.
    pub output_tokens: u64,
    /// Number of turns that ended in error.
    pub errors: u64,
    /// Time of the last completed turn.
    pub last_active: Option<DateTime<Utc>>,
}

/// A persistent agent configuration plus its runtime state.
///
/// Identity and configuration fields are set through the builder methods;
/// runtime fields (`status`, `thinking`, `metrics`, `history`) are mutated
/// only by the engine and are not reachable through
/// [`AgentUpdate`](crate::registry::AgentUpdate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Stable identifier, unique within the registry.
    pub id: String,
    /// Human-readable display name.  Names may collide; resolution is
    /// case-insensitive with a first-by-insertion-order tiebreak.
    pub name: String,
    /// Short role tag (e.g. `"developer"`, `"qa"`).
    pub role: String,
    /// Free-form description embedded into leader rosters.
    pub description: String,
    /// Which backend this agent talks to.
    pub provider: ProviderKind,
    /// Model identifier passed to the backend.
    pub model: String,
    /// Optional endpoint URL overriding the provider default.
    pub endpoint: Option<String>,
    /// Optional API credential.  Persisted in clear (same trust boundary as
    /// the storage) but never included in sanitised views or event payloads.
    pub credential: Option<String>,
    /// System instructions prepended to every prompt.
    pub instructions: String,
    /// Runtime status.
    #[serde(default)]
    pub status: AgentStatus,
    /// Sampling temperature in `0.0..=1.0`.
    pub temperature: f32,
    /// Maximum output tokens per stream.
    pub max_tokens: u32,
    /// Ordered todo list.
    #[serde(default)]
    pub todos: Vec<Todo>,
    /// Ordered reference documents.
    #[serde(default)]
    pub rag_docs: Vec<RagDoc>,
    /// Append-only conversation history (except `clear` / `truncate`).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Transient in-progress assistant text.  Never persisted.
    #[serde(skip)]
    pub thinking: String,
    /// Usage counters.
    #[serde(default)]
    pub metrics: Metrics,
    /// Name of the bound project directory, if any.
    pub project: Option<String>,
    /// Leaders receive a roster and may emit `@delegate(...)` commands.
    #[serde(default)]
    pub leader: bool,
    /// Display icon for UI surfaces.
    pub icon: Option<String>,
    /// Display colour for UI surfaces.
    pub color: Option<String>,
    /// Record creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time (configuration or runtime).
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Create a new agent with the mandatory identity information.
    ///
    /// Defaults: local chat provider, temperature 0.7, 4096 output tokens,
    /// no project binding, not a leader.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            role: String::new(),
            description: String::new(),
            provider: ProviderKind::default(),
            model: String::new(),
            endpoint: None,
            credential: None,
            instructions: String::new(),
            status: AgentStatus::Idle,
            temperature: 0.7,
            max_tokens: 4096,
            todos: Vec::new(),
            rag_docs: Vec::new(),
            history: Vec::new(),
            thinking: String::new(),
            metrics: Metrics::default(),
            project: None,
            leader: false,
            icon: None,
            color: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create an agent with a generated uuid-v4 id.
    pub fn with_generated_id(name: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), name)
    }

    /// Attach a short role tag.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Attach a description used in leader rosters.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Select the model backend.
    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    /// Set the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the provider's default endpoint URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Attach an API credential.
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Set the system instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Override the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Override the output token cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Bind the agent to a project directory by name.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Mark the agent as a leader.
    pub fn as_leader(mut self) -> Self {
        self.leader = true;
        self
    }

    /// Set display metadata.
    pub fn with_display(mut self, icon: impl Into<String>, color: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self.color = Some(color.into());
        self
    }

    /// Produce a sanitised view with the credential replaced by a boolean.
    pub fn sanitized(&self) -> AgentView {
        AgentView {
            id: self.id.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
            description: self.description.clone(),
            provider: self.provider,
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            has_credential: self.credential.is_some(),
            instructions: self.instructions.clone(),
            status: self.status,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            todos: self.todos.clone(),
            rag_docs: self.rag_docs.clone(),
            metrics: self.metrics.clone(),
            project: self.project.clone(),
            leader: self.leader,
            icon: self.icon.clone(),
            color: self.color.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A sanitised agent record safe for event payloads and external reads.
///
/// Mirrors [`Agent`] minus the credential (replaced by `has_credential`),
/// the transient thinking buffer (which travels on `agent:thinking` events),
/// and the history (which the transport fetches through the history
/// operations).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentView {
    pub id: String,
    pub name: String,
    pub role: String,
    pub description: String,
    pub provider: ProviderKind,
    pub model: String,
    pub endpoint: Option<String>,
    pub has_credential: bool,
    pub instructions: String,
    pub status: AgentStatus,
    pub temperature: f32,
    pub max_tokens: u32,
    pub todos: Vec<Todo>,
    pub rag_docs: Vec<RagDoc>,
    pub metrics: Metrics,
    pub project: Option<String>,
    pub leader: bool,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
