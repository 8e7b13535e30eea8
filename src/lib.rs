// src/lib.rs

// Import the top-level `swarmllm` module.
pub mod swarmllm;

// Re-exporting key items for easier external access.
pub use swarmllm::agent::{Agent, AgentStatus, AgentView, HistoryEntry, HistoryKind, ProviderKind};
pub use swarmllm::client_wrapper::{ChatOptions, ClientWrapper, Message, Role, StreamChunk};
pub use swarmllm::config::SwarmConfig;
pub use swarmllm::engine::{ChunkCallback, SwarmEngine, SwarmError};
pub use swarmllm::event::{EventBus, SwarmEvent};
pub use swarmllm::registry::{AgentRegistry, AgentUpdate};

// Flat module aliases mirroring the internal tree.
pub use swarmllm::agent;
pub use swarmllm::cancel;
pub use swarmllm::client_wrapper;
pub use swarmllm::clients;
pub use swarmllm::config;
pub use swarmllm::delegation;
pub use swarmllm::engine;
pub use swarmllm::event;
pub use swarmllm::persistence;
pub use swarmllm::queue;
pub use swarmllm::registry;
pub use swarmllm::tool_parser;
pub use swarmllm::tools;
