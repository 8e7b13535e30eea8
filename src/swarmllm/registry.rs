//! In-memory agent registry.
//!
//! The [`AgentRegistry`] owns every [`Agent`] record: an id-keyed map with
//! an insertion-order list used for deterministic iteration and name
//! tiebreaks.  CRUD operations publish the corresponding `agent:*` events
//! and write through to the optional persistence collaborator.  Reads that
//! leave the kernel return sanitised [`AgentView`]s.
//!
//! Updates go through [`AgentUpdate`], a whitelist of configuration fields;
//! runtime state (status, thinking, metrics, history) is not expressible
//! through it and can only be mutated by the engine.
//!
//! # Example
//!
//! ```rust
//! use swarmllm::agent::Agent;
//! use swarmllm::event::EventBus;
//! use swarmllm::registry::{AgentRegistry, AgentUpdate};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = AgentRegistry::new(EventBus::default());
//! registry.create(Agent::new("dev-1", "Developer")).await.unwrap();
//!
//! let update = AgentUpdate {
//!     description: Some("Implements features".to_string()),
//!     ..AgentUpdate::default()
//! };
//! let view = registry.update("dev-1", update).await.unwrap();
//! assert_eq!(view.description, "Implements features");
//! # }
//! ```

use crate::swarmllm::agent::{Agent, AgentStatus, AgentView, ProviderKind};
use crate::swarmllm::engine::SwarmError;
use crate::swarmllm::event::{EventBus, SwarmEvent};
use crate::swarmllm::persistence::AgentStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Whitelisted fields accepted by [`AgentRegistry::update`].
///
/// Every field is optional; `None` leaves the current value untouched.
/// Clearing an optional record field (endpoint, credential, project,
/// icon, colour) is done by passing `Some(None)`.
#[derive(Debug, Clone, Default)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub role: Option<String>,
    pub description: Option<String>,
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub endpoint: Option<Option<String>>,
    pub credential: Option<Option<String>>,
    pub instructions: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub project: Option<Option<String>>,
    pub leader: Option<bool>,
    pub icon: Option<Option<String>>,
    pub color: Option<Option<String>>,
}

/// Id-keyed store of agent records with read-through persistence.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<RwLock<Agent>>>>,
    /// Registry insertion order; drives iteration and name tiebreaks.
    order: RwLock<Vec<String>>,
    bus: EventBus,
    store: Option<Arc<dyn AgentStore>>,
}

impl AgentRegistry {
    /// Create an empty in-memory registry.
    pub fn new(bus: EventBus) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            bus,
            store: None,
        }
    }

    /// Attach a persistence collaborator (builder pattern).
    pub fn with_store(mut self, store: Arc<dyn AgentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Load persisted records, resetting runtime state: status becomes
    /// idle and thinking buffers are cleared.  Does not publish events.
    pub async fn load_from_store(&self) -> Result<usize, SwarmError> {
        let store = match &self.store {
            Some(store) => Arc::clone(store),
            None => return Ok(0),
        };
        let records = store
            .load_all()
            .await
            .map_err(|e| SwarmError::BadRequest(format!("failed to load agents: {}", e)))?;

        let mut count = 0;
        for mut agent in records {
            agent.status = AgentStatus::Idle;
            agent.thinking.clear();
            let id = agent.id.clone();
            {
                let mut agents = self.agents.write().await;
                if agents.contains_key(&id) {
                    continue;
                }
                agents.insert(id.clone(), Arc::new(RwLock::new(agent)));
            }
            self.order.write().await.push(id);
            count += 1;
        }
        log::info!("loaded {} agent(s) from store", count);
        Ok(count)
    }

    /// Seed a small default team when the registry is empty: one leader
    /// plus two specialists, all on the local chat provider.
    pub async fn seed_defaults(&self) -> Result<(), SwarmError> {
        if !self.order.read().await.is_empty() {
            return Ok(());
        }
        let defaults = vec![
            Agent::with_generated_id("Architect")
                .with_role("leader")
                .with_description("Coordinates the team and breaks requests into subtasks.")
                .with_instructions(
                    "You are the team lead. Decompose requests and delegate focused subtasks.",
                )
                .with_display("compass", "#7c5cff")
                .as_leader(),
            Agent::with_generated_id("Developer")
                .with_role("developer")
                .with_description("Implements features and fixes bugs in the project.")
                .with_instructions("You are a senior software developer. Keep changes minimal.")
                .with_display("wrench", "#2bb673"),
            Agent::with_generated_id("QA")
                .with_role("qa")
                .with_description("Writes and runs tests, reports regressions.")
                .with_instructions("You are a QA engineer. Verify behaviour before declaring done.")
                .with_display("shield", "#ff8c42"),
        ];
        for agent in defaults {
            self.create(agent).await?;
        }
        Ok(())
    }

    /// Insert a new record, publish `agent:created`, persist.
    pub async fn create(&self, agent: Agent) -> Result<AgentView, SwarmError> {
        if agent.id.is_empty() {
            return Err(SwarmError::BadRequest("agent id is required".to_string()));
        }
        if agent.name.trim().is_empty() {
            return Err(SwarmError::BadRequest("agent name is required".to_string()));
        }

        let id = agent.id.clone();
        let view = agent.sanitized();
        {
            let mut agents = self.agents.write().await;
            if agents.contains_key(&id) {
                return Err(SwarmError::BadRequest(format!(
                    "agent id {} already exists",
                    id
                )));
            }
            self.persist_record(&agent);
            agents.insert(id.clone(), Arc::new(RwLock::new(agent)));
        }
        self.order.write().await.push(id);

        self.bus.publish(SwarmEvent::AgentCreated {
            agent: view.clone(),
        });
        Ok(view)
    }

    /// Borrow the shared record handle for `id` (kernel-internal).
    pub async fn get(&self, id: &str) -> Option<Arc<RwLock<Agent>>> {
        self.agents.read().await.get(id).cloned()
    }

    /// Sanitised view of one agent.
    pub async fn view(&self, id: &str) -> Result<AgentView, SwarmError> {
        match self.get(id).await {
            Some(handle) => Ok(handle.read().await.sanitized()),
            None => Err(SwarmError::NotFound(format!("agent {} not found", id))),
        }
    }

    /// Sanitised views of all agents, in insertion order.
    pub async fn list(&self) -> Vec<AgentView> {
        let order = self.order.read().await.clone();
        let agents = self.agents.read().await;
        let mut views = Vec::with_capacity(order.len());
        for id in order {
            if let Some(handle) = agents.get(&id) {
                views.push(handle.read().await.sanitized());
            }
        }
        views
    }

    /// Apply a whitelisted update, publish `agent:updated`, persist.
    pub async fn update(&self, id: &str, update: AgentUpdate) -> Result<AgentView, SwarmError> {
        let handle = self
            .get(id)
            .await
            .ok_or_else(|| SwarmError::NotFound(format!("agent {} not found", id)))?;

        let view = {
            let mut agent = handle.write().await;
            if let Some(name) = update.name {
                if name.trim().is_empty() {
                    return Err(SwarmError::BadRequest("agent name is required".to_string()));
                }
                agent.name = name;
            }
            if let Some(role) = update.role {
                agent.role = role;
            }
            if let Some(description) = update.description {
                agent.description = description;
            }
            if let Some(provider) = update.provider {
                agent.provider = provider;
            }
            if let Some(model) = update.model {
                agent.model = model;
            }
            if let Some(endpoint) = update.endpoint {
                agent.endpoint = endpoint;
            }
            if let Some(credential) = update.credential {
                agent.credential = credential;
            }
            if let Some(instructions) = update.instructions {
                agent.instructions = instructions;
            }
            if let Some(temperature) = update.temperature {
                agent.temperature = temperature.clamp(0.0, 1.0);
            }
            if let Some(max_tokens) = update.max_tokens {
                agent.max_tokens = max_tokens;
            }
            if let Some(project) = update.project {
                agent.project = project;
            }
            if let Some(leader) = update.leader {
                agent.leader = leader;
            }
            if let Some(icon) = update.icon {
                agent.icon = icon;
            }
            if let Some(color) = update.color {
                agent.color = color;
            }
            agent.updated_at = Utc::now();
            self.persist_record(&agent);
            agent.sanitized()
        };

        self.bus.publish(SwarmEvent::AgentUpdated {
            agent: view.clone(),
        });
        Ok(view)
    }

    /// Remove a record, publish `agent:deleted`, delete from the store.
    ///
    /// Callers must abort in-flight work first (the engine's
    /// [`delete_agent`](crate::engine::SwarmEngine::delete_agent) does).
    pub async fn delete(&self, id: &str) -> Result<AgentView, SwarmError> {
        let removed = self.agents.write().await.remove(id);
        let handle = removed.ok_or_else(|| SwarmError::NotFound(format!("agent {} not found", id)))?;
        self.order.write().await.retain(|existing| existing != id);

        let view = handle.read().await.sanitized();
        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            let id = id.to_string();
            tokio::spawn(async move {
                if let Err(e) = store.delete(&id).await {
                    log::warn!("failed to delete agent {} from store: {}", id, e);
                }
            });
        }
        self.bus.publish(SwarmEvent::AgentDeleted {
            agent: view.clone(),
        });
        Ok(view)
    }

    /// Resolve an agent by display name, case-insensitively, optionally
    /// excluding one id (the self-delegation guard).  On name collisions
    /// the first agent by registry insertion order wins.
    pub async fn resolve_by_name(
        &self,
        name: &str,
        exclude_id: Option<&str>,
    ) -> Option<(String, String)> {
        let wanted = name.trim().to_lowercase();
        let order = self.order.read().await.clone();
        let agents = self.agents.read().await;
        for id in order {
            if exclude_id == Some(id.as_str()) {
                continue;
            }
            if let Some(handle) = agents.get(&id) {
                let agent = handle.read().await;
                if agent.name.to_lowercase() == wanted {
                    return Some((agent.id.clone(), agent.name.clone()));
                }
            }
        }
        None
    }

    /// Fire-and-forget write-through to the persistence collaborator.
    pub(crate) fn persist_record(&self, agent: &Agent) {
        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            let snapshot = agent.clone();
            tokio::spawn(async move {
                if let Err(e) = store.save(&snapshot).await {
                    log::warn!("failed to persist agent {}: {}", snapshot.id, e);
                }
            });
        }
    }
}
