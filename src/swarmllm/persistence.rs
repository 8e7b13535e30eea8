//! Agent persistence collaborator.
//!
//! The kernel treats storage as a narrow pluggable interface: load
//! everything at startup, save fire-and-forget after mutations, delete on
//! removal.  A missing store is tolerated — the registry then runs purely
//! in memory.
//!
//! [`JsonFileStore`] is the bundled implementation: one pretty-printed JSON
//! blob per agent, keyed by id, under a single directory.  The credential
//! field is persisted in clear; the store shares the trust boundary of the
//! filesystem it writes to.

use crate::swarmllm::agent::Agent;
use async_trait::async_trait;
use std::error::Error;
use std::path::PathBuf;

/// Narrow persistence interface the registry calls.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Load every persisted agent.  Called once at startup.
    async fn load_all(&self) -> Result<Vec<Agent>, Box<dyn Error + Send + Sync>>;

    /// Persist one agent record (upsert).
    async fn save(&self, agent: &Agent) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Remove one agent record.
    async fn delete(&self, id: &str) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Directory-of-JSON-blobs store.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        // Ids are opaque strings; keep the filename safe regardless.
        let safe: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl AgentStore for JsonFileStore {
    async fn load_all(&self) -> Result<Vec<Agent>, Box<dyn Error + Send + Sync>> {
        let mut agents = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Agent>(&raw) {
                Ok(agent) => agents.push(agent),
                Err(e) => {
                    log::warn!("skipping unreadable agent blob {}: {}", path.display(), e);
                }
            }
        }
        Ok(agents)
    }

    async fn save(&self, agent: &Agent) -> Result<(), Box<dyn Error + Send + Sync>> {
        let blob = serde_json::to_string_pretty(agent)?;
        tokio::fs::write(self.path_for(&agent.id), blob).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        let path = self.path_for(id);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }
}
