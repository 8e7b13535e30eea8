//! Per-agent cancellation tokens.
//!
//! A [`CancelRegistry`] keeps at most one live
//! [`CancellationToken`](tokio_util::sync::CancellationToken) per agent id.
//! The engine registers a token when a turn starts, polls it between
//! streaming chunks, and removes it when the turn's call chain unwinds.
//! [`SwarmEngine::stop`](crate::engine::SwarmEngine::stop) trips the token,
//! aborting the outermost call chain for that agent; nested delegations
//! targeting *other* agents keep their own tokens and continue unless they
//! are stopped too.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Registry of per-agent cancellation tokens.
pub struct CancelRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Get the live token for `agent_id`, creating one if none is
    /// registered.  Recursive turns for the same agent share one token.
    pub fn token_for(&self, agent_id: &str) -> CancellationToken {
        let mut tokens = self.tokens.lock().expect("cancel registry poisoned");
        tokens
            .entry(agent_id.to_string())
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Trip the token for `agent_id`, if one is registered.  Returns
    /// whether a token existed.
    pub fn cancel(&self, agent_id: &str) -> bool {
        let tokens = self.tokens.lock().expect("cancel registry poisoned");
        match tokens.get(agent_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the registration for `agent_id`.  Called when the outermost
    /// turn for the agent unwinds (and on agent deletion).
    pub fn remove(&self, agent_id: &str) {
        self.tokens
            .lock()
            .expect("cancel registry poisoned")
            .remove(agent_id);
    }

    /// Whether a token is currently registered for `agent_id`.
    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.tokens
            .lock()
            .expect("cancel registry poisoned")
            .contains_key(agent_id)
    }
}

impl Default for CancelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
