//! Kernel configuration.
//!
//! Provides the [`SwarmConfig`] struct consumed by
//! [`SwarmEngine`](crate::engine::SwarmEngine) and the provider adapters.
//! Users construct this manually — no file parsing dependencies are
//! required.
//!
//! # Example
//!
//! ```rust
//! use swarmllm::config::SwarmConfig;
//! use std::path::PathBuf;
//!
//! // Use the defaults (/projects root, depth limit 5)
//! let config = SwarmConfig::default();
//! assert_eq!(config.max_depth, 5);
//!
//! // Or customise
//! let config = SwarmConfig {
//!     projects_root: PathBuf::from("/var/data/projects"),
//!     ..SwarmConfig::default()
//! };
//! ```

use std::path::PathBuf;

/// Retry policy applied by the provider adapters to transient failures
/// (connection resets, HTTP 503).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay_ms: 2000,
        }
    }
}

/// Global configuration for the orchestration kernel.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Base path under which bound project directories resolve.  An agent
    /// with `project = Some("demo")` gets its tool I/O contained to
    /// `projects_root/demo`.
    pub projects_root: PathBuf,
    /// Maximum conversation-engine recursion depth.  Beyond it, tool and
    /// delegation processing is skipped and the raw assistant text is
    /// returned.
    pub max_depth: usize,
    /// Retry policy for the provider adapters.
    pub retry: RetryPolicy,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            projects_root: PathBuf::from("/projects"),
            max_depth: 5,
            retry: RetryPolicy::default(),
        }
    }
}
