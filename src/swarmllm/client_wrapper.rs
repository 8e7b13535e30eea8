//! Shared primitives for provider-agnostic streaming chat clients.
//!
//! The kernel interacts with every model backend through the [`ClientWrapper`]
//! trait and the lightweight data types defined in this module.  The trait
//! abstracts over concrete vendor implementations while the supporting structs
//! describe chat messages, streaming chunks, and token accounting.
//!
//! A [`ClientWrapper`] exposes exactly one operation: open a streaming chat
//! given a role-tagged prompt sequence plus [`ChatOptions`], and return a lazy
//! sequence of [`StreamChunk`]s.  The stream yields zero or more
//! [`StreamChunk::Text`] deltas followed by at most one
//! [`StreamChunk::Done`] carrying token usage, which is always the final
//! element when present.
//!
//! # Streaming quick start
//!
//! ```rust,no_run
//! use swarmllm::client_wrapper::{ChatOptions, ClientWrapper, Message, Role, StreamChunk};
//! use swarmllm::clients::openai::OpenAiChatClient;
//! use futures_util::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let key = std::env::var("OPENAI_API_KEY")?;
//!     let client = OpenAiChatClient::new(&key, "gpt-4o-mini");
//!     let request = [Message {
//!         role: Role::User,
//!         content: "Explain Rust lifetimes in a sentence.".to_string(),
//!     }];
//!
//!     let mut chunks = client.stream_chat(&request, &ChatOptions::default()).await?;
//!     while let Some(chunk) = chunks.next().await {
//!         if let StreamChunk::Text { delta } = chunk? {
//!             print!("{}", delta);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::pin::Pin;

/// Represents the possible roles for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message (frequently a mirror of a human end-user request).
    User,
    /// An assistant authored message (model responses or engine-fed exemplars).
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Represents a generic message to be sent to an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The message body.
    pub content: String,
}

impl Message {
    /// Convenience constructor.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Per-request generation options forwarded to the backend.
#[derive(Debug, Clone, Copy)]
pub struct ChatOptions {
    /// Sampling temperature in `0.0..=1.0`.
    pub temperature: f32,
    /// Maximum number of output tokens the backend may generate.
    pub max_tokens: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

/// A chunk of a streaming response.
///
/// A well-formed stream consists of any number of [`StreamChunk::Text`]
/// elements followed by at most one [`StreamChunk::Done`], which is the last
/// element when present.  Providers that report no usage simply end the
/// stream after the final text delta; adapters in [`crate::clients`] insert a
/// zero-usage `Done` in that case so downstream consumers can rely on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// An incremental piece of the assistant's response.
    Text {
        /// The content delta carried by this chunk.
        delta: String,
    },
    /// Terminal chunk carrying the provider's token accounting.
    Done {
        /// Number of prompt/input tokens billed by the provider.
        input_tokens: usize,
        /// Number of generated/output tokens billed by the provider.
        output_tokens: usize,
    },
}

/// Type alias for a stream of chunks compatible with `Send` executors.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<StreamChunk, Box<dyn Error + Send + Sync>>> + Send>>;

/// Trait-driven abstraction over a concrete model backend.
///
/// A [`ClientWrapper`] instance is responsible for translating kernel requests
/// into the provider specific wire format and for returning provider responses
/// in a uniform shape.  The abstraction deliberately excludes any conversation
/// bookkeeping: prompt composition and history live in the
/// [`SwarmEngine`](crate::engine::SwarmEngine).
///
/// Implementations **must** be thread-safe (`Send + Sync`) so they can be
/// shared between async tasks.  Backend-specific quirks (system-message
/// separation, same-role coalescing, completion-style prompt joining, retry
/// of transient failures) are the adapter's responsibility; callers hand over
/// the canonical role-tagged sequence and nothing else.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Open a streaming chat completion.
    ///
    /// The `messages` slice must include any system priming messages the
    /// caller wishes to send.  Transient transport failures (connection
    /// resets, HTTP 503) are retried internally with exponential backoff;
    /// any other failure is surfaced verbatim.
    async fn stream_chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChunkStream, Box<dyn Error + Send + Sync>>;

    /// Return the identifier used to select the upstream model (e.g. `"gpt-4o"`).
    fn model_name(&self) -> &str;
}
