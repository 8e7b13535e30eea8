//! OpenAI-style clients: Chat Completions, legacy Completions, and any
//! OpenAI-compatible endpoint at a custom base URL.
//!
//! [`OpenAiChatClient`] streams `/v1/chat/completions`; pointing it at a
//! different base URL with [`OpenAiChatClient::new_compatible`] covers the
//! growing family of compatible servers (vLLM, llama.cpp, LM Studio, …).
//! [`OpenAiCompletionClient`] covers pure-completion backends by joining
//! the role-tagged sequence into a single prompt with `System:` /
//! `Human:` / `Assistant:` prefixes and a trailing `Assistant:`.

use crate::swarmllm::client_wrapper::{
    ChatOptions, ChunkStream, ClientWrapper, Message, Role, StreamChunk,
};
use crate::swarmllm::clients::common::{get_shared_http_client, post_with_retries, sse_stream};
use crate::swarmllm::config::RetryPolicy;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::error::Error;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Pull `{"usage": {...}}` token counts out of a streamed frame, if present.
fn usage_from(event: &Value) -> Option<(usize, usize)> {
    let usage = event.get("usage")?;
    let input = usage.get("prompt_tokens")?.as_u64()? as usize;
    let output = usage.get("completion_tokens")?.as_u64()? as usize;
    Some((input, output))
}

/// Client wrapper for the Chat Completions API.
pub struct OpenAiChatClient {
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenAiChatClient {
    /// Create a client against the official OpenAI endpoint.
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_compatible(api_key, model, DEFAULT_BASE_URL)
    }

    /// Create a client against any OpenAI-compatible base URL.
    pub fn new_compatible(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the transient-retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl ClientWrapper for OpenAiChatClient {
    async fn stream_chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChunkStream, Box<dyn Error + Send + Sync>> {
        let url = format!("{}/chat/completions", self.base_url);
        let formatted: Vec<Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role.to_string(), "content": m.content }))
            .collect();
        let payload = json!({
            "model": self.model,
            "messages": formatted,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        let api_key = self.api_key.clone();

        let response = post_with_retries(
            || {
                get_shared_http_client()
                    .post(&url)
                    .bearer_auth(&api_key)
                    .json(&payload)
            },
            self.retry,
            "OpenAiChatClient::stream_chat",
        )
        .await?;

        let mut usage = (0usize, 0usize);
        Ok(sse_stream(
            response,
            Box::new(move |frame| {
                if frame == "[DONE]" {
                    let (input_tokens, output_tokens) = usage;
                    return vec![Ok(StreamChunk::Done {
                        input_tokens,
                        output_tokens,
                    })];
                }
                let event: Value = match serde_json::from_str(frame) {
                    Ok(event) => event,
                    Err(_) => return vec![],
                };
                if let Some(totals) = usage_from(&event) {
                    usage = totals;
                }
                match event["choices"][0]["delta"]["content"].as_str() {
                    Some(text) if !text.is_empty() => vec![Ok(StreamChunk::Text {
                        delta: text.to_string(),
                    })],
                    _ => vec![],
                }
            }),
        ))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Client wrapper for the legacy Completions API.
pub struct OpenAiCompletionClient {
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenAiCompletionClient {
    /// Create a client against the official OpenAI endpoint.
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Point the client at a custom completions-compatible base URL.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Override the transient-retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Join a role-tagged sequence into a single completion prompt.
    fn join_prompt(messages: &[Message]) -> String {
        let mut prompt = String::new();
        for message in messages {
            let prefix = match message.role {
                Role::System => "System",
                Role::User => "Human",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(prefix);
            prompt.push_str(": ");
            prompt.push_str(&message.content);
            prompt.push_str("\n\n");
        }
        prompt.push_str("Assistant:");
        prompt
    }
}

#[async_trait]
impl ClientWrapper for OpenAiCompletionClient {
    async fn stream_chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChunkStream, Box<dyn Error + Send + Sync>> {
        let url = format!("{}/completions", self.base_url);
        let payload = json!({
            "model": self.model,
            "prompt": Self::join_prompt(messages),
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "stream": true,
        });
        let api_key = self.api_key.clone();

        let response = post_with_retries(
            || {
                get_shared_http_client()
                    .post(&url)
                    .bearer_auth(&api_key)
                    .json(&payload)
            },
            self.retry,
            "OpenAiCompletionClient::stream_chat",
        )
        .await?;

        let mut usage = (0usize, 0usize);
        Ok(sse_stream(
            response,
            Box::new(move |frame| {
                if frame == "[DONE]" {
                    let (input_tokens, output_tokens) = usage;
                    return vec![Ok(StreamChunk::Done {
                        input_tokens,
                        output_tokens,
                    })];
                }
                let event: Value = match serde_json::from_str(frame) {
                    Ok(event) => event,
                    Err(_) => return vec![],
                };
                if let Some(totals) = usage_from(&event) {
                    usage = totals;
                }
                match event["choices"][0]["text"].as_str() {
                    Some(text) if !text.is_empty() => vec![Ok(StreamChunk::Text {
                        delta: text.to_string(),
                    })],
                    _ => vec![],
                }
            }),
        ))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
