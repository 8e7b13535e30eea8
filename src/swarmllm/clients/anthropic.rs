//! Anthropic Messages API client.
//!
//! Speaks the native streaming Messages API.  Anthropic treats the system
//! prompt specially and forbids consecutive same-role messages, so the
//! adapter extracts [`Role::System`](crate::client_wrapper::Role) entries
//! into the top-level `system` field and coalesces adjacent same-role
//! messages before transmission.
//!
//! # Example
//!
//! ```rust,no_run
//! use swarmllm::clients::anthropic::AnthropicClient;
//!
//! let client = AnthropicClient::new("api-key", "claude-sonnet-4-0");
//! // stream_chat(...) via the ClientWrapper trait
//! ```

use crate::swarmllm::client_wrapper::{
    ChatOptions, ChunkStream, ClientWrapper, Message, Role, StreamChunk,
};
use crate::swarmllm::clients::common::{get_shared_http_client, post_with_retries, sse_stream};
use crate::swarmllm::config::RetryPolicy;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::error::Error;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Client wrapper for Anthropic's Messages API.
pub struct AnthropicClient {
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

impl AnthropicClient {
    /// Create a client from an API key and model identifier.
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Point the client at a custom Messages-compatible base URL.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Override the transient-retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Split the canonical sequence into the top-level system text and the
    /// coalesced user/assistant turn list.
    fn build_payload(&self, messages: &[Message], options: &ChatOptions) -> Value {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut turns: Vec<(Role, String)> = Vec::new();

        for message in messages {
            match message.role {
                Role::System => system_parts.push(&message.content),
                role => match turns.last_mut() {
                    Some((last_role, content)) if *last_role == role => {
                        content.push_str("\n\n");
                        content.push_str(&message.content);
                    }
                    _ => turns.push((role, message.content.clone())),
                },
            }
        }

        let turns: Vec<Value> = turns
            .into_iter()
            .map(|(role, content)| json!({ "role": role.to_string(), "content": content }))
            .collect();

        json!({
            "model": self.model,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "system": system_parts.join("\n\n"),
            "stream": true,
            "messages": turns,
        })
    }
}

#[async_trait]
impl ClientWrapper for AnthropicClient {
    async fn stream_chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChunkStream, Box<dyn Error + Send + Sync>> {
        let url = format!("{}/v1/messages", self.base_url);
        let payload = self.build_payload(messages, options);
        let api_key = self.api_key.clone();

        let response = post_with_retries(
            || {
                get_shared_http_client()
                    .post(&url)
                    .header("x-api-key", &api_key)
                    .header("anthropic-version", API_VERSION)
                    .json(&payload)
            },
            self.retry,
            "AnthropicClient::stream_chat",
        )
        .await?;

        // Usage arrives split across frames: input on message_start, output
        // on message_delta; message_stop closes the stream.
        let mut input_tokens = 0usize;
        let mut output_tokens = 0usize;
        Ok(sse_stream(
            response,
            Box::new(move |frame| {
                let event: Value = match serde_json::from_str(frame) {
                    Ok(event) => event,
                    Err(_) => return vec![],
                };
                match event.get("type").and_then(Value::as_str) {
                    Some("content_block_delta") => {
                        let delta = &event["delta"];
                        if delta.get("type").and_then(Value::as_str) == Some("text_delta") {
                            if let Some(text) = delta.get("text").and_then(Value::as_str) {
                                return vec![Ok(StreamChunk::Text {
                                    delta: text.to_string(),
                                })];
                            }
                        }
                        vec![]
                    }
                    Some("message_start") => {
                        if let Some(tokens) =
                            event["message"]["usage"]["input_tokens"].as_u64()
                        {
                            input_tokens = tokens as usize;
                        }
                        vec![]
                    }
                    Some("message_delta") => {
                        if let Some(tokens) = event["usage"]["output_tokens"].as_u64() {
                            output_tokens = tokens as usize;
                        }
                        vec![]
                    }
                    Some("message_stop") => vec![Ok(StreamChunk::Done {
                        input_tokens,
                        output_tokens,
                    })],
                    Some("error") => {
                        let message = event["error"]["message"]
                            .as_str()
                            .unwrap_or("unknown provider error");
                        vec![Err(message.to_string().into())]
                    }
                    _ => vec![],
                }
            }),
        ))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
