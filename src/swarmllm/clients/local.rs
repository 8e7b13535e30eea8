//! Local chat backend client.
//!
//! Talks to a locally hosted chat server (Ollama-style `/api/chat`) that
//! streams newline-delimited JSON.  No credential is required; the
//! endpoint defaults to `http://localhost:11434` and can be overridden per
//! agent.  Local backends tend to reject consecutive same-role messages,
//! so adjacent entries are coalesced before transmission.

use crate::swarmllm::client_wrapper::{
    ChatOptions, ChunkStream, ClientWrapper, Message, StreamChunk,
};
use crate::swarmllm::clients::common::{get_shared_http_client, ndjson_stream, post_with_retries};
use crate::swarmllm::config::RetryPolicy;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::error::Error;

const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Client wrapper for a local NDJSON chat server.
pub struct LocalChatClient {
    model: String,
    endpoint: String,
    retry: RetryPolicy,
}

impl LocalChatClient {
    /// Create a client for the default local endpoint.
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Point the client at a custom endpoint.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// Override the transient-retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Coalesce consecutive same-role messages into single turns.
    fn coalesce(messages: &[Message]) -> Vec<Value> {
        let mut turns: Vec<(String, String)> = Vec::new();
        for message in messages {
            let role = message.role.to_string();
            match turns.last_mut() {
                Some((last_role, content)) if *last_role == role => {
                    content.push_str("\n\n");
                    content.push_str(&message.content);
                }
                _ => turns.push((role, message.content.clone())),
            }
        }
        turns
            .into_iter()
            .map(|(role, content)| json!({ "role": role, "content": content }))
            .collect()
    }
}

#[async_trait]
impl ClientWrapper for LocalChatClient {
    async fn stream_chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChunkStream, Box<dyn Error + Send + Sync>> {
        let url = format!("{}/api/chat", self.endpoint);
        let payload = json!({
            "model": self.model,
            "messages": Self::coalesce(messages),
            "stream": true,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            },
        });

        let response = post_with_retries(
            || get_shared_http_client().post(&url).json(&payload),
            self.retry,
            "LocalChatClient::stream_chat",
        )
        .await?;

        Ok(ndjson_stream(
            response,
            Box::new(move |line| {
                let event: Value = match serde_json::from_str(line) {
                    Ok(event) => event,
                    Err(_) => return vec![],
                };
                if let Some(message) = event["error"].as_str() {
                    return vec![Err(message.to_string().into())];
                }
                let mut chunks = Vec::new();
                if let Some(text) = event["message"]["content"].as_str() {
                    if !text.is_empty() {
                        chunks.push(Ok(StreamChunk::Text {
                            delta: text.to_string(),
                        }));
                    }
                }
                if event["done"].as_bool() == Some(true) {
                    chunks.push(Ok(StreamChunk::Done {
                        input_tokens: event["prompt_eval_count"].as_u64().unwrap_or(0) as usize,
                        output_tokens: event["eval_count"].as_u64().unwrap_or(0) as usize,
                    }));
                }
                chunks
            }),
        ))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
