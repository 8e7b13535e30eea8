//! Provider adapters and their construction from agent records.

pub mod anthropic;
pub mod common;
pub mod local;
pub mod openai;

use crate::swarmllm::agent::{Agent, ProviderKind};
use crate::swarmllm::client_wrapper::ClientWrapper;
use crate::swarmllm::config::RetryPolicy;
use crate::swarmllm::engine::SwarmError;
use self::anthropic::AnthropicClient;
use self::local::LocalChatClient;
use self::openai::{OpenAiChatClient, OpenAiCompletionClient};
use std::sync::Arc;

/// Build the streaming client an agent record selects.
///
/// Hosted providers require a credential; the compatible selector requires
/// an endpoint.  Missing required fields surface as
/// [`SwarmError::BadRequest`].
pub fn client_for_agent(agent: &Agent, retry: RetryPolicy) -> Result<Arc<dyn ClientWrapper>, SwarmError> {
    let credential = || {
        agent.credential.as_deref().ok_or_else(|| {
            SwarmError::BadRequest(format!(
                "agent {} has no credential for provider {:?}",
                agent.id, agent.provider
            ))
        })
    };

    match agent.provider {
        ProviderKind::LocalChat => {
            let mut client = LocalChatClient::new(&agent.model).with_retry(retry);
            if let Some(endpoint) = &agent.endpoint {
                client = client.with_endpoint(endpoint);
            }
            Ok(Arc::new(client))
        }
        ProviderKind::Anthropic => {
            let mut client = AnthropicClient::new(credential()?, &agent.model).with_retry(retry);
            if let Some(endpoint) = &agent.endpoint {
                client = client.with_base_url(endpoint);
            }
            Ok(Arc::new(client))
        }
        ProviderKind::OpenAiChat => {
            let client = match &agent.endpoint {
                Some(endpoint) => {
                    OpenAiChatClient::new_compatible(credential()?, &agent.model, endpoint)
                }
                None => OpenAiChatClient::new(credential()?, &agent.model),
            };
            Ok(Arc::new(client.with_retry(retry)))
        }
        ProviderKind::OpenAiCompletion => {
            let mut client =
                OpenAiCompletionClient::new(credential()?, &agent.model).with_retry(retry);
            if let Some(endpoint) = &agent.endpoint {
                client = client.with_base_url(endpoint);
            }
            Ok(Arc::new(client))
        }
        ProviderKind::OpenAiCompatible => {
            let endpoint = agent.endpoint.as_deref().ok_or_else(|| {
                SwarmError::BadRequest(format!(
                    "agent {} selects an OpenAI-compatible provider but has no endpoint",
                    agent.id
                ))
            })?;
            // Compatible servers often run without auth; send what we have.
            let key = agent.credential.as_deref().unwrap_or("");
            Ok(Arc::new(
                OpenAiChatClient::new_compatible(key, &agent.model, endpoint).with_retry(retry),
            ))
        }
    }
}
