//! Shared plumbing for the provider adapters.
//!
//! Every adapter follows the same pattern: build a JSON request, POST it
//! through the shared pooled HTTP client (retrying transient failures),
//! then turn the response body into a [`ChunkStream`] by buffering bytes,
//! draining complete frames (SSE `data:` events or NDJSON lines), and
//! feeding each frame to a provider-specific parser closure.
//!
//! This module extracts that shared logic:
//!
//! - [`get_shared_http_client`] — pooled [`reqwest::Client`]
//! - [`post_with_retries`] — transient-failure retry with exponential backoff
//! - [`sse_stream`] / [`ndjson_stream`] — framed body → [`ChunkStream`]

use crate::swarmllm::client_wrapper::{ChunkStream, StreamChunk};
use crate::swarmllm::config::RetryPolicy;
use lazy_static::lazy_static;
use reqwest::StatusCode;
use std::error::Error;
use std::time::Duration;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    ///
    /// The single client instance keeps TLS sessions and DNS lookups warm,
    /// which significantly reduces latency when many concurrent streams are
    /// opened against upstream providers.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// Statuses treated as transient and therefore retried.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::TOO_MANY_REQUESTS
}

/// Send a request built by `build`, retrying transient failures.
///
/// Transient means a connect/reset-level transport error or an HTTP
/// 503/429 response.  Retries back off exponentially from the policy's
/// base delay, doubling each time, up to `max_retries` attempts beyond the
/// first.  Any other failure — including non-2xx statuses — is surfaced
/// verbatim with the response body in the error text.
pub async fn post_with_retries<F>(
    build: F,
    policy: RetryPolicy,
    label: &str,
) -> Result<reqwest::Response, Box<dyn Error + Send + Sync>>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt: u32 = 0;
    loop {
        let outcome = build().send().await;
        let retryable = match &outcome {
            Ok(response) => is_transient_status(response.status()),
            Err(e) => e.is_connect() || e.is_timeout() || e.is_request(),
        };

        if retryable && attempt < policy.max_retries {
            let delay = Duration::from_millis(policy.base_delay_ms << attempt);
            if log::log_enabled!(log::Level::Warn) {
                log::warn!(
                    "{}: transient failure (attempt {}), retrying in {:?}",
                    label,
                    attempt + 1,
                    delay
                );
            }
            attempt += 1;
            tokio::time::sleep(delay).await;
            continue;
        }

        let response = outcome.map_err(|e| {
            Box::new(e) as Box<dyn Error + Send + Sync>
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("{}: HTTP {}: {}", label, status, body).into());
        }
        return Ok(response);
    }
}

/// Extract complete `data:` payloads from an SSE buffer.
///
/// SSE events are delimited by a blank line.  Each event block may contain
/// `event:`, `data:`, `id:`, or `retry:` lines; only `data:` lines matter
/// here.  The buffer is drained in place — consumed bytes are removed and
/// any trailing partial event remains for the next call.
pub(crate) fn drain_sse_data(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos + 2).collect();
        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
    }
    payloads
}

/// Extract complete lines from an NDJSON buffer, draining in place.
pub(crate) fn drain_ndjson_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..pos + 1).collect();
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

type FrameParser =
    Box<dyn FnMut(&str) -> Vec<Result<StreamChunk, Box<dyn Error + Send + Sync>>> + Send>;

/// Build a [`ChunkStream`] from an SSE response and a frame parser.
///
/// The parser receives each `data:` payload and returns zero or more
/// chunks; it is `FnMut` because providers accumulate usage across frames.
/// When the body closes, any trailing partial frame is flushed, and a
/// zero-usage [`StreamChunk::Done`] is appended if the parser never
/// produced one — consumers can always rely on a terminal `Done`.
pub(crate) fn sse_stream(response: reqwest::Response, parser: FrameParser) -> ChunkStream {
    framed_stream(response, parser, drain_sse_data)
}

/// Build a [`ChunkStream`] from an NDJSON response and a frame parser.
pub(crate) fn ndjson_stream(response: reqwest::Response, parser: FrameParser) -> ChunkStream {
    framed_stream(response, parser, drain_ndjson_lines)
}

fn framed_stream(
    response: reqwest::Response,
    mut parser: FrameParser,
    drain: fn(&mut String) -> Vec<String>,
) -> ChunkStream {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for frame in drain(&mut buffer) {
                        for chunk in parser(&frame) {
                            if matches!(&chunk, Ok(StreamChunk::Done { .. })) {
                                done_emitted = true;
                            }
                            yield chunk;
                        }
                    }
                }
                Ok(None) => {
                    // Body closed — flush any partial trailing frame.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for frame in drain(&mut buffer) {
                            for chunk in parser(&frame) {
                                if matches!(&chunk, Ok(StreamChunk::Done { .. })) {
                                    done_emitted = true;
                                }
                                yield chunk;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Box::new(e) as Box<dyn Error + Send + Sync>);
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamChunk::Done { input_tokens: 0, output_tokens: 0 });
        }
    };
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_single_complete_event() {
        let mut buf = String::from("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(drain_sse_data(&mut buf), vec!["{\"a\":1}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_partial_event_stays_buffered() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        assert_eq!(drain_sse_data(&mut buf), vec!["complete"]);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn test_drain_ndjson() {
        let mut buf = String::from("{\"x\":1}\n{\"x\":2}\n{\"x\"");
        assert_eq!(drain_ndjson_lines(&mut buf), vec!["{\"x\":1}", "{\"x\":2}"]);
        assert_eq!(buf, "{\"x\"");
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
        assert!(!is_transient_status(StatusCode::OK));
    }
}
