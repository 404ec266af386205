use crate::models::ChatMessage;
use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

// How long to wait for the TCP/TLS handshake. Streams themselves have no
// deadline; a generation may legitimately run for minutes.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Classified failure raised by a completion gateway. Display renders the
/// bare message; the variant carries the classification.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The service rejected the credential.
    #[error("{0}")]
    Authentication(String),
    /// The service answered, but with a refusal or a malformed payload.
    #[error("{0}")]
    Upstream(String),
    /// The service could not be reached, or the connection died mid-stream.
    #[error("{0}")]
    Transport(String),
    /// Anything that fits none of the above.
    #[error("{0}")]
    Unclassified(String),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Authentication(_) => "authentication",
            GatewayError::Upstream(_) => "upstream",
            GatewayError::Transport(_) => "transport",
            GatewayError::Unclassified(_) => "unclassified",
        }
    }
}

// Alias for the stream type gateways return
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

// Interface the chat session engine relays completions through
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    // Returns a stream of content fragments for one completion call.
    async fn complete(
        &self,
        api_key: &str,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<TokenStream, GatewayError>;
}

// --- OpenAI Compatible Gateway Implementation ---

#[derive(Serialize, Debug)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

// Response structure for STREAMING chunks. Only the fields we read; serde
// ignores the rest of the payload.
#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

pub struct OpenAICompatibleGateway {
    client: Client,
    base_url: String,
}

impl OpenAICompatibleGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CompletionGateway for OpenAICompatibleGateway {
    async fn complete(
        &self,
        api_key: &str,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<TokenStream, GatewayError> {
        let request_url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        log::info!("Opening completion stream at {} with model {}", request_url, model);

        let request_body = ChatCompletionRequest {
            model,
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(&request_url)
            .bearer_auth(api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            let message = extract_error_message(&error_body).unwrap_or_else(|| {
                format!("API request failed with status {status}: {error_body}")
            });
            log::error!("Completion request rejected with status {}: {}", status, message);
            return Err(classify_rejection(status, message));
        }

        // Process the SSE stream
        let delta_stream = response
            .bytes_stream()
            .eventsource()
            .map(|event_result| match event_result {
                Ok(event) => delta_from_event_data(event.data.trim()),
                Err(error) => Err(classify_stream_error(error)),
            })
            .filter_map(|result| async move {
                match result {
                    Ok(Some(content)) => Some(Ok(content)),
                    Ok(None) => None, // [DONE], pings, role-only chunks
                    Err(e) => {
                        log::error!("Error processing stream chunk: {}", e);
                        Some(Err(e))
                    }
                }
            });

        Ok(Box::pin(delta_stream))
    }
}

// HTTP rejections: credential problems are their own class, everything else
// the service said no to is an upstream failure.
fn classify_rejection(status: StatusCode, message: String) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Authentication(message),
        _ => GatewayError::Upstream(message),
    }
}

// Failures inside an open stream: a dead connection is transport, anything
// else (bad UTF-8, broken SSE framing) is the service misbehaving.
fn classify_stream_error<E: std::fmt::Display>(error: EventStreamError<E>) -> GatewayError {
    match error {
        EventStreamError::Transport(e) => GatewayError::Transport(e.to_string()),
        other => GatewayError::Upstream(other.to_string()),
    }
}

// Pulls the human-readable message out of an OpenAI-style error body:
// {"error": {"message": "...", ...}}
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(|s| s.to_string())
}

// Interprets one SSE data payload. Ok(Some(content)) is a fragment,
// Ok(None) is a payload with nothing to relay ([DONE], pings, chunks
// without a content delta).
fn delta_from_event_data(event_data: &str) -> Result<Option<String>, GatewayError> {
    if event_data == "[DONE]" {
        log::debug!("Stream finished with [DONE]");
        return Ok(None);
    }

    match serde_json::from_str::<StreamChunk>(event_data) {
        Ok(chunk) => {
            let delta_content = chunk
                .choices
                .first()
                .and_then(|choice| choice.delta.content.clone());
            Ok(delta_content)
        }
        Err(e) => {
            // Some servers interleave keep-alive events; skip those, treat
            // everything else unparseable as a malformed upstream payload.
            if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(event_data) {
                if json_value.get("type") == Some(&serde_json::Value::String("ping".to_string())) {
                    log::debug!("Received stream ping event, skipping");
                    return Ok(None);
                }
            }
            log::warn!("Failed to parse stream chunk: {} - Data: {}", e, event_data);
            Err(GatewayError::Upstream(format!(
                "malformed stream chunk: {e}"
            )))
        }
    }
}
