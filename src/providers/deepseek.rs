use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    error::LLMError,
    providers::LLMProvider,
    types::{
        ChatMessage, CompletionRequest, CompletionResponse, CompletionStream, MessageRole,
        StreamEvent,
    },
};

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

#[derive(Debug, Clone)]
pub struct DeepSeekConfig {
    pub api_key: String,
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Total request timeout. `None` lets a reply stream for as long as the server keeps it open.
    pub request_timeout: Option<Duration>,
}

impl DeepSeekConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct DeepSeek {
    client: Client,
    config: DeepSeekConfig,
}

impl DeepSeek {
    pub fn from_config(config: DeepSeekConfig) -> Result<Self, LLMError> {
        let mut builder = Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn with_default_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.config.api_key)
    }
}

#[derive(Debug, Serialize)]
struct DeepSeekRequestBody {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChatCompletionChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[async_trait]
impl LLMProvider for DeepSeek {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, LLMError> {
        let CompletionRequest {
            model,
            messages,
            temperature,
        } = request;

        let body = DeepSeekRequestBody {
            model,
            messages,
            temperature,
            stream: true,
        };

        let builder = self
            .with_default_headers(self.client.post(self.endpoint("chat/completions")))
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .json(&body);

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await?;
            if let Ok(error) = serde_json::from_str::<ErrorEnvelope>(&text) {
                return Err(LLMError::Provider(error.error.message));
            }

            return Err(LLMError::Provider(format!("unexpected status {status}: {text}")));
        }

        Ok(completion_stream(response.bytes_stream()))
    }

    fn name(&self) -> &'static str {
        "deepseek"
    }
}

enum SseEvent {
    Skip,
    Done,
    Chunk(ChatCompletionChunk),
}

fn decode_event(event: &[u8]) -> Result<SseEvent, LLMError> {
    let payload = extract_data_payload(event)?;
    let payload = payload.trim();

    if payload.is_empty() {
        return Ok(SseEvent::Skip);
    }
    if payload == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    match serde_json::from_str(payload) {
        Ok(chunk) => Ok(SseEvent::Chunk(chunk)),
        Err(error) => {
            tracing::debug!(%error, "skipping malformed stream chunk");
            Ok(SseEvent::Skip)
        }
    }
}

fn take_deltas(chunk: ChatCompletionChunk, finish_reason: &mut Option<String>) -> Vec<String> {
    let mut deltas = Vec::new();
    for choice in chunk.choices {
        if let Some(text) = choice.delta.and_then(|delta| delta.content) {
            if !text.is_empty() {
                deltas.push(text);
            }
        }
        if let Some(reason) = choice.finish_reason {
            *finish_reason = Some(reason);
        }
    }
    deltas
}

/// Turns a raw SSE body into stream events. A final event that the server closed without a
/// trailing blank line is still decoded.
fn completion_stream<S, B, E>(body: S) -> CompletionStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<LLMError> + Send + 'static,
{
    let stream = try_stream! {
        let mut buffer = Vec::new();
        let mut message = String::new();
        let mut finish_reason: Option<String> = None;
        let mut body = Box::pin(body);
        let mut finished = false;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|error| -> LLMError { error.into() })?;
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(event) = extract_sse_event(&mut buffer) {
                if event.is_empty() {
                    continue;
                }

                match decode_event(&event)? {
                    SseEvent::Skip => continue,
                    SseEvent::Done => {
                        finished = true;
                        break;
                    }
                    SseEvent::Chunk(chunk) => {
                        for text in take_deltas(chunk, &mut finish_reason) {
                            message.push_str(&text);
                            yield StreamEvent::MessageDelta(text);
                        }
                    }
                }
            }

            if finished {
                break;
            }
        }

        if !finished && !buffer.iter().all(u8::is_ascii_whitespace) {
            if let SseEvent::Chunk(chunk) = decode_event(&buffer)? {
                for text in take_deltas(chunk, &mut finish_reason) {
                    message.push_str(&text);
                    yield StreamEvent::MessageDelta(text);
                }
            }
        }

        yield StreamEvent::Completed(CompletionResponse {
            message: ChatMessage::new(MessageRole::Assistant, message),
            finish_reason,
        });
    };

    Box::pin(stream)
}

fn extract_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    if let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
        let event = buffer[..pos].to_vec();
        buffer.drain(..pos + 2);
        return Some(event);
    }

    if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
        let event = buffer[..pos].to_vec();
        buffer.drain(..pos + 4);
        return Some(event);
    }

    None
}

fn extract_data_payload(event: &[u8]) -> Result<String, LLMError> {
    let text = String::from_utf8(event.to_vec())
        .map_err(|_| LLMError::InvalidResponse("stream event contained invalid utf-8"))?;

    let mut payload = String::new();
    for line in text.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            if !payload.is_empty() {
                payload.push('\n');
            }
            payload.push_str(value.trim_start());
        }
    }

    Ok(payload)
}
