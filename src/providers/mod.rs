use async_trait::async_trait;
use futures_util::StreamExt;

use crate::types::{
    ChatMessage, CompletionRequest, CompletionResponse, CompletionStream, StreamEvent,
};
use crate::LLMError;

pub mod deepseek;
pub mod scripted;

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn stream_completion(&self, request: CompletionRequest)
        -> Result<CompletionStream, LLMError>;

    /// Drains `stream_completion` into a single response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let mut stream = self.stream_completion(request).await?;
        let mut content = String::new();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::MessageDelta(delta) => content.push_str(&delta),
                StreamEvent::Completed(response) => return Ok(response),
            }
        }

        Ok(CompletionResponse {
            message: ChatMessage::assistant(content),
            finish_reason: None,
        })
    }

    fn name(&self) -> &'static str;
}
