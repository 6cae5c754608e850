use std::{collections::VecDeque, sync::Mutex};

use async_stream::try_stream;
use async_trait::async_trait;

use crate::{
    providers::LLMProvider,
    types::{
        ChatMessage, CompletionRequest, CompletionResponse, CompletionStream, MessageRole,
        StreamEvent,
    },
    LLMError,
};

#[derive(Debug, Clone)]
enum ScriptedTurn {
    Reply(Vec<String>),
    FailBeforeStream(String),
    FailMidStream { fragments: Vec<String>, message: String },
}

/// Plays back canned fragment sequences in order, one per streaming call.
///
/// Once the script runs out the provider either fails or, in echo mode, streams the last user
/// message back word by word. Every request is recorded for later inspection.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<CompletionRequest>>,
    echo_when_exhausted: bool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echo() -> Self {
        Self {
            echo_when_exhausted: true,
            ..Self::default()
        }
    }

    pub fn with_reply<I, S>(self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(ScriptedTurn::Reply(fragments.into_iter().map(Into::into).collect()))
    }

    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push(ScriptedTurn::FailBeforeStream(message.into()))
    }

    pub fn with_mid_stream_failure<I, S>(self, fragments: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(ScriptedTurn::FailMidStream {
            fragments: fragments.into_iter().map(Into::into).collect(),
            message: message.into(),
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn push(self, turn: ScriptedTurn) -> Self {
        if let Ok(mut turns) = self.turns.lock() {
            turns.push_back(turn);
        }
        self
    }

    fn next_turn(&self, request: &CompletionRequest) -> Result<ScriptedTurn, LLMError> {
        let scripted = self
            .turns
            .lock()
            .map_err(|_| LLMError::Provider("scripted provider lock poisoned".to_string()))?
            .pop_front();

        match scripted {
            Some(turn) => Ok(turn),
            None if self.echo_when_exhausted => Ok(ScriptedTurn::Reply(echo_fragments(request))),
            None => Err(LLMError::Provider("no more scripted responses".to_string())),
        }
    }
}

fn echo_fragments(request: &CompletionRequest) -> Vec<String> {
    let last_user = request
        .messages
        .iter()
        .rev()
        .find(|message| message.role == MessageRole::User)
        .map(|message| message.text())
        .unwrap_or_default();

    last_user
        .split_inclusive(' ')
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, LLMError> {
        let turn = self.next_turn(&request)?;
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let (fragments, failure) = match turn {
            ScriptedTurn::Reply(fragments) => (fragments, None),
            ScriptedTurn::FailBeforeStream(message) => return Err(LLMError::Provider(message)),
            ScriptedTurn::FailMidStream { fragments, message } => (fragments, Some(message)),
        };

        let stream = try_stream! {
            let mut message = String::new();
            for fragment in fragments {
                message.push_str(&fragment);
                yield StreamEvent::MessageDelta(fragment);
            }

            if let Some(failure) = failure {
                Err::<(), LLMError>(LLMError::Provider(failure))?;
            }

            yield StreamEvent::Completed(CompletionResponse {
                message: ChatMessage::assistant(message),
                finish_reason: Some("stop".to_string()),
            });
        };

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
