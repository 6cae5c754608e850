use std::sync::Arc;

use futures_util::StreamExt;
use handlebars::Handlebars;
use serde_json::json;

use crate::{
    error::SummarizeError,
    history::{Entry, Transcript},
    persona::{PERSONA_NAME, SUMMARY_INSTRUCTION, SUMMARY_REQUEST_TEMPLATE, USER_LABEL},
    types::{ChatMessage, CompletionRequest, MessageRole, StreamEvent},
    LLMError, LLMProvider,
};

/// Share of dialogue, in quarters, that gets compacted. The rest is kept verbatim.
const COMPACT_QUARTERS: usize = 3;

/// Read-only split of a transcript into the part to compact and the part to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub previous_summary: Option<String>,
    /// Older dialogue rendered as `Speaker: content`, with date markers as plain lines.
    pub older_lines: Vec<String>,
    /// Transcript positions kept unchanged: the recent dialogue plus any date markers at or
    /// after the first retained dialogue entry.
    pub retained_tail: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub text: String,
    pub retained_tail: Vec<usize>,
}

impl Summary {
    /// Builds the replacement transcript: a fresh role prompt, the new summary, then the
    /// retained entries taken from `previous`.
    pub fn apply(&self, role_prompt: &str, previous: &Transcript) -> Transcript {
        let mut rewritten = Transcript::with_role_prompt(role_prompt);
        rewritten.push(Entry::summary(self.text.clone()));
        for &position in &self.retained_tail {
            if let Some(entry) = previous.get(position) {
                rewritten.push(entry.clone());
            }
        }
        rewritten
    }
}

pub fn partition(transcript: &Transcript, persona_name: &str) -> Result<Partition, SummarizeError> {
    let mut previous_summary = None;
    // (position, rendered line, is dialogue)
    let mut stream: Vec<(usize, String, bool)> = Vec::new();

    for (position, entry) in transcript.iter().enumerate() {
        match entry {
            Entry::Dialogue(message) => {
                let speaker = match message.role {
                    MessageRole::Assistant => persona_name,
                    _ => USER_LABEL,
                };
                stream.push((position, format!("{speaker}: {}", message.content), true));
            }
            Entry::SummaryMarker(text) => previous_summary = Some(text.clone()),
            Entry::DateMarker(_) => stream.push((position, entry.to_message().content, false)),
            Entry::RolePrompt(_) => {}
        }
    }

    let dialogue: Vec<usize> = stream
        .iter()
        .enumerate()
        .filter(|(_, (_, _, is_dialogue))| *is_dialogue)
        .map(|(index, _)| index)
        .collect();

    if dialogue.is_empty() {
        return Err(SummarizeError::EmptyDialogue);
    }

    let split_point = dialogue.len() * COMPACT_QUARTERS / 4;
    if split_point == 0 {
        return Err(SummarizeError::InsufficientContent {
            dialogue: dialogue.len(),
        });
    }

    // The split counts dialogue only, but cuts the stream in one place: everything before the
    // first retained dialogue entry is compacted, everything from it on is kept.
    let boundary = dialogue.get(split_point).copied().unwrap_or(stream.len());
    let (older, retained) = stream.split_at(boundary);
    let older_lines = older.iter().map(|(_, line, _)| line.clone()).collect();
    let retained_tail = retained.iter().map(|(position, _, _)| *position).collect();

    Ok(Partition {
        previous_summary,
        older_lines,
        retained_tail,
    })
}

pub struct Summarizer {
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: Option<f32>,
    persona_name: String,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: None,
            persona_name: PERSONA_NAME.to_string(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_persona_name(mut self, persona_name: impl Into<String>) -> Self {
        self.persona_name = persona_name.into();
        self
    }

    pub fn build_request(&self, partition: &Partition) -> Result<CompletionRequest, SummarizeError> {
        let mut hb = Handlebars::new();
        hb.register_escape_fn(handlebars::no_escape);
        let body = hb.render_template(
            SUMMARY_REQUEST_TEMPLATE,
            &json!({
                "previous_summary": partition.previous_summary,
                "dialogue": partition.older_lines.join("\n"),
            }),
        )?;

        let mut request = CompletionRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(SUMMARY_INSTRUCTION),
                ChatMessage::user(body),
            ],
        );
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        Ok(request)
    }

    /// Requests a summary of the older three quarters of the dialogue. Never mutates the input.
    pub async fn summarize(&self, transcript: &Transcript) -> Result<Summary, SummarizeError> {
        let partition = partition(transcript, &self.persona_name)?;
        tracing::info!(
            compacted_lines = partition.older_lines.len(),
            retained = partition.retained_tail.len(),
            chained = partition.previous_summary.is_some(),
            "summarizing transcript"
        );

        let request = self.build_request(&partition)?;
        let mut stream = self.provider.stream_completion(request).await?;
        let mut text = String::new();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::MessageDelta(delta) => text.push_str(&delta),
                StreamEvent::Completed(_) => break,
            }
        }

        if text.trim().is_empty() {
            return Err(LLMError::InvalidResponse("summary was empty").into());
        }

        Ok(Summary {
            text,
            retained_tail: partition.retained_tail,
        })
    }
}
