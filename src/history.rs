use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, MessageRole};

/// Leading text of a system message that carries compacted older history.
pub const SUMMARY_TAG: &str = "[历史摘要] ";
/// Leading text of a system message that records when a session was last active.
pub const DATE_MARKER_PREFIX: &str = "[会话时间] ";
/// Locale format embedded in date markers. Must round-trip through `NaiveDateTime` parsing.
pub const DATE_FORMAT: &str = "%Y年%m月%d日 %H:%M:%S";

/// Timestamp carried by a date marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerTime {
    At(NaiveDateTime),
    /// Text after the prefix that does not match `DATE_FORMAT` exactly.
    Unparsed(String),
}

impl MarkerTime {
    fn parse(text: &str) -> Self {
        match NaiveDateTime::parse_from_str(text, DATE_FORMAT) {
            Ok(at) if at.format(DATE_FORMAT).to_string() == text => MarkerTime::At(at),
            _ => MarkerTime::Unparsed(text.to_string()),
        }
    }

    fn render(&self) -> String {
        match self {
            MarkerTime::At(at) => at.format(DATE_FORMAT).to_string(),
            MarkerTime::Unparsed(text) => text.clone(),
        }
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            MarkerTime::At(at) => Some(*at),
            MarkerTime::Unparsed(_) => None,
        }
    }
}

/// One transcript element, classified once when it enters memory.
///
/// Serializes back to the plain `{role, content}` shape with the sentinel text re-attached, so
/// files written by older clients load unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ChatMessage", into = "ChatMessage")]
pub enum Entry {
    RolePrompt(String),
    SummaryMarker(String),
    DateMarker(MarkerTime),
    Dialogue(ChatMessage),
}

impl Entry {
    pub fn summary(text: impl Into<String>) -> Self {
        Entry::SummaryMarker(text.into())
    }

    pub fn date_marker(at: NaiveDateTime) -> Self {
        Entry::DateMarker(MarkerTime::At(at))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Entry::Dialogue(ChatMessage::user(content))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Entry::Dialogue(ChatMessage::assistant(content))
    }

    pub fn is_dialogue(&self) -> bool {
        matches!(self, Entry::Dialogue(_))
    }

    pub fn to_message(&self) -> ChatMessage {
        match self {
            Entry::RolePrompt(text) => ChatMessage::system(text.clone()),
            Entry::SummaryMarker(text) => ChatMessage::system(format!("{SUMMARY_TAG}{text}")),
            Entry::DateMarker(time) => {
                ChatMessage::system(format!("{DATE_MARKER_PREFIX}{}", time.render()))
            }
            Entry::Dialogue(message) => message.clone(),
        }
    }
}

impl From<ChatMessage> for Entry {
    fn from(message: ChatMessage) -> Self {
        match message.role {
            MessageRole::User | MessageRole::Assistant => Entry::Dialogue(message),
            MessageRole::System => {
                if let Some(text) = message.content.strip_prefix(SUMMARY_TAG) {
                    Entry::SummaryMarker(text.to_string())
                } else if let Some(text) = message.content.strip_prefix(DATE_MARKER_PREFIX) {
                    Entry::DateMarker(MarkerTime::parse(text))
                } else {
                    Entry::RolePrompt(message.content)
                }
            }
        }
    }
}

impl From<Entry> for ChatMessage {
    fn from(entry: Entry) -> Self {
        match entry {
            Entry::Dialogue(message) => message,
            other => other.to_message(),
        }
    }
}

/// Ordered conversation record. Insertion order is the only ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<Entry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn with_role_prompt(role_prompt: impl Into<String>) -> Self {
        Self {
            entries: vec![Entry::RolePrompt(role_prompt.into())],
        }
    }

    pub fn with_entries(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Entry::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Entry::assistant(content));
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut Entry> {
        self.entries.last_mut()
    }

    pub fn dialogue_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_dialogue()).count()
    }

    /// Request context: every entry in order, rendered back to `{role, content}`.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.entries.iter().map(Entry::to_message).collect()
    }
}

impl From<Vec<ChatMessage>> for Transcript {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self {
            entries: messages.into_iter().map(Entry::from).collect(),
        }
    }
}
