pub mod config;
pub mod error;
pub mod history;
pub mod persona;
pub mod providers;
pub mod session;
pub mod stamp;
pub mod store;
pub mod summarizer;
pub mod types;

pub use config::{Config, ConfigOverrides};
pub use error::{ConfigError, LLMError, SessionError, StoreError, SummarizeError};
pub use history::{Entry, MarkerTime, Transcript};
pub use providers::LLMProvider;
pub use session::{Command, Session, SessionEnd, TurnOutcome};
pub use stamp::{stamp, stamp_at, StampOutcome};
pub use store::TranscriptStore;
pub use summarizer::{partition, Partition, Summarizer, Summary};
pub use types::{
    ChatMessage, CompletionRequest, CompletionResponse, CompletionStream, MessageRole, StreamEvent,
};
