use std::{future::Future, io::Write, sync::Arc};

use colored::Colorize;
use futures_util::StreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::{
    error::{SessionError, StoreError, SummarizeError},
    history::Transcript,
    persona::PERSONA_NAME,
    stamp::stamp,
    store::TranscriptStore,
    summarizer::Summarizer,
    types::{CompletionRequest, StreamEvent},
    LLMProvider,
};

pub const EXIT_COMMAND: &str = "exit";
pub const SUMMARIZE_COMMAND: &str = "/s";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Exit,
    Summarize,
    Say(String),
}

impl Command {
    /// Reserved tokens are matched on the trimmed line. Anything else is kept as typed, minus the
    /// line terminator.
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            Command::Empty
        } else if trimmed.eq_ignore_ascii_case(EXIT_COMMAND) {
            Command::Exit
        } else if trimmed == SUMMARIZE_COMMAND {
            Command::Summarize
        } else {
            Command::Say(line.trim_end_matches(['\r', '\n']).to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Continue,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Exit,
    Interrupted,
    EndOfInput,
}

/// Owns the in-memory transcript for the lifetime of the process.
pub struct Session {
    transcript: Transcript,
    store: TranscriptStore,
    provider: Arc<dyn LLMProvider>,
    summarizer: Summarizer,
    model: String,
    temperature: Option<f32>,
    persona_name: String,
}

impl Session {
    pub fn new(
        store: TranscriptStore,
        transcript: Transcript,
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        let summarizer = Summarizer::new(Arc::clone(&provider), model.clone());

        Self {
            transcript,
            store,
            provider,
            summarizer,
            model,
            temperature: None,
            persona_name: PERSONA_NAME.to_string(),
        }
    }

    /// Loads the persisted transcript and stamps the session boundary.
    pub fn start(
        store: TranscriptStore,
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
    ) -> Self {
        let mut transcript = store.load();
        stamp(&mut transcript);
        Self::new(store, transcript, provider, model)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = summarizer.with_persona_name(self.persona_name.clone());
        self
    }

    /// Name shown before streamed replies and used as the speaker label in summaries.
    pub fn with_persona_name(mut self, persona_name: impl Into<String>) -> Self {
        self.persona_name = persona_name.into();
        self.summarizer = self.summarizer.with_persona_name(self.persona_name.clone());
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn store(&self) -> &TranscriptStore {
        &self.store
    }

    pub fn persist(&self) -> Result<(), StoreError> {
        self.store.save(&self.transcript)
    }

    pub async fn handle_line<W: Write>(
        &mut self,
        line: &str,
        out: &mut W,
    ) -> Result<TurnOutcome, SessionError> {
        match Command::parse(line) {
            Command::Empty => Ok(TurnOutcome::Continue),
            Command::Exit => Ok(TurnOutcome::Exit),
            Command::Summarize => {
                self.summarize(out).await?;
                Ok(TurnOutcome::Continue)
            }
            Command::Say(text) => {
                self.converse(text, out).await?;
                Ok(TurnOutcome::Continue)
            }
        }
    }

    /// Appends the user turn, streams the reply to `out`, then appends the assistant turn.
    ///
    /// A failed stream leaves the user turn in place and adds no assistant turn.
    pub async fn converse<W: Write>(&mut self, text: String, out: &mut W) -> Result<(), SessionError> {
        self.transcript.push_user(text);

        let mut request = CompletionRequest::new(self.model.clone(), self.transcript.messages());
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }

        write!(out, "\n{}: ", self.persona_name.cyan().bold())?;
        out.flush()?;

        let mut stream = self.provider.stream_completion(request).await?;
        let mut reply = String::new();

        while let Some(event) = stream.next().await {
            match event {
                Ok(StreamEvent::MessageDelta(delta)) => {
                    write!(out, "{delta}")?;
                    out.flush()?;
                    reply.push_str(&delta);
                }
                Ok(StreamEvent::Completed(_)) => break,
                Err(error) => {
                    writeln!(out)?;
                    return Err(error.into());
                }
            }
        }
        writeln!(out)?;

        if reply.is_empty() {
            tracing::warn!("reply stream was empty, no assistant turn recorded");
        } else {
            self.transcript.push_assistant(reply);
        }
        Ok(())
    }

    /// Summarizes older dialogue, backs up the file, then persists and swaps in the rewrite.
    pub async fn summarize<W: Write>(&mut self, out: &mut W) -> Result<(), SessionError> {
        writeln!(out, "{}", "Summarizing conversation...".dimmed())?;

        let summary = match self.summarizer.summarize(&self.transcript).await {
            Ok(summary) => summary,
            Err(SummarizeError::EmptyDialogue) => {
                writeln!(out, "{}", "Nothing to summarize yet.".yellow())?;
                return Ok(());
            }
            Err(SummarizeError::InsufficientContent { dialogue }) => {
                writeln!(
                    out,
                    "{}",
                    format!("Not enough conversation to summarize ({dialogue} messages).").yellow()
                )?;
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };

        let backup = self.store.backup()?;
        let rewritten = summary.apply(self.store.role_prompt(), &self.transcript);
        self.store.save(&rewritten)?;

        let before = self.transcript.len();
        self.transcript = rewritten;

        tracing::info!(
            before,
            after = self.transcript.len(),
            backup = ?backup,
            "transcript summarized"
        );
        writeln!(
            out,
            "{}",
            format!(
                "Summary saved; kept the {} most recent messages.",
                summary.retained_tail.len()
            )
            .green()
        )?;
        Ok(())
    }

    /// Reads lines until `exit`, end of input or `shutdown` resolves. Persists on every path.
    pub async fn run<R, W, S>(
        &mut self,
        input: R,
        out: &mut W,
        shutdown: S,
    ) -> Result<SessionEnd, SessionError>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
        S: Future<Output = ()>,
    {
        let end = self.drive(input, out, shutdown).await;

        if matches!(end, Ok(SessionEnd::Interrupted)) {
            let _ = writeln!(out, "\n{}", "Interrupted, saving and exiting...".dimmed());
        }

        let saved = self.persist();
        let end = end?;
        saved?;
        Ok(end)
    }

    async fn drive<R, W, S>(
        &mut self,
        input: R,
        out: &mut W,
        shutdown: S,
    ) -> Result<SessionEnd, SessionError>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut lines = input.lines();

        loop {
            write!(out, "\n{}: ", "You".green().bold())?;
            out.flush()?;

            let line = tokio::select! {
                biased;
                _ = &mut shutdown => return Ok(SessionEnd::Interrupted),
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                return Ok(SessionEnd::EndOfInput);
            };

            let outcome = tokio::select! {
                biased;
                _ = &mut shutdown => return Ok(SessionEnd::Interrupted),
                outcome = self.handle_line(&line, out) => outcome,
            };

            match outcome {
                Ok(TurnOutcome::Continue) => {}
                Ok(TurnOutcome::Exit) => return Ok(SessionEnd::Exit),
                Err(error) => {
                    tracing::warn!(%error, "turn failed");
                    writeln!(out, "\n{} {error}", "error:".red().bold())?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{history::Entry, providers::scripted::ScriptedProvider};

    fn session_with(
        dir: &std::path::Path,
        transcript: Transcript,
        provider: ScriptedProvider,
    ) -> (Session, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let store = TranscriptStore::new(dir.join("chat_history.json"), "persona");
        let session = Session::new(store, transcript, provider.clone(), "model");
        (session, provider)
    }

    fn eight_turns() -> Transcript {
        let mut transcript = Transcript::with_role_prompt("persona");
        for index in 0..8 {
            if index % 2 == 0 {
                transcript.push_user(format!("u{index}"));
            } else {
                transcript.push_assistant(format!("a{index}"));
            }
        }
        transcript
    }

    #[test]
    fn parses_reserved_tokens() {
        assert_eq!(Command::parse("   "), Command::Empty);
        assert_eq!(Command::parse("EXIT"), Command::Exit);
        assert_eq!(Command::parse(" exit \n"), Command::Exit);
        assert_eq!(Command::parse(" /s "), Command::Summarize);
        assert_eq!(Command::parse("/S"), Command::Say("/S".into()));
        assert_eq!(Command::parse("exit now"), Command::Say("exit now".into()));
    }

    #[test]
    fn conversational_input_keeps_its_spacing() {
        assert_eq!(Command::parse("  indented  "), Command::Say("  indented  ".into()));
        assert_eq!(Command::parse(" hi\r\n"), Command::Say(" hi".into()));
    }

    #[tokio::test]
    async fn persona_name_labels_replies_and_summary_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (session, provider) = session_with(
            dir.path(),
            eight_turns(),
            ScriptedProvider::new().with_reply(["recap"]).with_reply(["hi"]),
        );
        let mut session = session.with_persona_name("Himmel");
        let mut out = Vec::new();

        session.handle_line("/s", &mut out).await.unwrap();
        session.handle_line("hello", &mut out).await.unwrap();

        let requests = provider.requests();
        assert!(requests[0].messages[1].content.contains("Himmel: a1"));
        assert!(!requests[0].messages[1].content.contains(PERSONA_NAME));
        assert!(String::from_utf8(out).unwrap().contains("Himmel"));
    }

    #[tokio::test]
    async fn conversation_turn_appends_user_and_assistant() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, provider) = session_with(
            dir.path(),
            Transcript::with_role_prompt("persona"),
            ScriptedProvider::new().with_reply(["Hi", " there"]),
        );
        let mut out = Vec::new();

        let outcome = session.handle_line("hello", &mut out).await.unwrap();

        assert_eq!(outcome, TurnOutcome::Continue);
        assert_eq!(
            session.transcript().entries(),
            &[
                Entry::RolePrompt("persona".into()),
                Entry::user("hello"),
                Entry::assistant("Hi there"),
            ]
        );
        assert!(String::from_utf8(out).unwrap().contains("Hi there"));

        let sent = &provider.requests()[0].messages;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].content, "hello");
    }

    #[tokio::test]
    async fn empty_stream_adds_no_assistant_turn() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = session_with(
            dir.path(),
            Transcript::with_role_prompt("persona"),
            ScriptedProvider::new().with_reply(Vec::<String>::new()),
        );

        session.handle_line("hello", &mut std::io::sink()).await.unwrap();
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript().last(), Some(&Entry::user("hello")));
    }

    #[tokio::test]
    async fn stream_failure_keeps_user_turn_only() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = session_with(
            dir.path(),
            Transcript::with_role_prompt("persona"),
            ScriptedProvider::new().with_mid_stream_failure(["Hi"], "connection reset"),
        );

        let error = session.handle_line("hello", &mut std::io::sink()).await.unwrap_err();
        assert!(matches!(error, SessionError::Provider(_)));
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript().last(), Some(&Entry::user("hello")));
    }

    #[tokio::test]
    async fn summarize_rewrites_backs_up_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = session_with(
            dir.path(),
            eight_turns(),
            ScriptedProvider::new().with_reply(["earlier ", "talk"]),
        );
        session.persist().unwrap();
        let before = fs::read(session.store().path()).unwrap();

        session.handle_line("/s", &mut std::io::sink()).await.unwrap();

        assert_eq!(
            session.transcript().entries(),
            &[
                Entry::RolePrompt("persona".into()),
                Entry::summary("earlier talk"),
                Entry::user("u6"),
                Entry::assistant("a7"),
            ]
        );
        assert_eq!(session.store().load(), *session.transcript());

        let backups: Vec<_> = fs::read_dir(session.store().backup_dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(fs::read(&backups[0]).unwrap(), before);
    }

    #[tokio::test]
    async fn summarize_without_dialogue_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, provider) = session_with(
            dir.path(),
            Transcript::with_role_prompt("persona"),
            ScriptedProvider::new(),
        );

        session.handle_line("/s", &mut std::io::sink()).await.unwrap();

        assert_eq!(session.transcript(), &Transcript::with_role_prompt("persona"));
        assert!(!session.store().path().exists());
        assert!(!session.store().backup_dir().exists());
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn failed_summary_leaves_transcript_and_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) =
            session_with(dir.path(), eight_turns(), ScriptedProvider::new().with_failure("503"));

        let error = session.handle_line("/s", &mut std::io::sink()).await.unwrap_err();
        assert!(matches!(error, SessionError::Summarize(SummarizeError::Provider(_))));
        assert_eq!(session.transcript(), &eight_turns());
        assert!(!session.store().path().exists());
    }

    #[tokio::test]
    async fn run_reports_errors_and_persists_on_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = session_with(
            dir.path(),
            Transcript::with_role_prompt("persona"),
            ScriptedProvider::new().with_failure("boom").with_reply(["ok"]),
        );
        let mut out = Vec::new();
        let input: &[u8] = b"first\n\nsecond\nExit\nnever read\n";

        let end = session
            .run(input, &mut out, std::future::pending())
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::Exit);
        assert_eq!(
            session.store().load().entries(),
            &[
                Entry::RolePrompt("persona".into()),
                Entry::user("first"),
                Entry::user("second"),
                Entry::assistant("ok"),
            ]
        );
        assert!(String::from_utf8(out).unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn interrupt_still_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = session_with(dir.path(), eight_turns(), ScriptedProvider::new());
        let input: &[u8] = b"";

        let end = session
            .run(input, &mut std::io::sink(), std::future::ready(()))
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::Interrupted);
        assert_eq!(session.store().load(), eight_turns());
    }

    #[tokio::test]
    async fn end_of_input_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = session_with(
            dir.path(),
            Transcript::with_role_prompt("persona"),
            ScriptedProvider::new().with_reply(["hey"]),
        );
        let input: &[u8] = b"hi\n";

        let end = session
            .run(input, &mut std::io::sink(), std::future::pending())
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::EndOfInput);
        assert_eq!(session.store().load().len(), 3);
    }
}
