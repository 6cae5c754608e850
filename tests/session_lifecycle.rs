use std::{fs, sync::Arc};

use plauder::{
    providers::scripted::ScriptedProvider, ChatMessage, Entry, LLMProvider, Session, SessionEnd,
    Transcript, TranscriptStore,
};

fn store(dir: &std::path::Path) -> TranscriptStore {
    TranscriptStore::new(dir.join("chat_history.json"), "You are Frieren.")
}

#[tokio::test]
async fn fresh_start_stamps_once_and_restart_within_window_does_not_restamp() {
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn LLMProvider> = Arc::new(ScriptedProvider::new());

    let mut session = Session::start(store(dir.path()), provider.clone(), "model");
    let end = session
        .run(&b"exit\n"[..], &mut std::io::sink(), std::future::pending())
        .await
        .unwrap();
    assert_eq!(end, SessionEnd::Exit);

    let first = store(dir.path()).load();
    assert_eq!(first.len(), 2);
    assert_eq!(first.entries()[0], Entry::RolePrompt("You are Frieren.".into()));
    assert!(matches!(first.entries()[1], Entry::DateMarker(_)));

    let restarted = Session::start(store(dir.path()), provider, "model");
    assert_eq!(restarted.transcript(), &first);
}

#[tokio::test]
async fn second_summary_chains_the_first() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_reply(["first summary"])
            .with_reply(["second summary"]),
    );

    let mut transcript = Transcript::with_role_prompt("You are Frieren.");
    for index in 0..8 {
        transcript.push_user(format!("u{index}"));
    }
    let mut session = Session::new(store(dir.path()), transcript, provider.clone(), "model");

    session.handle_line("/s", &mut std::io::sink()).await.unwrap();
    assert!(session.store().backup_dir().read_dir().is_err(), "nothing on disk to back up yet");

    session.handle_line("/s", &mut std::io::sink()).await.unwrap();

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].messages[1].content.contains("first summary"));
    assert_eq!(
        session.transcript().entries(),
        &[
            Entry::RolePrompt("You are Frieren.".into()),
            Entry::summary("second summary"),
            Entry::user("u7"),
        ]
    );
    assert_eq!(fs::read_dir(session.store().backup_dir()).unwrap().count(), 1);
}

#[tokio::test]
async fn legacy_file_written_by_hand_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let legacy = vec![
        ChatMessage::system("old persona"),
        ChatMessage::user("hi"),
        ChatMessage::assistant("…hi."),
    ];
    fs::write(store.path(), serde_json::to_string(&legacy).unwrap()).unwrap();

    let loaded = store.load();
    assert_eq!(loaded, Transcript::from(legacy));
    assert_eq!(loaded.dialogue_count(), 2);
}
