use std::time::Duration;

use chat_turn_tracker::config::EngineConfig;
use chat_turn_tracker::dom::fixture::{FixturePage, MessageSpec, PageSpec};
use chat_turn_tracker::dom::{Document, DomNode};
use chat_turn_tracker::identity::{SessionToken, message_identity};
use chat_turn_tracker::notify::RecordingNotifier;
use chat_turn_tracker::protocol::Notification;
use chat_turn_tracker::session::{CaptureOutcome, TrackerSession};
use chat_turn_tracker::store::{MemoryStore, Role};
use serde_json::json;

type Session = TrackerSession<FixturePage, MemoryStore, RecordingNotifier>;

fn attach(page: &FixturePage) -> (Session, MemoryStore, RecordingNotifier) {
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::new();
    let session = TrackerSession::attach_with_token(
        page.clone(),
        store.clone(),
        notifier.clone(),
        EngineConfig::default(),
        SessionToken::new("tab_1_test"),
    )
    .expect("supported host");
    (session, store, notifier)
}

fn chatgpt_page(turns: &[(&str, &str)]) -> FixturePage {
    let mut spec = PageSpec::new("https://chatgpt.com/c/abc-123").title("Rust questions");
    for (i, (role, text)) in turns.iter().enumerate() {
        spec = spec.message(MessageSpec::chatgpt(role, text, i as f64 * 200.0));
    }
    FixturePage::new(spec)
}

async fn stored_contents(session: &Session) -> Vec<String> {
    session
        .stored_conversation()
        .await
        .map(|c| c.messages.into_iter().map(|m| m.content).collect())
        .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn four_alternating_turns_store_two_user_records_in_document_order() {
    // Query order differs from document order.
    let page = FixturePage::new(
        PageSpec::new("https://claude.ai/chat/0f3c-11aa")
            .message(MessageSpec::claude_assistant("Second answer text", 600.0).at_position(3))
            .message(MessageSpec::claude_user("Second question here", 400.0).at_position(2))
            .message(MessageSpec::claude_assistant("First answer text", 200.0).at_position(1))
            .message(MessageSpec::claude_user("First question here", 0.0).at_position(0)),
    );
    let (mut session, _store, _notifier) = attach(&page);

    assert_eq!(session.capture().await, CaptureOutcome::Appended(2));

    let conversation = session.stored_conversation().await.unwrap();
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[0].content, "First question here");
    assert_eq!(conversation.messages[0].dom_order_index, 0);
    assert_eq!(conversation.messages[1].content, "Second question here");
    assert_eq!(conversation.messages[1].dom_order_index, 2);
    assert!(conversation.messages.iter().all(|m| m.role == Role::User));
    assert_eq!(conversation.title, "claude.ai Chat");
    assert_eq!(conversation.session_token.as_str(), "tab_1_test");
}

#[tokio::test(start_paused = true)]
async fn content_length_filter_excludes_short_and_huge_text() {
    let huge = "y".repeat(10_001);
    let page = chatgpt_page(&[
        ("user", "abcd"),
        ("assistant", "Answer to the short one"),
        ("user", huge.as_str()),
        ("assistant", "Answer to the huge one"),
    ]);
    let (mut session, _store, _notifier) = attach(&page);

    assert_eq!(session.capture().await, CaptureOutcome::Appended(0));
    assert!(session.stored_conversation().await.is_none());
    assert!(session.engine().context().pending().is_empty());
    assert!(page.message(0).tracked_id().is_none());
    assert!(page.message(2).tracked_id().is_none());
    assert!(page.message(1).tracked_id().is_some());
}

#[tokio::test(start_paused = true)]
async fn unanswered_turn_is_held_back_until_answered() {
    let page = chatgpt_page(&[("user", "What does Pin guarantee?")]);
    let (mut session, _store, _notifier) = attach(&page);

    session.capture().await;
    assert!(session.stored_conversation().await.is_none());
    assert_eq!(session.engine().context().pending().len(), 1);

    // Expire the candidate: a pass after the timeout drops it.
    tokio::time::advance(Duration::from_secs(3)).await;
    session.capture().await;
    tokio::time::advance(Duration::from_millis(2_500)).await;
    session.capture().await;
    assert!(session.engine().context().pending().is_empty());
    assert!(session.stored_conversation().await.is_none());

    // The text resurfaces as a fresh candidate, and is stored once answered.
    session.capture().await;
    assert_eq!(session.engine().context().pending().len(), 1);
    page.push_message(MessageSpec::chatgpt("assistant", "It forbids moving the value.", 200.0));
    assert_eq!(session.capture().await, CaptureOutcome::Appended(1));
    assert_eq!(stored_contents(&session).await, vec!["What does Pin guarantee?"]);
    assert!(session.engine().context().pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disappearance_triggers_full_rebuild() {
    let page = chatgpt_page(&[
        ("user", "Original first question"),
        ("assistant", "Original first answer"),
        ("user", "Original second question"),
        ("assistant", "Original second answer"),
    ]);
    let (mut session, _store, notifier) = attach(&page);
    assert_eq!(session.capture().await, CaptureOutcome::Appended(2));

    // Edit the second question: the old branch leaves the DOM, a new one arrives.
    page.remove_message(2);
    page.remove_message(3);
    page.push_message(MessageSpec::chatgpt("user", "Edited second question", 400.0));
    page.push_message(MessageSpec::chatgpt("assistant", "Answer on the new branch", 600.0));
    notifier.clear();

    assert_eq!(session.capture().await, CaptureOutcome::Rebuilt(2));
    assert_eq!(
        stored_contents(&session).await,
        vec!["Original first question", "Edited second question"]
    );
    assert!(notifier.sent().contains(&Notification::ConversationRebuilt {
        storage_key: session.scope_key().clone(),
        tab_id: SessionToken::new("tab_1_test"),
    }));

    // The next pass over an unchanged page is incremental again.
    assert_eq!(session.capture().await, CaptureOutcome::Appended(0));
}

#[tokio::test(start_paused = true)]
async fn swapped_turns_trigger_rebuild() {
    let page = chatgpt_page(&[
        ("user", "Question number one"),
        ("assistant", "Answer number one"),
        ("user", "Question number two"),
        ("assistant", "Answer number two"),
    ]);
    let (mut session, _store, _notifier) = attach(&page);
    session.capture().await;

    page.reposition_message(0, 10);
    page.reposition_message(1, 11);
    assert_eq!(session.capture().await, CaptureOutcome::Rebuilt(2));
    assert_eq!(
        stored_contents(&session).await,
        vec!["Question number two", "Question number one"]
    );
}

#[tokio::test(start_paused = true)]
async fn growing_conversation_keeps_dom_order_non_decreasing() {
    let page = chatgpt_page(&[]);
    let (mut session, _store, _notifier) = attach(&page);

    for turn in 0..5 {
        let top = turn as f64 * 400.0;
        page.push_message(MessageSpec::chatgpt("user", &format!("question {turn} please"), top));
        session.capture().await;
        page.push_message(MessageSpec::chatgpt("assistant", &format!("answer {turn} here"), top + 200.0));
        assert_eq!(session.capture().await, CaptureOutcome::Appended(1));
    }

    let conversation = session.stored_conversation().await.unwrap();
    let indices: Vec<usize> = conversation.messages.iter().map(|m| m.dom_order_index).collect();
    assert_eq!(indices, vec![0, 2, 4, 6, 8]);
}

#[tokio::test(start_paused = true)]
async fn identical_text_collides_into_one_record() {
    let page = chatgpt_page(&[
        ("user", "continue please"),
        ("assistant", "Here is more of the story."),
        ("user", "continue please"),
        ("assistant", "And the story goes on."),
    ]);
    let (mut session, _store, _notifier) = attach(&page);
    session.capture().await;

    let conversation = session.stored_conversation().await.unwrap();
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(
        conversation.messages[0].id,
        message_identity("continue please", session.scope_key())
    );
    assert_eq!(conversation.messages[0].dom_order_index, 0);
}

#[tokio::test(start_paused = true)]
async fn navigation_starts_a_fresh_scope() {
    let page = chatgpt_page(&[("user", "First chat question"), ("assistant", "First chat answer")]);
    let (mut session, _store, _notifier) = attach(&page);
    session.capture().await;
    let first_scope = session.scope_key().clone();

    page.set_url("https://chatgpt.com/c/def-456");
    session.capture().await;
    assert_ne!(session.scope_key(), &first_scope);
    assert!(session.engine().context().is_saved(&message_identity(
        "First chat question",
        session.scope_key()
    )));

    let conversations = session.store().list().await.unwrap();
    assert_eq!(conversations.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_store_write_is_retried_next_pass() {
    let page = chatgpt_page(&[("user", "Store me eventually"), ("assistant", "Will do.")]);
    let (mut session, store, _notifier) = attach(&page);

    store.set_unavailable(true);
    assert_eq!(session.capture().await, CaptureOutcome::Failed);

    store.set_unavailable(false);
    assert_eq!(session.capture().await, CaptureOutcome::Appended(1));
    assert_eq!(stored_contents(&session).await, vec!["Store me eventually"]);
}

#[tokio::test(start_paused = true)]
async fn failed_rebuild_is_retried_next_pass() {
    let page = chatgpt_page(&[
        ("user", "Kept question text"),
        ("assistant", "Kept answer text"),
        ("user", "Dropped question text"),
        ("assistant", "Dropped answer text"),
    ]);
    let (mut session, store, _notifier) = attach(&page);
    session.capture().await;

    page.remove_message(2);
    page.remove_message(3);
    store.set_unavailable(true);
    assert_eq!(session.capture().await, CaptureOutcome::Failed);

    store.set_unavailable(false);
    assert_eq!(session.capture().await, CaptureOutcome::Rebuilt(1));
    assert_eq!(stored_contents(&session).await, vec!["Kept question text"]);
}

#[tokio::test(start_paused = true)]
async fn malformed_stored_record_is_treated_as_absent() {
    let page = chatgpt_page(&[("user", "Fresh question text"), ("assistant", "Fresh answer")]);
    let (mut session, store, _notifier) = attach(&page);
    store.insert_raw(session.scope_key().as_str(), json!({"messages": "not a list"}));

    assert_eq!(session.capture().await, CaptureOutcome::Appended(1));
    let conversation = session.stored_conversation().await.unwrap();
    assert_eq!(conversation.title, "Rust questions");
    assert_eq!(conversation.url, page.href());
}

#[tokio::test(start_paused = true)]
async fn unreachable_panel_does_not_stop_capture() {
    let page = chatgpt_page(&[("user", "Anyone listening?"), ("assistant", "Not right now.")]);
    let (mut session, _store, notifier) = attach(&page);
    notifier.set_unreachable(true);

    assert_eq!(session.capture().await, CaptureOutcome::Appended(1));
    assert!(notifier.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn astral_plane_text_counts_in_utf16_units() {
    let page = chatgpt_page(&[("user", "👍👍👍"), ("assistant", "Glad it worked.")]);
    let (mut session, _store, _notifier) = attach(&page);

    assert_eq!(session.capture().await, CaptureOutcome::Appended(1));
    let conversation = session.stored_conversation().await.unwrap();
    assert_eq!(conversation.messages[0].content, "👍👍👍");
    assert_eq!(conversation.messages[0].summary, "👍👍👍");
}
