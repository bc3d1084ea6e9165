// Tests for transcript assembly into chat turns

use chrono::{TimeZone, Utc};
use tutor_live::session::{Citation, Role, TurnAssembler};

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
}

#[test]
fn test_output_deltas_concatenate() {
    let mut turns = TurnAssembler::new();
    turns.push_output("Hel");
    turns.push_output("lo");

    let finalized = turns.finalize(now());

    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].role, Role::Assistant);
    assert_eq!(finalized[0].text, "Hello");
    assert!(finalized[0].citations.is_none());
}

#[test]
fn test_user_turn_precedes_assistant_turn() {
    let mut turns = TurnAssembler::new();
    turns.push_output("Two. ");
    turns.push_input("what is one plus one");

    let finalized = turns.finalize(now());

    assert_eq!(finalized.len(), 2);
    assert_eq!(finalized[0].role, Role::User);
    assert_eq!(finalized[0].text, "what is one plus one");
    assert_eq!(finalized[1].role, Role::Assistant);
    assert_eq!(finalized[1].text, "Two.");
    assert!(finalized[1].timestamp > finalized[0].timestamp);
    assert_ne!(finalized[0].id, finalized[1].id);
}

#[test]
fn test_blank_turn_emits_nothing() {
    let mut turns = TurnAssembler::new();
    assert!(turns.finalize(now()).is_empty());

    turns.push_input("  ");
    turns.push_output("\n");
    assert!(turns.finalize(now()).is_empty());
}

#[test]
fn test_finalize_clears_buffers() {
    let mut turns = TurnAssembler::new();
    turns.push_input("hi");
    turns.push_output("hello");
    turns.add_citations(vec![Citation {
        uri: "https://example.org".to_string(),
        title: None,
    }]);

    turns.finalize(now());

    assert_eq!(turns.input(), "");
    assert_eq!(turns.output(), "");
    assert!(turns.citations().is_empty());
    assert!(turns.finalize(now()).is_empty());
}

#[test]
fn test_citations_attach_to_assistant_turn() {
    let mut turns = TurnAssembler::new();
    turns.push_input("who won the match");
    turns.add_citations(vec![Citation {
        uri: "https://news.example/a".to_string(),
        title: Some("Match report".to_string()),
    }]);
    turns.push_output("India won by five wickets.");
    turns.add_citations(vec![Citation {
        uri: "https://news.example/b".to_string(),
        title: None,
    }]);

    let finalized = turns.finalize(now());

    assert!(finalized[0].citations.is_none());
    let citations = finalized[1].citations.as_ref().unwrap();
    assert_eq!(citations.len(), 2);
    assert_eq!(citations[0].title.as_deref(), Some("Match report"));
    assert_eq!(citations[1].uri, "https://news.example/b");
}

#[test]
fn test_interrupt_keeps_input_and_drops_output() {
    let mut turns = TurnAssembler::new();
    turns.push_input("wait, stop");
    turns.push_output("As I was saying, the");
    turns.add_citations(vec![Citation {
        uri: "https://example.org".to_string(),
        title: None,
    }]);

    turns.interrupt();

    assert_eq!(turns.input(), "wait, stop");
    assert_eq!(turns.output(), "");
    assert!(turns.citations().is_empty());

    let finalized = turns.finalize(now());
    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].role, Role::User);
}

#[test]
fn test_timestamps_never_go_backwards() {
    let mut turns = TurnAssembler::new();
    let typed = turns.local_user_turn("hello", now());

    // A clock that stepped back still yields a later stamp
    turns.push_output("hi there");
    let finalized = turns.finalize(now() - chrono::Duration::seconds(5));

    assert!(finalized[0].timestamp > typed.timestamp);
    assert_eq!(typed.role, Role::User);
    assert_eq!(typed.text, "hello");
}

#[test]
fn test_chat_turn_serializes_lowercase_role() {
    let mut turns = TurnAssembler::new();
    let turn = turns.local_user_turn("hello", now());

    let json = serde_json::to_value(&turn).unwrap();
    assert_eq!(json["role"], "user");
    assert_eq!(json["text"], "hello");
    assert!(json.get("citations").is_none());
}
