//! Integration tests for the transcript parser
//!
//! These use fixture files in `tests/fixtures/` to verify the parse of
//! realistic session transcripts.

use engram_core::ingest::{parse_transcript, ParsedTranscript};
use std::path::PathBuf;

fn fixture(name: &str) -> ParsedTranscript {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    parse_transcript(&path).expect("parse should succeed")
}

#[test]
fn test_parse_minimal_session() {
    let parsed = fixture("minimal-session.jsonl");

    assert_eq!(parsed.turns.len(), 2);
    assert_eq!(parsed.malformed_lines, 0);

    let first = &parsed.turns[0];
    assert_eq!(first.turn_number, 0);
    assert_eq!(first.user_message, "Hello, can you look at the parser?");
    assert!(first.assistant_text.contains("parser module"));
    assert_eq!(first.model_name.as_deref(), Some("claude-haiku-4-5-20251001"));
    assert!(first.started_at.is_some());
    assert!(first.ended_at.is_some());
    assert!(first.ended_at >= first.started_at);

    let second = &parsed.turns[1];
    assert_eq!(second.turn_number, 1);
    assert!(second.assistant_text.contains("AST"));
}

#[test]
fn test_parse_session_with_tool_error() {
    let parsed = fixture("with-tool-error.jsonl");

    // Three user messages, three turns; tool results do not split turns
    assert_eq!(parsed.turns.len(), 3);

    assert_eq!(parsed.turns[0].tool_names, vec!["Read".to_string()]);
    assert_eq!(parsed.turns[1].tool_names, vec!["Edit".to_string()]);
    assert_eq!(parsed.turns[2].tool_names, vec!["Bash".to_string()]);

    // The failing tool result stays inside the third turn's raw content
    assert!(parsed.turns[2].raw_jsonl.contains("Traceback"));
    assert!(parsed.turns[2].raw_jsonl.contains("AttributeError"));
    assert!(!parsed.turns[1].raw_jsonl.contains("Traceback"));
}

#[test]
fn test_parse_malformed_lines_counted() {
    let parsed = fixture("malformed-lines.jsonl");

    assert_eq!(parsed.turns.len(), 2);
    assert_eq!(parsed.malformed_lines, 2);
    assert_eq!(parsed.turns[0].user_message, "First question");
    assert_eq!(parsed.turns[1].user_message, "Second question");
}

#[test]
fn test_reparse_is_deterministic() {
    let first = fixture("with-tool-error.jsonl");
    let second = fixture("with-tool-error.jsonl");

    assert_eq!(first.turns.len(), second.turns.len());
    for (a, b) in first.turns.iter().zip(second.turns.iter()) {
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.raw_jsonl, b.raw_jsonl);
    }
}

#[test]
fn test_artifact_extraction_over_fixture_turns() {
    use engram_core::context::artifacts::extract_artifacts;
    use engram_core::types::ArtifactType;

    let parsed = fixture("with-tool-error.jsonl");
    let turn_id = uuid::Uuid::new_v4();

    let last = extract_artifacts(turn_id, &parsed.turns[2].raw_jsonl, true);
    assert_eq!(last.commands_run, vec!["pytest tests/test_login.py"]);
    assert_eq!(last.errors_encountered.len(), 1);
    assert!(last.errors_encountered[0].contains("AttributeError"));
    assert!(last
        .artifacts
        .iter()
        .any(|a| a.artifact_type == ArtifactType::Error));

    let first = extract_artifacts(turn_id, &parsed.turns[0].raw_jsonl, true);
    assert_eq!(first.files_touched, vec!["/src/login.py"]);
    assert!(first.errors_encountered.is_empty());
}
