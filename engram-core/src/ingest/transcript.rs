//! Assistant transcript parser
//!
//! Parses line-delimited session transcripts into ordered turns, where a
//! turn is one user message followed by the contiguous assistant response
//! (including tool invocations) until the next user message.
//!
//! # Error Handling
//!
//! The parser is designed to recover rather than abort:
//!
//! - **Malformed JSON lines**: skipped and counted in
//!   [`ParsedTranscript::malformed_lines`]; parsing continues.
//! - **Unknown record types**: ignored.
//! - **Missing fields**: handled via `#[serde(default)]`.
//! - **Trailing user message without a reply**: emitted as a turn with
//!   empty assistant content.
//!
//! # Turn boundaries
//!
//! A `user` record that carries plain text starts a new turn. `user`
//! records whose content is only `tool_result` blocks are the transport
//! channel for tool output and belong to the current turn's assistant
//! response. Sidechain and meta records are skipped, as are local command
//! wrappers (`<command-name>`, `<local-command...`).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::Result;

/// One parsed turn, ready for recording.
#[derive(Debug, Clone, Default)]
pub struct ParsedTurn {
    /// Zero-based position within the session
    pub turn_number: i32,
    /// The user's message text
    pub user_message: String,
    /// Concatenated assistant text blocks
    pub assistant_text: String,
    /// Ordered unique tool names invoked during the turn
    pub tool_names: Vec<String>,
    /// Model that produced the response, if present
    pub model_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// The raw transcript lines making up this turn
    pub raw_jsonl: String,
    /// Deterministic sha256 hex digest over user message, assistant text,
    /// and ordered tool names
    pub content_hash: String,
}

/// Result of parsing a transcript file.
#[derive(Debug, Default)]
pub struct ParsedTranscript {
    pub turns: Vec<ParsedTurn>,
    /// Lines that failed to parse (never fatal)
    pub malformed_lines: u32,
}

// ============================================
// Raw record types (serde deserialization)
// ============================================

/// A single transcript line. `#[serde(default)]` keeps missing fields
/// non-fatal.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawRecord {
    #[serde(rename = "type")]
    record_type: Option<String>,
    timestamp: Option<String>,
    is_sidechain: Option<bool>,
    is_meta: Option<bool>,
    message: Option<RawMessage>,
    // Top-level tool records (alternate wire layout)
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    role: Option<String>,
    model: Option<String>,
    content: Option<RawContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for RawContent {
    fn default() -> Self {
        RawContent::Text(String::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        #[serde(default)]
        #[allow(dead_code)]
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(default)]
        #[allow(dead_code)]
        content: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

impl RawContent {
    /// Plain text from a content field: the string itself, or the joined
    /// text blocks.
    fn text(&self) -> String {
        match self {
            RawContent::Text(s) => s.clone(),
            RawContent::Blocks(blocks) => {
                let parts: Vec<&str> = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                parts.join("\n")
            }
        }
    }

    /// Tool names from tool_use blocks, in order.
    fn tool_names(&self) -> Vec<String> {
        match self {
            RawContent::Text(_) => vec![],
            RawContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { name, .. } => Some(name.clone()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// True when the content consists only of tool_result blocks.
    fn is_tool_result_only(&self) -> bool {
        match self {
            RawContent::Text(_) => false,
            RawContent::Blocks(blocks) => {
                !blocks.is_empty()
                    && blocks
                        .iter()
                        .all(|b| matches!(b, ContentBlock::ToolResult { .. }))
            }
        }
    }
}

/// Compute the 64-hex content hash over a turn's textual and tool-name
/// content. Identical turns always hash identically, which makes
/// re-ingestion a no-op.
pub fn content_hash(user_message: &str, assistant_text: &str, tool_names: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_message.as_bytes());
    hasher.update(b"\n");
    hasher.update(assistant_text.as_bytes());
    hasher.update(b"\n");
    hasher.update(tool_names.join(",").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parse a transcript file into turns.
///
/// The only I/O is reading the file; everything else is pure.
pub fn parse_transcript(path: &Path) -> Result<ParsedTranscript> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = Vec::new();
    for line in reader.lines() {
        lines.push(line?);
    }
    Ok(parse_lines(lines.iter().map(|s| s.as_str())))
}

/// Parse transcript lines into turns. Pure; used directly by tests.
pub fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> ParsedTranscript {
    let mut result = ParsedTranscript::default();

    // In-progress turn state
    struct Pending {
        user_message: String,
        assistant_texts: Vec<String>,
        tool_names: Vec<String>,
        model_name: Option<String>,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
        raw_lines: Vec<String>,
    }

    let mut current: Option<Pending> = None;

    fn finalize(pending: Pending, turns: &mut Vec<ParsedTurn>) {
        let assistant_text = pending.assistant_texts.join("\n");
        let hash = content_hash(&pending.user_message, &assistant_text, &pending.tool_names);
        turns.push(ParsedTurn {
            turn_number: turns.len() as i32,
            user_message: pending.user_message,
            assistant_text,
            tool_names: pending.tool_names,
            model_name: pending.model_name,
            started_at: pending.started_at,
            ended_at: pending.ended_at,
            raw_jsonl: pending.raw_lines.join("\n"),
            content_hash: hash,
        });
    }

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: RawRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(_) => {
                result.malformed_lines += 1;
                continue;
            }
        };

        if record.is_sidechain.unwrap_or(false) || record.is_meta.unwrap_or(false) {
            continue;
        }

        let timestamp = record
            .timestamp
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        match record.record_type.as_deref() {
            Some("user") => {
                let content = record
                    .message
                    .as_ref()
                    .and_then(|m| m.content.as_ref());

                // Tool results ride in user records; they belong to the
                // current turn's assistant response.
                if let Some(c) = content {
                    if c.is_tool_result_only() {
                        if let Some(pending) = current.as_mut() {
                            pending.raw_lines.push(line.to_string());
                            if timestamp.is_some() {
                                pending.ended_at = timestamp;
                            }
                        }
                        continue;
                    }
                }

                let text = content.map(|c| c.text()).unwrap_or_default();
                let trimmed = text.trim();

                // Local command wrappers are not real user messages.
                if trimmed.starts_with("<command-name>") || trimmed.starts_with("<local-command") {
                    continue;
                }
                if trimmed.is_empty() {
                    continue;
                }

                if let Some(pending) = current.take() {
                    finalize(pending, &mut result.turns);
                }

                current = Some(Pending {
                    user_message: text,
                    assistant_texts: Vec::new(),
                    tool_names: Vec::new(),
                    model_name: None,
                    started_at: timestamp,
                    ended_at: timestamp,
                    raw_lines: vec![line.to_string()],
                });
            }
            Some("assistant") => {
                let Some(pending) = current.as_mut() else {
                    // Assistant output before any user message; nothing to
                    // attach it to.
                    continue;
                };

                if let Some(message) = &record.message {
                    if let Some(content) = &message.content {
                        let text = content.text();
                        if !text.is_empty() {
                            pending.assistant_texts.push(text);
                        }
                        for tool in content.tool_names() {
                            if !pending.tool_names.contains(&tool) {
                                pending.tool_names.push(tool);
                            }
                        }
                    }
                    if pending.model_name.is_none() {
                        pending.model_name = message.model.clone();
                    }
                }

                if timestamp.is_some() {
                    pending.ended_at = timestamp;
                }
                pending.raw_lines.push(line.to_string());
            }
            Some("tool_use") => {
                // Alternate wire layout: tool invocations as their own
                // records.
                if let Some(pending) = current.as_mut() {
                    if let Some(name) = &record.name {
                        if !pending.tool_names.contains(name) {
                            pending.tool_names.push(name.clone());
                        }
                    }
                    pending.raw_lines.push(line.to_string());
                    if timestamp.is_some() {
                        pending.ended_at = timestamp;
                    }
                }
            }
            Some("tool_result") => {
                if let Some(pending) = current.as_mut() {
                    pending.raw_lines.push(line.to_string());
                    if timestamp.is_some() {
                        pending.ended_at = timestamp;
                    }
                }
            }
            // meta records and unknown types carry no conversation content
            _ => {}
        }
    }

    if let Some(pending) = current.take() {
        finalize(pending, &mut result.turns);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_line(text: &str, ts: &str) -> String {
        format!(
            r#"{{"type":"user","message":{{"role":"user","content":"{}"}},"timestamp":"{}"}}"#,
            text, ts
        )
    }

    fn assistant_line(text: &str, ts: &str) -> String {
        format!(
            r#"{{"type":"assistant","message":{{"role":"assistant","model":"claude-haiku-4-5","content":[{{"type":"text","text":"{}"}}]}},"timestamp":"{}"}}"#,
            text, ts
        )
    }

    #[test]
    fn test_groups_user_and_assistant_into_turns() {
        let lines = vec![
            user_line("fix the parser", "2025-06-01T10:00:00Z"),
            assistant_line("Looking at it now.", "2025-06-01T10:00:05Z"),
            user_line("thanks, works", "2025-06-01T10:05:00Z"),
            assistant_line("Glad to hear it.", "2025-06-01T10:05:03Z"),
        ];

        let parsed = parse_lines(lines.iter().map(|s| s.as_str()));
        assert_eq!(parsed.turns.len(), 2);
        assert_eq!(parsed.turns[0].turn_number, 0);
        assert_eq!(parsed.turns[0].user_message, "fix the parser");
        assert_eq!(parsed.turns[0].assistant_text, "Looking at it now.");
        assert_eq!(parsed.turns[1].user_message, "thanks, works");
        assert_eq!(parsed.malformed_lines, 0);
    }

    #[test]
    fn test_tool_results_stay_inside_the_turn() {
        let lines = vec![
            user_line("run the tests", "2025-06-01T10:00:00Z"),
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"cargo test"}}]},"timestamp":"2025-06-01T10:00:02Z"}"#.to_string(),
            r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]},"timestamp":"2025-06-01T10:00:04Z"}"#.to_string(),
            assistant_line("All green.", "2025-06-01T10:00:06Z"),
        ];

        let parsed = parse_lines(lines.iter().map(|s| s.as_str()));
        assert_eq!(parsed.turns.len(), 1);
        let turn = &parsed.turns[0];
        assert_eq!(turn.tool_names, vec!["Bash".to_string()]);
        assert_eq!(turn.assistant_text, "All green.");
        // All four lines captured as raw content
        assert_eq!(turn.raw_jsonl.lines().count(), 4);
    }

    #[test]
    fn test_trailing_user_message_without_reply() {
        let lines = vec![
            user_line("first", "2025-06-01T10:00:00Z"),
            assistant_line("done", "2025-06-01T10:00:05Z"),
            user_line("one more thing", "2025-06-01T10:01:00Z"),
        ];

        let parsed = parse_lines(lines.iter().map(|s| s.as_str()));
        assert_eq!(parsed.turns.len(), 2);
        assert_eq!(parsed.turns[1].user_message, "one more thing");
        assert!(parsed.turns[1].assistant_text.is_empty());
    }

    #[test]
    fn test_malformed_lines_counted_not_fatal() {
        let lines = vec![
            "not json at all".to_string(),
            user_line("hello", "2025-06-01T10:00:00Z"),
            "{\"broken\": ".to_string(),
            assistant_line("hi", "2025-06-01T10:00:05Z"),
        ];

        let parsed = parse_lines(lines.iter().map(|s| s.as_str()));
        assert_eq!(parsed.turns.len(), 1);
        assert_eq!(parsed.malformed_lines, 2);
    }

    #[test]
    fn test_sidechain_meta_and_unknown_records_skipped() {
        let lines = vec![
            r#"{"type":"meta","data":"irrelevant"}"#.to_string(),
            r#"{"type":"user","isSidechain":true,"message":{"role":"user","content":"agent chatter"}}"#.to_string(),
            r#"{"type":"wholly-unknown","payload":1}"#.to_string(),
            user_line("real prompt", "2025-06-01T10:00:00Z"),
        ];

        let parsed = parse_lines(lines.iter().map(|s| s.as_str()));
        assert_eq!(parsed.turns.len(), 1);
        assert_eq!(parsed.turns[0].user_message, "real prompt");
        assert_eq!(parsed.malformed_lines, 0);
    }

    #[test]
    fn test_command_wrappers_skipped() {
        let lines = vec![
            r#"{"type":"user","message":{"role":"user","content":"<command-name>clear</command-name>"}}"#.to_string(),
            user_line("actual question", "2025-06-01T10:00:00Z"),
        ];

        let parsed = parse_lines(lines.iter().map(|s| s.as_str()));
        assert_eq!(parsed.turns.len(), 1);
        assert_eq!(parsed.turns[0].user_message, "actual question");
    }

    #[test]
    fn test_content_hash_is_deterministic_and_64_hex() {
        let tools = vec!["Bash".to_string(), "Read".to_string()];
        let a = content_hash("msg", "reply", &tools);
        let b = content_hash("msg", "reply", &tools);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        // Tool order matters
        let reversed = vec!["Read".to_string(), "Bash".to_string()];
        assert_ne!(a, content_hash("msg", "reply", &reversed));
    }

    #[test]
    fn test_identical_input_hashes_identically_across_parses() {
        let lines = vec![
            user_line("same input", "2025-06-01T10:00:00Z"),
            assistant_line("same output", "2025-06-01T10:00:05Z"),
        ];

        let first = parse_lines(lines.iter().map(|s| s.as_str()));
        let second = parse_lines(lines.iter().map(|s| s.as_str()));
        assert_eq!(first.turns[0].content_hash, second.turns[0].content_hash);
    }

    #[test]
    fn test_model_name_captured() {
        let lines = vec![
            user_line("q", "2025-06-01T10:00:00Z"),
            assistant_line("a", "2025-06-01T10:00:05Z"),
        ];
        let parsed = parse_lines(lines.iter().map(|s| s.as_str()));
        assert_eq!(parsed.turns[0].model_name.as_deref(), Some("claude-haiku-4-5"));
    }
}
