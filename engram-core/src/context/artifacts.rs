//! Artifact extraction from turn content
//!
//! Walks every tool invocation in a turn's raw JSONL and pulls out the
//! files it touched, the commands it ran, and the errors it hit. Pure and
//! deterministic: identical input yields identical output, and duplicates
//! within a turn are collapsed.

use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;

use crate::types::{ArtifactType, TurnArtifact};
use uuid::Uuid;

/// Tools whose path argument counts as a file touch.
const FILE_TOOLS: &[&str] = &["Read", "Write", "Edit", "NotebookEdit"];

/// Tools that execute shell commands.
const SHELL_TOOLS: &[&str] = &["Bash"];

/// Substrings in tool output that indicate a failure even when the result
/// is not flagged as an error.
const ERROR_SIGNATURES: &[&str] = &["Traceback", "error:", "Error:"];

/// Everything extracted from a single turn.
#[derive(Debug, Default)]
pub struct ExtractedArtifacts {
    pub artifacts: Vec<TurnArtifact>,
    pub files_touched: Vec<String>,
    pub commands_run: Vec<String>,
    pub errors_encountered: Vec<String>,
    pub tool_call_count: i32,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawLine {
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    content: Option<Value>,
}

/// Extract artifacts from a turn's raw JSONL content.
///
/// `full_commands` records the complete command string; when false only the
/// first argv token is kept.
pub fn extract_artifacts(turn_id: Uuid, raw_jsonl: &str, full_commands: bool) -> ExtractedArtifacts {
    let mut result = ExtractedArtifacts::default();

    for line in raw_jsonl.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Ok(parsed) = serde_json::from_str::<RawLine>(line) else {
            continue;
        };

        let Some(Value::Array(blocks)) = parsed.message.and_then(|m| m.content) else {
            continue;
        };

        for block in &blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("tool_use") => process_tool_use(turn_id, block, full_commands, &mut result),
                Some("tool_result") => process_tool_result(turn_id, block, &mut result),
                _ => {}
            }
        }
    }

    result
}

fn process_tool_use(
    turn_id: Uuid,
    block: &Value,
    full_commands: bool,
    result: &mut ExtractedArtifacts,
) {
    let tool_name = block.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let input = block.get("input").cloned().unwrap_or(Value::Null);

    result.tool_call_count += 1;

    if FILE_TOOLS.contains(&tool_name) {
        let path = input
            .get("file_path")
            .or_else(|| input.get("notebook_path"))
            .or_else(|| input.get("path"))
            .and_then(|p| p.as_str())
            .unwrap_or("");

        if !path.is_empty() && !result.files_touched.iter().any(|f| f.as_str() == path) {
            result.files_touched.push(path.to_string());
            result.artifacts.push(TurnArtifact {
                turn_id,
                artifact_type: ArtifactType::File,
                artifact_value: path.to_string(),
                metadata: serde_json::json!({ "tool": tool_name }),
            });
        }
    } else if SHELL_TOOLS.contains(&tool_name) {
        let command = input
            .get("command")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .trim();

        if !command.is_empty() {
            let recorded = if full_commands {
                truncate(command, 500)
            } else {
                command.split_whitespace().next().unwrap_or("").to_string()
            };

            if !result.commands_run.iter().any(|c| c == &recorded) {
                result.commands_run.push(recorded.clone());
                result.artifacts.push(TurnArtifact {
                    turn_id,
                    artifact_type: ArtifactType::Command,
                    artifact_value: recorded,
                    metadata: serde_json::json!({ "tool": tool_name }),
                });
            }
        }
    }
}

fn process_tool_result(turn_id: Uuid, block: &Value, result: &mut ExtractedArtifacts) {
    let is_error = block
        .get("is_error")
        .and_then(|e| e.as_bool())
        .unwrap_or(false);

    let content = result_text(block.get("content"));
    if content.is_empty() {
        return;
    }

    // Paths the tool reports back count as touched files too
    for path in extract_file_paths(&content) {
        if !result.files_touched.iter().any(|f| f == &path) {
            result.files_touched.push(path.clone());
            result.artifacts.push(TurnArtifact {
                turn_id,
                artifact_type: ArtifactType::File,
                artifact_value: path,
                metadata: serde_json::json!({ "source": "tool_result" }),
            });
        }
    }

    let error_msg = if is_error {
        Some(truncate(content.trim(), 500))
    } else {
        // Failures that slipped through without the error flag
        content
            .lines()
            .find(|line| ERROR_SIGNATURES.iter().any(|sig| line.contains(sig)))
            .map(|line| truncate(line.trim(), 500))
    };

    if let Some(error_msg) = error_msg {
        if !error_msg.is_empty() && !result.errors_encountered.iter().any(|e| e == &error_msg) {
            result.errors_encountered.push(error_msg.clone());
            result.artifacts.push(TurnArtifact {
                turn_id,
                artifact_type: ArtifactType::Error,
                artifact_value: error_msg,
                metadata: serde_json::json!({}),
            });
        }
    }
}

/// Text from a tool_result content field, which is either a string or a
/// list of text blocks.
fn result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect();
            parts.join("\n")
        }
        _ => String::new(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    s[..end].to_string()
}

/// Extract file paths from free text (prompts, messages).
///
/// Matches absolute paths and `src/`-style relative paths that carry a file
/// extension. Order-preserving, deduplicated.
pub fn extract_file_paths(text: &str) -> Vec<String> {
    static ABSOLUTE: OnceLock<regex::Regex> = OnceLock::new();
    static RELATIVE: OnceLock<regex::Regex> = OnceLock::new();

    let absolute = ABSOLUTE
        .get_or_init(|| regex::Regex::new(r"^/[\w./\-]+\.\w+$").expect("valid path regex"));
    let relative = RELATIVE.get_or_init(|| {
        regex::Regex::new(r"^(?:src|tests|lib|app|pkg)/[\w./\-]+\.\w+$")
            .expect("valid path regex")
    });

    let mut paths: Vec<String> = Vec::new();
    for token in text.split_whitespace() {
        let token = token.trim_matches(|c: char| "\"'`(),;:<>[]".contains(c));
        if token.len() <= 3 {
            continue;
        }
        if (absolute.is_match(token) || relative.is_match(token))
            && !paths.iter().any(|p| p.as_str() == token)
        {
            paths.push(token.to_string());
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_use_line(name: &str, input: serde_json::Value) -> String {
        serde_json::json!({
            "type": "assistant",
            "message": {
                "role": "assistant",
                "content": [{"type": "tool_use", "id": "t1", "name": name, "input": input}]
            }
        })
        .to_string()
    }

    fn tool_result_line(content: &str, is_error: bool) -> String {
        serde_json::json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": "t1", "content": content, "is_error": is_error}]
            }
        })
        .to_string()
    }

    #[test]
    fn test_extracts_files_commands_and_errors() {
        let turn_id = Uuid::new_v4();
        let raw = [
            tool_use_line("Read", serde_json::json!({"file_path": "/src/login.py"})),
            tool_use_line("Bash", serde_json::json!({"command": "pytest tests/"})),
            tool_result_line("Traceback (most recent call last):\n  boom", true),
        ]
        .join("\n");

        let extracted = extract_artifacts(turn_id, &raw, true);
        assert_eq!(extracted.files_touched, vec!["/src/login.py"]);
        assert_eq!(extracted.commands_run, vec!["pytest tests/"]);
        assert_eq!(extracted.errors_encountered.len(), 1);
        assert!(extracted.errors_encountered[0].contains("Traceback"));
        assert_eq!(extracted.tool_call_count, 2);
        assert_eq!(extracted.artifacts.len(), 3);
    }

    #[test]
    fn test_error_signature_in_unflagged_output() {
        let turn_id = Uuid::new_v4();
        let raw = tool_result_line("build finished\nerror: linking failed", false);

        let extracted = extract_artifacts(turn_id, &raw, true);
        assert_eq!(extracted.errors_encountered.len(), 1);
        assert!(extracted.errors_encountered[0].contains("linking failed"));
    }

    #[test]
    fn test_duplicates_collapsed() {
        let turn_id = Uuid::new_v4();
        let raw = [
            tool_use_line("Read", serde_json::json!({"file_path": "/a/b.rs"})),
            tool_use_line("Edit", serde_json::json!({"file_path": "/a/b.rs"})),
            tool_use_line("Bash", serde_json::json!({"command": "ls"})),
            tool_use_line("Bash", serde_json::json!({"command": "ls"})),
        ]
        .join("\n");

        let extracted = extract_artifacts(turn_id, &raw, true);
        assert_eq!(extracted.files_touched, vec!["/a/b.rs"]);
        assert_eq!(extracted.commands_run, vec!["ls"]);
        assert_eq!(extracted.tool_call_count, 4);
    }

    #[test]
    fn test_paths_in_tool_results_count_as_touched() {
        let turn_id = Uuid::new_v4();
        let raw = tool_result_line("Updated /src/auth/session.rs and src/lib/api.py", false);

        let extracted = extract_artifacts(turn_id, &raw, true);
        assert_eq!(
            extracted.files_touched,
            vec!["/src/auth/session.rs", "src/lib/api.py"]
        );
        assert_eq!(
            extracted
                .artifacts
                .iter()
                .filter(|a| a.artifact_type == ArtifactType::File)
                .count(),
            2
        );
    }

    #[test]
    fn test_tool_result_paths_dedupe_against_tool_use() {
        let turn_id = Uuid::new_v4();
        let raw = [
            tool_use_line("Edit", serde_json::json!({"file_path": "/src/login.py"})),
            tool_result_line("Applied edit to /src/login.py", false),
        ]
        .join("\n");

        let extracted = extract_artifacts(turn_id, &raw, true);
        assert_eq!(extracted.files_touched, vec!["/src/login.py"]);
        assert_eq!(
            extracted
                .artifacts
                .iter()
                .filter(|a| a.artifact_type == ArtifactType::File)
                .count(),
            1
        );
    }

    #[test]
    fn test_argv0_command_mode() {
        let turn_id = Uuid::new_v4();
        let raw = tool_use_line("Bash", serde_json::json!({"command": "cargo build --release"}));

        let extracted = extract_artifacts(turn_id, &raw, false);
        assert_eq!(extracted.commands_run, vec!["cargo"]);
    }

    #[test]
    fn test_deterministic_output() {
        let turn_id = Uuid::new_v4();
        let raw = [
            tool_use_line("Read", serde_json::json!({"file_path": "/x.rs"})),
            tool_use_line("Bash", serde_json::json!({"command": "make"})),
        ]
        .join("\n");

        let a = extract_artifacts(turn_id, &raw, true);
        let b = extract_artifacts(turn_id, &raw, true);
        assert_eq!(a.files_touched, b.files_touched);
        assert_eq!(a.commands_run, b.commands_run);
        assert_eq!(a.artifacts.len(), b.artifacts.len());
    }

    #[test]
    fn test_extract_file_paths_from_text() {
        let paths =
            extract_file_paths("fix the auth bug in /src/login.py and check src/auth/session.rs");
        assert_eq!(paths, vec!["/src/login.py", "src/auth/session.rs"]);
    }

    #[test]
    fn test_extract_file_paths_ignores_noise() {
        let paths = extract_file_paths("a/b c.d the file. /tmp and 1.5x faster");
        assert!(paths.is_empty());
    }

    #[test]
    fn test_extract_file_paths_strips_punctuation() {
        let paths = extract_file_paths("see `/src/main.rs`, then (src/lib/api.py)");
        assert_eq!(paths, vec!["/src/main.rs", "src/lib/api.py"]);
    }
}
