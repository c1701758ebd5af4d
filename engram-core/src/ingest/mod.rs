//! Transcript ingestion
//!
//! Converts assistant transcript files into ordered turn records. The
//! parser itself is pure; discovery walks the assistant's session
//! directory for backfill.

pub mod transcript;

pub use transcript::{content_hash, parse_lines, parse_transcript, ParsedTranscript, ParsedTurn};

use std::path::PathBuf;

/// Default location for assistant session transcripts.
pub fn default_sessions_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".claude").join("projects"))
}

/// Discover all transcript files under a sessions directory, for the
/// backfill path (`record --all`).
pub fn discover_transcripts(root: &std::path::Path) -> crate::error::Result<Vec<PathBuf>> {
    let pattern = root.join("*/*.jsonl");
    let pattern_str = pattern.to_string_lossy();

    let entries = glob::glob(&pattern_str)
        .map_err(|e| crate::error::Error::Parse(format!("invalid glob pattern: {}", e)))?;

    let mut files: Vec<PathBuf> = entries.flatten().collect();
    files.sort();
    Ok(files)
}
