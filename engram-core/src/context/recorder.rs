//! Session recording
//!
//! Orchestrates ingestion of one session: parse the transcript, upsert the
//! session, insert turns and content with content-hash deduplication, and
//! enqueue the follow-up jobs. Re-running against the same transcript is a
//! no-op on content and enqueues only jobs that were not already
//! deduplicated.

use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::db::{jobs, NewTurn, Store};
use crate::error::Result;
use crate::ingest::transcript::parse_transcript;
use crate::types::JobKind;

const DEFAULT_MAX_ATTEMPTS: i32 = 10;

/// Delay applied to low-priority kinds when the queue is deep.
const BACKPRESSURE_DELAY_SECS: f64 = 300.0;

/// Summary of one recording pass.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub session_uuid: Uuid,
    pub session_id: String,
    pub turns_recorded: usize,
    pub turns_skipped: usize,
    /// Ids of turns inserted or replaced in this pass
    pub new_turn_ids: Vec<Uuid>,
}

/// Record a session's transcript into the store.
///
/// Turns whose `(turn_number, content_hash)` already exist are skipped
/// entirely; changed or new turns are inserted or replaced within one
/// transaction together with the session's activity fields.
pub async fn record_session(
    store: &Store,
    session_id: &str,
    transcript_path: &str,
    workspace_path: &str,
) -> Result<RecordOutcome> {
    let parsed = parse_transcript(Path::new(transcript_path))?;
    if parsed.malformed_lines > 0 {
        tracing::warn!(
            session_id,
            malformed = parsed.malformed_lines,
            "Transcript contained malformed lines"
        );
    }

    let session = store
        .upsert_session(session_id, transcript_path, workspace_path)
        .await?;

    let existing: HashMap<i32, String> = store
        .turn_hashes(session.id)
        .await?
        .into_iter()
        .collect();

    let mut new_turns: Vec<NewTurn> = Vec::new();
    let mut skipped = 0usize;

    for turn in &parsed.turns {
        if existing.get(&turn.turn_number).map(|h| h.as_str()) == Some(turn.content_hash.as_str())
        {
            skipped += 1;
            continue;
        }
        new_turns.push(NewTurn {
            turn_number: turn.turn_number,
            user_message: Some(turn.user_message.clone()),
            assistant_text: (!turn.assistant_text.is_empty()).then(|| turn.assistant_text.clone()),
            content_hash: turn.content_hash.clone(),
            model_name: turn.model_name.clone(),
            tool_names: turn.tool_names.clone(),
            started_at: turn.started_at,
            ended_at: turn.ended_at,
            raw_jsonl: turn.raw_jsonl.clone(),
        });
    }

    let new_turn_ids = if new_turns.is_empty() {
        Vec::new()
    } else {
        store
            .insert_turns(session.id, &new_turns, parsed.turns.len() as i32)
            .await?
    };

    tracing::info!(
        session_id,
        recorded = new_turn_ids.len(),
        skipped,
        "Session recorded"
    );

    Ok(RecordOutcome {
        session_uuid: session.id,
        session_id: session_id.to_string(),
        turns_recorded: new_turn_ids.len(),
        turns_skipped: skipped,
        new_turn_ids,
    })
}

/// Enqueue the follow-up jobs for a recording pass, in priority order.
///
/// Per-turn jobs carry a `<kind>:<turn_id>` dedupe key. When the queue is
/// over the soft cap, the low-priority kinds are enqueued with a delay so
/// summarization yields to fresher work.
pub async fn enqueue_followups(
    store: &Store,
    worker_config: &WorkerConfig,
    outcome: &RecordOutcome,
) -> Result<usize> {
    let pool = store.pool();
    let mut enqueued = 0usize;

    for turn_id in &outcome.new_turn_ids {
        for kind in [
            JobKind::TurnSummary,
            JobKind::EntityExtract,
            JobKind::ArtifactExtract,
        ] {
            let result = jobs::enqueue(
                pool,
                kind.as_str(),
                json!({ "turn_id": turn_id }),
                kind.priority(),
                Some(&format!("{}:{}", kind.as_str(), turn_id)),
                DEFAULT_MAX_ATTEMPTS,
            )
            .await?;
            if result.created {
                enqueued += 1;
            }
        }
    }

    if outcome.turns_recorded > 0 {
        let depth = jobs::queue_depth(pool).await?;
        let congested = depth > worker_config.queue_soft_cap;

        for kind in [JobKind::SessionSummary, JobKind::SkillExtract] {
            let payload = json!({ "session_id": outcome.session_id });
            let dedupe = format!("{}:{}", kind.as_str(), outcome.session_id);

            let result = if congested && kind.is_low_priority() {
                jobs::enqueue_delayed(
                    pool,
                    kind.as_str(),
                    payload,
                    kind.priority(),
                    Some(&dedupe),
                    DEFAULT_MAX_ATTEMPTS,
                    BACKPRESSURE_DELAY_SECS,
                )
                .await?
            } else {
                jobs::enqueue(
                    pool,
                    kind.as_str(),
                    payload,
                    kind.priority(),
                    Some(&dedupe),
                    DEFAULT_MAX_ATTEMPTS,
                )
                .await?
            };
            if result.created {
                enqueued += 1;
            }
        }
    }

    Ok(enqueued)
}

/// Fast path for the stop hook: enqueue a `session_process` job and return.
///
/// The dedupe key includes the transcript file size so each new turn
/// re-enqueues; turn-level content hashing makes re-processing the same
/// file safe.
pub async fn enqueue_session_recording(
    store: &Store,
    session_id: &str,
    transcript_path: &str,
    workspace_path: &str,
) -> Result<bool> {
    let file_size = std::fs::metadata(transcript_path)
        .map(|m| m.len())
        .unwrap_or(0);

    let result = jobs::enqueue(
        store.pool(),
        JobKind::SessionProcess.as_str(),
        json!({
            "session_id": session_id,
            "transcript_path": transcript_path,
            "workspace_path": workspace_path,
        }),
        JobKind::SessionProcess.priority(),
        Some(&format!(
            "session_process:{}:{}",
            session_id, file_size
        )),
        DEFAULT_MAX_ATTEMPTS,
    )
    .await?;

    Ok(result.created)
}
