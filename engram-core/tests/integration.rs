//! Integration tests for the store, job queue, and the recording and
//! retrieval pipelines.
//!
//! These need a PostgreSQL instance and skip themselves unless
//! `ENGRAM_TEST_DB_URL` is set. Tests that share the queue serialize on a
//! process-wide lock so claim-counting assertions stay exact.

use engram_core::config::Config;
use engram_core::context::recorder;
use engram_core::context::{format_context, Classifier, Intent, Retriever};
use engram_core::db::{jobs, NewTurn, Store};
use engram_core::model::UnavailableModel;
use engram_core::types::{ArtifactType, JobStatus, TaskPriority, TaskStatus, TurnArtifact};
use engram_core::worker::Worker;
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use uuid::Uuid;

static DB_LOCK: OnceLock<tokio::sync::Mutex<()>> = OnceLock::new();

fn db_lock() -> &'static tokio::sync::Mutex<()> {
    DB_LOCK.get_or_init(|| tokio::sync::Mutex::new(()))
}

async fn test_store() -> Option<Store> {
    let url = std::env::var("ENGRAM_TEST_DB_URL").ok()?;
    let store = Store::connect(&url).await.ok()?;
    store.migrate().await.ok()?;
    Some(store)
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().to_string()[..8])
}

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Claim jobs until the target is claimed, completing anything else that
/// comes out of the queue first.
async fn claim_until(store: &Store, target: Uuid) -> engram_core::types::Job {
    loop {
        match jobs::claim(store.pool(), 60.0).await.unwrap() {
            Some(job) if job.id == target => return job,
            Some(job) => jobs::complete(store.pool(), job.id).await.unwrap(),
            None => panic!("target job was not claimable"),
        }
    }
}

// ============================================
// Job queue properties
// ============================================

#[tokio::test]
async fn test_enqueue_dedupe_returns_existing_job() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: ENGRAM_TEST_DB_URL not set");
        return;
    };
    let _guard = db_lock().lock().await;

    let key = unique("dedupe");
    let first = jobs::enqueue(store.pool(), "turn_summary", json!({}), 5, Some(&key), 10)
        .await
        .unwrap();
    let second = jobs::enqueue(store.pool(), "turn_summary", json!({}), 5, Some(&key), 10)
        .await
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.job_id, second.job_id);

    // A finished job with the same key is re-armed
    jobs::complete(store.pool(), first.job_id).await.unwrap();
    let third = jobs::enqueue(store.pool(), "turn_summary", json!({}), 5, Some(&key), 10)
        .await
        .unwrap();
    assert!(third.created);
    assert_eq!(third.job_id, first.job_id);

    jobs::complete(store.pool(), third.job_id).await.unwrap();
}

#[tokio::test]
async fn test_parallel_claimers_claim_each_job_exactly_once() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: ENGRAM_TEST_DB_URL not set");
        return;
    };
    let _guard = db_lock().lock().await;

    let mut ours = HashSet::new();
    for i in 0..20 {
        let enqueued = jobs::enqueue(
            store.pool(),
            "turn_summary",
            json!({ "n": i }),
            5,
            Some(&unique("claim-race")),
            10,
        )
        .await
        .unwrap();
        ours.insert(enqueued.job_id);
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = jobs::claim(store.pool(), 60.0).await.unwrap() {
                assert!(job.attempts <= job.max_attempts);
                jobs::complete(store.pool(), job.id).await.unwrap();
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut seen: Vec<Uuid> = Vec::new();
    for handle in handles {
        seen.extend(handle.await.unwrap());
    }

    // Every one of our jobs was claimed, and none more than once
    let ours_claimed: Vec<&Uuid> = seen.iter().filter(|id| ours.contains(id)).collect();
    assert_eq!(ours_claimed.len(), 20);
    let distinct: HashSet<&&Uuid> = ours_claimed.iter().collect();
    assert_eq!(distinct.len(), 20);

    for id in &ours {
        let job = jobs::get(store.pool(), *id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.attempts, 1);
    }
}

#[tokio::test]
async fn test_expired_lease_is_reclaimable() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: ENGRAM_TEST_DB_URL not set");
        return;
    };
    let _guard = db_lock().lock().await;

    let enqueued = jobs::enqueue(
        store.pool(),
        "turn_summary",
        json!({}),
        5,
        Some(&unique("lease")),
        10,
    )
    .await
    .unwrap();

    // Claim with a very short lease and never complete
    let claimed = claim_until(&store, enqueued.job_id).await;
    assert_eq!(claimed.status, JobStatus::Processing);
    assert_eq!(claimed.attempts, 1);

    // Before expiry the job is held
    let held = jobs::get(store.pool(), enqueued.job_id).await.unwrap().unwrap();
    assert_eq!(held.status, JobStatus::Processing);

    // Force the lease into the past, then reap
    sqlx::query("UPDATE jobs SET locked_until = now() - interval '1 second' WHERE id = $1")
        .bind(enqueued.job_id)
        .execute(store.pool())
        .await
        .unwrap();
    let reaped = jobs::reap_expired(store.pool()).await.unwrap();
    assert!(reaped >= 1);

    let revived = jobs::get(store.pool(), enqueued.job_id).await.unwrap().unwrap();
    assert_eq!(revived.status, JobStatus::Retry);
    assert!(revived.locked_until.is_none());

    // And it can be claimed again
    let reclaimed = claim_until(&store, enqueued.job_id).await;
    assert_eq!(reclaimed.attempts, 2);
    jobs::complete(store.pool(), reclaimed.id).await.unwrap();
}

#[tokio::test]
async fn test_fail_moves_to_retry_then_failed() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: ENGRAM_TEST_DB_URL not set");
        return;
    };
    let _guard = db_lock().lock().await;

    let enqueued = jobs::enqueue(
        store.pool(),
        "turn_summary",
        json!({}),
        5,
        Some(&unique("fail")),
        2,
    )
    .await
    .unwrap();

    let claimed = claim_until(&store, enqueued.job_id).await;
    jobs::fail(store.pool(), claimed.id, "first failure", 3600)
        .await
        .unwrap();

    let retrying = jobs::get(store.pool(), enqueued.job_id).await.unwrap().unwrap();
    assert_eq!(retrying.status, JobStatus::Retry);
    assert_eq!(retrying.error_message.as_deref(), Some("first failure"));
    assert!(retrying.locked_until.is_some());

    // Make it claimable immediately and exhaust attempts
    sqlx::query("UPDATE jobs SET locked_until = NULL WHERE id = $1")
        .bind(enqueued.job_id)
        .execute(store.pool())
        .await
        .unwrap();
    let claimed = claim_until(&store, enqueued.job_id).await;
    assert_eq!(claimed.attempts, 2);
    jobs::fail(store.pool(), claimed.id, "second failure", 3600)
        .await
        .unwrap();

    let dead = jobs::get(store.pool(), enqueued.job_id).await.unwrap().unwrap();
    assert_eq!(dead.status, JobStatus::Failed);
    assert_eq!(dead.error_message.as_deref(), Some("second failure"));
}

// ============================================
// Recording
// ============================================

#[tokio::test]
async fn test_recording_is_idempotent() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: ENGRAM_TEST_DB_URL not set");
        return;
    };
    let _guard = db_lock().lock().await;

    let session_id = unique("session");
    let transcript = fixture_path("with-tool-error.jsonl");
    let transcript_str = transcript.to_string_lossy();

    let first = recorder::record_session(&store, &session_id, &transcript_str, "/home/dev/auth")
        .await
        .unwrap();
    assert_eq!(first.turns_recorded, 3);
    assert_eq!(first.turns_skipped, 0);

    let config = Config::default();
    let enqueued_first = recorder::enqueue_followups(&store, &config.worker, &first)
        .await
        .unwrap();
    assert!(enqueued_first > 0);

    // Byte-for-byte re-ingest: no new rows, no new jobs
    let second = recorder::record_session(&store, &session_id, &transcript_str, "/home/dev/auth")
        .await
        .unwrap();
    assert_eq!(second.turns_recorded, 0);
    assert_eq!(second.turns_skipped, 3);

    let enqueued_second = recorder::enqueue_followups(&store, &config.worker, &second)
        .await
        .unwrap();
    assert_eq!(enqueued_second, 0);

    let session = store.get_session(&session_id).await.unwrap().unwrap();
    assert_eq!(session.turn_count, 3);
    let turns = store.turns_with_content(session.id).await.unwrap();
    assert_eq!(turns.len(), 3);

    // Hashes are stable across both passes
    for entry in &turns {
        assert_eq!(entry.turn.content_hash.len(), 64);
    }

    // Drain what we enqueued so later tests see a quiet queue
    while let Some(job) = jobs::claim(store.pool(), 60.0).await.unwrap() {
        jobs::complete(store.pool(), job.id).await.unwrap();
    }
}

#[tokio::test]
async fn test_cold_pipeline_end_to_end() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: ENGRAM_TEST_DB_URL not set");
        return;
    };
    let _guard = db_lock().lock().await;

    let session_id = unique("session");
    let transcript = fixture_path("with-tool-error.jsonl");

    recorder::enqueue_session_recording(
        &store,
        &session_id,
        &transcript.to_string_lossy(),
        "/home/dev/auth",
    )
    .await
    .unwrap();

    let config = Config::default();
    let worker = Worker::new(store.clone(), config, Arc::new(UnavailableModel));
    worker.process_available(100).await.unwrap();

    // One session, three turns
    let session = store.get_session(&session_id).await.unwrap().unwrap();
    assert_eq!(session.turn_count, 3);
    assert!(session.is_processed);
    assert!(session.summary.is_some());

    let turns = store.turns_with_content(session.id).await.unwrap();
    assert_eq!(turns.len(), 3);

    // Summaries exist for every turn (truncation fallback, no model)
    for entry in &turns {
        assert!(entry.turn.assistant_summary.is_some());
    }

    // One error artifact, on the third turn
    let last = &turns[2];
    let artifacts = store.artifacts_for_turn(last.turn.id).await.unwrap();
    let errors: Vec<&TurnArtifact> = artifacts
        .iter()
        .filter(|a| a.artifact_type == ArtifactType::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].artifact_value.contains("AttributeError"));

    for entry in &turns[..2] {
        let artifacts = store.artifacts_for_turn(entry.turn.id).await.unwrap();
        assert!(artifacts
            .iter()
            .all(|a| a.artifact_type != ArtifactType::Error));
    }

    // Content summary columns were filled in
    let last_content = last.content.as_ref().unwrap();
    assert_eq!(last_content.commands_run, vec!["pytest tests/test_login.py"]);
    assert_eq!(last_content.errors_encountered.len(), 1);
}

// ============================================
// Retrieval
// ============================================

#[tokio::test]
async fn test_focus_item_for_matched_project_without_history() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: ENGRAM_TEST_DB_URL not set");
        return;
    };
    let _guard = db_lock().lock().await;

    let slug = unique("simon");
    store.create_project(&slug, &slug).await.unwrap();

    let classifier = Classifier::load(&store).await.unwrap();
    let signal = classifier.classify(&format!("continue {} refactor", slug));

    assert_eq!(signal.projects.len(), 1);
    assert_eq!(signal.projects[0].name, slug);
    assert_eq!(signal.intent, Intent::Continuation);

    // Focus surfaces even with no prior turns
    let retriever = Retriever::new(&store);
    let items = retriever
        .retrieve(&signal, None, Duration::from_millis(1500))
        .await;

    let focus: Vec<_> = items
        .iter()
        .filter(|i| i.kind == engram_core::context::ContextKind::Focus)
        .collect();
    assert_eq!(focus.len(), 1);
    assert_eq!(focus[0].title, slug);
}

#[tokio::test]
async fn test_task_and_error_retrieval_with_formatting() {
    let Some(store) = test_store().await else {
        eprintln!("skipping: ENGRAM_TEST_DB_URL not set");
        return;
    };
    let _guard = db_lock().lock().await;

    let slug = unique("auth");
    let project = store.create_project(&slug, &slug).await.unwrap();

    store
        .create_task(
            Some(project.id),
            "fix login",
            TaskStatus::InProgress,
            TaskPriority::High,
            None,
            None,
            true,
        )
        .await
        .unwrap();

    // A recent turn whose files and error artifact touch /src/login.py
    let session_id = unique("session");
    let session = store
        .upsert_session(&session_id, "/tmp/none.jsonl", "/home/dev/auth")
        .await
        .unwrap();
    let turn_ids = store
        .insert_turns(
            session.id,
            &[NewTurn {
                turn_number: 0,
                user_message: Some("debug the login failure".to_string()),
                assistant_text: Some("Found a null user in the session lookup".to_string()),
                content_hash: "a".repeat(64),
                model_name: None,
                tool_names: vec!["Bash".to_string()],
                started_at: Some(chrono::Utc::now()),
                ended_at: Some(chrono::Utc::now()),
                raw_jsonl: "{}".to_string(),
            }],
            1,
        )
        .await
        .unwrap();

    let error_value = "AttributeError: 'NoneType' object has no attribute 'user'";
    store
        .replace_turn_artifacts(
            turn_ids[0],
            &[TurnArtifact {
                turn_id: turn_ids[0],
                artifact_type: ArtifactType::Error,
                artifact_value: error_value.to_string(),
                metadata: json!({}),
            }],
            &["/src/login.py".to_string()],
            &[],
            &[error_value.to_string()],
            1,
        )
        .await
        .unwrap();

    let classifier = Classifier::load(&store).await.unwrap();
    let signal = classifier.classify(&format!("fix the {} bug in /src/login.py", slug));
    assert_eq!(signal.projects.len(), 1);
    assert_eq!(signal.paths, vec!["/src/login.py"]);

    let retriever = Retriever::new(&store);
    let items = retriever
        .retrieve(&signal, None, Duration::from_millis(1500))
        .await;

    let output = format_context(&items, 1500, chrono::Utc::now());
    assert!(output.contains("[Task] fix login"), "output: {output}");
    assert!(output.contains("[Error] AttributeError"), "output: {output}");

    // The pinned high-priority task outranks the error
    let task_pos = output.find("[Task] fix login").unwrap();
    let error_pos = output.find("[Error] AttributeError").unwrap();
    assert!(task_pos < error_pos);
}
