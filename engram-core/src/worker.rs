//! Background worker
//!
//! Claims jobs from the queue and dispatches them to handlers keyed on the
//! job kind. Runs N parallel claimers; each loop reaps expired leases,
//! claims one job under a lease, and completes or fails it. Handlers are
//! idempotent, so a lease that expires mid-flight only costs a re-run.
//!
//! Graceful shutdown finishes the in-flight job before exiting; an
//! interrupted job's lease expires and another claimer picks it up.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::context::artifacts::extract_artifacts;
use crate::context::classifier::Classifier;
use crate::context::{entities, recorder};
use crate::db::{jobs, Store};
use crate::error::{Error, Result};
use crate::model::ModelService;
use crate::skills::SkillEngine;
use crate::types::{Job, JobKind};

/// How long the prefetched classifier entity lists stay warm.
const CLASSIFIER_CACHE_TTL: Duration = Duration::from_secs(60);

/// The background worker. Cheap to clone; clones share the store pool,
/// the shutdown token, and the classifier cache.
#[derive(Clone)]
pub struct Worker {
    store: Store,
    config: Config,
    model: Arc<dyn ModelService>,
    shutdown: CancellationToken,
    classifier_cache: Arc<tokio::sync::Mutex<Option<(Instant, Arc<Classifier>)>>>,
}

impl Worker {
    pub fn new(store: Store, config: Config, model: Arc<dyn ModelService>) -> Self {
        Self {
            store,
            config,
            model,
            shutdown: CancellationToken::new(),
            classifier_cache: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Token to trigger graceful shutdown from a signal handler.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run claimers until shutdown.
    pub async fn run(&self) -> Result<()> {
        let claimers = self.config.worker.parallelism.clamp(1, 4);
        tracing::info!(claimers, "Worker starting");

        let mut set = JoinSet::new();
        for claimer_id in 0..claimers {
            let worker = self.clone();
            set.spawn(async move { worker.claimer_loop(claimer_id).await });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Claimer task panicked");
            }
        }

        tracing::info!("Worker stopped");
        Ok(())
    }

    /// Process at most `max_jobs` currently-claimable jobs, then return.
    /// Used by the one-shot CLI path.
    pub async fn process_available(&self, max_jobs: usize) -> Result<usize> {
        jobs::reap_expired(self.store.pool()).await?;

        let mut processed = 0usize;
        for _ in 0..max_jobs {
            let lease = self.config.worker.lease_seconds as f64;
            let Some(job) = jobs::claim(self.store.pool(), lease).await? else {
                break;
            };
            self.run_job(&job).await?;
            processed += 1;
        }
        Ok(processed)
    }

    async fn claimer_loop(&self, claimer_id: usize) {
        let base_sleep = Duration::from_secs_f64(self.config.worker.poll_interval_secs.max(0.1));
        let max_sleep = Duration::from_secs_f64(self.config.worker.max_idle_sleep_secs.max(0.1));
        let mut idle_sleep = base_sleep;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            if let Err(e) = jobs::reap_expired(self.store.pool()).await {
                tracing::error!(claimer_id, error = %e, "Lease reaping failed");
            }

            let lease = self.config.worker.lease_seconds as f64;
            match jobs::claim(self.store.pool(), lease).await {
                Ok(Some(job)) => {
                    idle_sleep = base_sleep;
                    if let Err(e) = self.run_job(&job).await {
                        tracing::error!(claimer_id, job_id = %job.id, error = %e, "Job bookkeeping failed");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(idle_sleep) => {}
                    }
                    idle_sleep = (idle_sleep * 2).min(max_sleep);
                }
                Err(e) => {
                    tracing::error!(claimer_id, error = %e, "Claim failed");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(max_sleep) => {}
                    }
                }
            }
        }

        tracing::debug!(claimer_id, "Claimer exiting");
    }

    /// Dispatch one claimed job and record its outcome.
    async fn run_job(&self, job: &Job) -> Result<()> {
        tracing::debug!(job_id = %job.id, kind = %job.kind, attempt = job.attempts, "Dispatching job");

        match self.dispatch(job).await {
            Ok(()) => {
                jobs::complete(self.store.pool(), job.id).await?;
                tracing::info!(job_id = %job.id, kind = %job.kind, "Job completed");
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, kind = %job.kind, error = %e, "Job failed");
                jobs::fail(
                    self.store.pool(),
                    job.id,
                    &e.to_string(),
                    self.config.worker.backoff_ceiling_secs,
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn dispatch(&self, job: &Job) -> Result<()> {
        let kind: JobKind = job
            .kind
            .parse()
            .map_err(|e: String| Error::Parse(e))?;

        match kind {
            JobKind::SessionProcess => self.handle_session_process(job).await,
            JobKind::TurnSummary => self.handle_turn_summary(job).await,
            JobKind::EntityExtract => self.handle_entity_extract(job).await,
            JobKind::ArtifactExtract => self.handle_artifact_extract(job).await,
            JobKind::SessionSummary => self.handle_session_summary(job).await,
            JobKind::SkillExtract => self.handle_skill_extract(job).await,
        }
    }

    // ============================================
    // Handlers
    // ============================================

    async fn handle_session_process(&self, job: &Job) -> Result<()> {
        let session_id = payload_str(job, "session_id")?;
        let transcript_path = payload_str(job, "transcript_path")?;
        let workspace_path = job
            .payload
            .get("workspace_path")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let outcome =
            recorder::record_session(&self.store, &session_id, &transcript_path, workspace_path)
                .await?;

        if !workspace_path.is_empty() {
            entities::link_session_to_project(&self.store, outcome.session_uuid, workspace_path)
                .await?;
        }

        recorder::enqueue_followups(&self.store, &self.config.worker, &outcome).await?;
        Ok(())
    }

    async fn handle_turn_summary(&self, job: &Job) -> Result<()> {
        let turn_id = payload_uuid(job, "turn_id")?;

        let Some(turn) = self.store.get_turn(turn_id).await? else {
            tracing::warn!(%turn_id, "Turn not found, skipping summary");
            return Ok(());
        };
        if turn.assistant_summary.is_some() {
            return Ok(());
        }

        let user_message = turn.user_message.unwrap_or_default();
        let assistant_text = self
            .store
            .get_turn_content(turn_id)
            .await?
            .and_then(|c| c.assistant_text)
            .unwrap_or_default();

        let fallback_chars = self.config.context.summary_fallback_chars;

        // Short exchanges don't need the model
        if user_message.len() < 50 {
            let title = truncate_chars(&user_message, 80);
            let summary = truncate_chars(&user_message, fallback_chars);
            self.store
                .set_turn_summary(turn_id, &title, &summary)
                .await?;
            return Ok(());
        }

        let (title, summary) = match self.model.summarize_turn(&user_message, &assistant_text).await
        {
            Ok(generated) => (generated.title, generated.summary),
            Err(e) => {
                tracing::debug!(%turn_id, error = %e, "Model summary failed, using truncation");
                (
                    truncate_chars(&user_message, 80),
                    truncate_chars(&user_message, fallback_chars),
                )
            }
        };

        self.store.set_turn_summary(turn_id, &title, &summary).await
    }

    async fn handle_entity_extract(&self, job: &Job) -> Result<()> {
        let turn_id = payload_uuid(job, "turn_id")?;
        let classifier = self.classifier().await?;
        let linked = entities::link_turn_entities(&self.store, &classifier, turn_id).await?;
        tracing::debug!(%turn_id, linked, "Entities linked");
        Ok(())
    }

    async fn handle_artifact_extract(&self, job: &Job) -> Result<()> {
        let turn_id = payload_uuid(job, "turn_id")?;

        let Some(content) = self.store.get_turn_content(turn_id).await? else {
            tracing::warn!(%turn_id, "Turn content not found, skipping artifacts");
            return Ok(());
        };

        let extracted = extract_artifacts(
            turn_id,
            &content.raw_jsonl,
            self.config.context.record_full_commands,
        );

        self.store
            .replace_turn_artifacts(
                turn_id,
                &extracted.artifacts,
                &extracted.files_touched,
                &extracted.commands_run,
                &extracted.errors_encountered,
                extracted.tool_call_count,
            )
            .await?;

        tracing::debug!(
            %turn_id,
            artifacts = extracted.artifacts.len(),
            files = extracted.files_touched.len(),
            commands = extracted.commands_run.len(),
            errors = extracted.errors_encountered.len(),
            "Artifacts extracted"
        );
        Ok(())
    }

    async fn handle_session_summary(&self, job: &Job) -> Result<()> {
        let session_id = payload_str(job, "session_id")?;

        let Some(session) = self.store.get_session(&session_id).await? else {
            tracing::warn!(session_id, "Session not found, skipping summary");
            return Ok(());
        };

        let turns = self.store.turns_with_content(session.id).await?;
        let parts: Vec<String> = turns
            .iter()
            .filter_map(|entry| {
                entry.turn.title.clone().or_else(|| {
                    entry
                        .turn
                        .user_message
                        .as_deref()
                        .filter(|m| !m.is_empty())
                        .map(|m| truncate_chars(m, 80))
                })
            })
            .collect();

        if parts.is_empty() {
            return Ok(());
        }

        let title = truncate_chars(&parts[0], 100);
        let summary = truncate_chars(&parts.join("; "), 500);
        self.store
            .set_session_summary(session.id, &title, &summary)
            .await
    }

    async fn handle_skill_extract(&self, job: &Job) -> Result<()> {
        let session_id = payload_str(job, "session_id")?;

        // Jobs can arrive out of order; wait for the summary pass.
        let Some(session) = self.store.get_session(&session_id).await? else {
            tracing::warn!(session_id, "Session not found, skipping skill extraction");
            return Ok(());
        };
        if !session.is_processed {
            return Err(Error::Parse(format!(
                "session {} not yet summarized",
                session_id
            )));
        }

        let engine = SkillEngine::new(
            self.store.clone(),
            self.config.clone(),
            self.model.clone(),
        );
        let outcome = engine.extract_for_session(&session_id).await?;
        tracing::info!(session_id, ?outcome, "Skill extraction finished");
        Ok(())
    }

    /// Classifier with prefetched entities, cached on a short TTL.
    async fn classifier(&self) -> Result<Arc<Classifier>> {
        let mut cache = self.classifier_cache.lock().await;
        if let Some((loaded_at, classifier)) = cache.as_ref() {
            if loaded_at.elapsed() < CLASSIFIER_CACHE_TTL {
                return Ok(classifier.clone());
            }
        }

        let classifier = Arc::new(Classifier::load(&self.store).await?);
        *cache = Some((Instant::now(), classifier.clone()));
        Ok(classifier)
    }
}

fn payload_str(job: &Job, key: &str) -> Result<String> {
    job.payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Parse(format!("job {} payload missing '{}'", job.id, key)))
}

fn payload_uuid(job: &Job, key: &str) -> Result<Uuid> {
    let raw = payload_str(job, key)?;
    raw.parse()
        .map_err(|_| Error::Parse(format!("job {} payload '{}' is not a uuid", job.id, key)))
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_with_payload(payload: serde_json::Value) -> Job {
        Job {
            id: Uuid::new_v4(),
            kind: "turn_summary".to_string(),
            dedupe_key: None,
            payload,
            status: crate::types::JobStatus::Processing,
            priority: 5,
            attempts: 1,
            max_attempts: 10,
            locked_until: None,
            error_message: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_payload_accessors() {
        let turn_id = Uuid::new_v4();
        let job = job_with_payload(json!({ "turn_id": turn_id.to_string() }));
        assert_eq!(payload_uuid(&job, "turn_id").unwrap(), turn_id);
        assert!(payload_str(&job, "missing").is_err());

        let bad = job_with_payload(json!({ "turn_id": "not-a-uuid" }));
        assert!(payload_uuid(&bad, "turn_id").is_err());
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 80), "short");
    }
}
