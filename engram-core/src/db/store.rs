//! Typed data-access layer over PostgreSQL.
//!
//! All writes that touch a single aggregate root (session + turns, turn +
//! content + artifacts + entities) run in one transaction. Reads return
//! `Option` for not-found; `Err` is reserved for infrastructure failures.
//!
//! Hot-path queries (retrieval candidates) are hand-written SQL kept here so
//! the retriever stays free of row plumbing.

use crate::error::Result;
use crate::types::*;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

/// A turn produced by the transcript parser, ready for insertion.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub turn_number: i32,
    pub user_message: Option<String>,
    pub assistant_text: Option<String>,
    pub content_hash: String,
    pub model_name: Option<String>,
    pub tool_names: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub raw_jsonl: String,
}

/// Lightweight project reference for classifier prefetch.
#[derive(Debug, Clone)]
pub struct ProjectRef {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
}

/// Lightweight person reference for classifier prefetch.
#[derive(Debug, Clone)]
pub struct PersonRef {
    pub id: Uuid,
    pub name: String,
}

/// Candidate row for the conversation retrieval branch.
#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub turn_id: Uuid,
    pub title: Option<String>,
    pub assistant_summary: Option<String>,
    pub user_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub project_id: Option<Uuid>,
    /// Distinct signal entities mentioned by this turn
    pub entity_hits: i64,
    /// Signal paths touched by this turn
    pub path_hits: i64,
}

/// Candidate row for the commitment retrieval branch.
#[derive(Debug, Clone)]
pub struct CommitmentRow {
    pub commitment: Commitment,
    pub person_name: Option<String>,
}

/// Candidate row for the error retrieval branch.
#[derive(Debug, Clone)]
pub struct ErrorRow {
    pub artifact_id: Uuid,
    pub turn_id: Uuid,
    pub artifact_value: String,
    pub turn_title: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub project_id: Option<Uuid>,
    pub signal_hits: i64,
}

/// A turn joined with its content payload.
#[derive(Debug, Clone)]
pub struct TurnWithContent {
    pub turn: Turn,
    pub content: Option<TurnContent>,
}

/// Database handle wrapping a connection pool.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to PostgreSQL and build the pool.
    pub async fn connect(db_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(db_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (used by tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the schema.
    pub async fn migrate(&self) -> Result<()> {
        super::schema::run_migrations(&self.pool).await
    }

    /// The underlying pool, for the job queue functions.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ============================================
    // Sessions
    // ============================================

    /// Insert or refresh a session shell keyed on the external id.
    pub async fn upsert_session(
        &self,
        session_id: &str,
        transcript_path: &str,
        workspace_path: &str,
    ) -> Result<Session> {
        let row = sqlx::query(
            r#"
            INSERT INTO sessions (session_id, transcript_path, workspace_path)
            VALUES ($1, $2, $3)
            ON CONFLICT (session_id) DO UPDATE
            SET transcript_path = EXCLUDED.transcript_path,
                workspace_path = COALESCE(NULLIF(EXCLUDED.workspace_path, ''), sessions.workspace_path),
                updated_at = now()
            RETURNING id, session_id, transcript_path, workspace_path, title, summary,
                      started_at, last_activity_at, project_id, turn_count, is_processed
            "#,
        )
        .bind(session_id)
        .bind(transcript_path)
        .bind(workspace_path)
        .fetch_one(&self.pool)
        .await?;

        Ok(row_to_session(&row))
    }

    /// Look up a session by its external id.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT id, session_id, transcript_path, workspace_path, title, summary,
                   started_at, last_activity_at, project_id, turn_count, is_processed
            FROM sessions WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_session(&r)))
    }

    /// Set session title/summary and mark it processed.
    pub async fn set_session_summary(&self, id: Uuid, title: &str, summary: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET title = $2, summary = $3, is_processed = TRUE, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Link a session to a project unless already linked.
    pub async fn link_session_project(&self, id: Uuid, project_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET project_id = $2, updated_at = now() \
             WHERE id = $1 AND project_id IS NULL",
        )
        .bind(id)
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Turns
    // ============================================

    /// Content hashes of existing turns, keyed by turn number.
    pub async fn turn_hashes(&self, session_id: Uuid) -> Result<Vec<(i32, String)>> {
        let rows =
            sqlx::query("SELECT turn_number, content_hash FROM turns WHERE session_id = $1")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get("turn_number"), r.get("content_hash")))
            .collect())
    }

    /// Insert or replace turns and their content, then refresh the session's
    /// activity fields. One transaction for the whole aggregate.
    ///
    /// Returns the ids of the inserted/updated turns in input order.
    pub async fn insert_turns(
        &self,
        session_id: Uuid,
        turns: &[NewTurn],
        turn_count: i32,
    ) -> Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(turns.len());

        for turn in turns {
            let turn_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO turns (session_id, turn_number, user_message, content_hash,
                                   model_name, tool_names, started_at, ended_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (session_id, turn_number) DO UPDATE
                SET user_message = EXCLUDED.user_message,
                    content_hash = EXCLUDED.content_hash,
                    model_name = EXCLUDED.model_name,
                    tool_names = EXCLUDED.tool_names,
                    started_at = EXCLUDED.started_at,
                    ended_at = EXCLUDED.ended_at,
                    assistant_summary = NULL,
                    title = NULL
                RETURNING id
                "#,
            )
            .bind(session_id)
            .bind(turn.turn_number)
            .bind(&turn.user_message)
            .bind(&turn.content_hash)
            .bind(&turn.model_name)
            .bind(&turn.tool_names)
            .bind(turn.started_at)
            .bind(turn.ended_at)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO turn_content (turn_id, raw_jsonl, assistant_text, content_size)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (turn_id) DO UPDATE
                SET raw_jsonl = EXCLUDED.raw_jsonl,
                    assistant_text = EXCLUDED.assistant_text,
                    content_size = EXCLUDED.content_size,
                    files_touched = '{}',
                    commands_run = '{}',
                    errors_encountered = '{}',
                    tool_call_count = 0
                "#,
            )
            .bind(turn_id)
            .bind(&turn.raw_jsonl)
            .bind(&turn.assistant_text)
            .bind(turn.raw_jsonl.len() as i32)
            .execute(&mut *tx)
            .await?;

            ids.push(turn_id);
        }

        let started_at = turns.iter().filter_map(|t| t.started_at).min();
        let last_activity = turns.iter().filter_map(|t| t.ended_at.or(t.started_at)).max();

        sqlx::query(
            r#"
            UPDATE sessions
            SET started_at = COALESCE(started_at, $2),
                last_activity_at = GREATEST(COALESCE(last_activity_at, $3), $3),
                turn_count = $4,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .bind(started_at)
        .bind(last_activity)
        .bind(turn_count)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ids)
    }

    /// Fetch a single turn.
    pub async fn get_turn(&self, turn_id: Uuid) -> Result<Option<Turn>> {
        let row = sqlx::query(
            r#"
            SELECT id, session_id, turn_number, user_message, assistant_summary, title,
                   content_hash, model_name, tool_names, started_at, ended_at
            FROM turns WHERE id = $1
            "#,
        )
        .bind(turn_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_turn(&r)))
    }

    /// Fetch a turn's content payload.
    pub async fn get_turn_content(&self, turn_id: Uuid) -> Result<Option<TurnContent>> {
        let row = sqlx::query(
            r#"
            SELECT turn_id, raw_jsonl, assistant_text, files_touched, commands_run,
                   errors_encountered, tool_call_count, content_size
            FROM turn_content WHERE turn_id = $1
            "#,
        )
        .bind(turn_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_content(&r)))
    }

    /// Store a generated title/summary for a turn.
    pub async fn set_turn_summary(&self, turn_id: Uuid, title: &str, summary: &str) -> Result<()> {
        sqlx::query("UPDATE turns SET title = $2, assistant_summary = $3 WHERE id = $1")
            .bind(turn_id)
            .bind(title)
            .bind(summary)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All turns of a session with their content, ordered by turn number.
    pub async fn turns_with_content(&self, session_id: Uuid) -> Result<Vec<TurnWithContent>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.session_id, t.turn_number, t.user_message, t.assistant_summary,
                   t.title, t.content_hash, t.model_name, t.tool_names, t.started_at, t.ended_at,
                   c.turn_id AS content_turn_id, c.raw_jsonl, c.assistant_text, c.files_touched,
                   c.commands_run, c.errors_encountered, c.tool_call_count, c.content_size
            FROM turns t
            LEFT JOIN turn_content c ON c.turn_id = t.id
            WHERE t.session_id = $1
            ORDER BY t.turn_number ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let content_turn_id: Option<Uuid> = r.get("content_turn_id");
                TurnWithContent {
                    turn: row_to_turn(r),
                    content: content_turn_id.map(|turn_id| TurnContent {
                        turn_id,
                        raw_jsonl: r.get("raw_jsonl"),
                        assistant_text: r.get("assistant_text"),
                        files_touched: r.get("files_touched"),
                        commands_run: r.get("commands_run"),
                        errors_encountered: r.get("errors_encountered"),
                        tool_call_count: r.get("tool_call_count"),
                        content_size: r.get("content_size"),
                    }),
                }
            })
            .collect())
    }

    // ============================================
    // Entities and artifacts
    // ============================================

    /// Replace a turn's entity mentions and refresh project mention counts.
    ///
    /// Mention counts are recomputed from the turn_entities rows rather
    /// than incremented, so re-running the extraction for a turn (lease
    /// expiry, re-ingestion) cannot double-count a mention.
    pub async fn replace_turn_entities(
        &self,
        turn_id: Uuid,
        entities: &[TurnEntity],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Projects whose counts need refreshing: previously linked to this
        // turn, plus everything mentioned now.
        let mut affected_projects: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT entity_id FROM turn_entities
            WHERE turn_id = $1 AND entity_type = 'project' AND entity_id IS NOT NULL
            "#,
        )
        .bind(turn_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM turn_entities WHERE turn_id = $1")
            .bind(turn_id)
            .execute(&mut *tx)
            .await?;

        for entity in entities {
            sqlx::query(
                r#"
                INSERT INTO turn_entities (turn_id, entity_type, entity_id, entity_name, confidence)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(turn_id)
            .bind(entity.entity_type.as_str())
            .bind(entity.entity_id)
            .bind(&entity.entity_name)
            .bind(entity.confidence)
            .execute(&mut *tx)
            .await?;

            if entity.entity_type == EntityType::Project {
                if let Some(id) = entity.entity_id {
                    if !affected_projects.contains(&id) {
                        affected_projects.push(id);
                    }
                }
            }
        }

        if !affected_projects.is_empty() {
            sqlx::query(
                r#"
                UPDATE projects
                SET mention_count = (
                        SELECT count(*) FROM turn_entities e
                        WHERE e.entity_id = projects.id AND e.entity_type = 'project'
                    ),
                    last_activity = now(),
                    updated_at = now()
                WHERE id = ANY($1)
                "#,
            )
            .bind(&affected_projects)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Replace a turn's artifacts and the content summary columns, in one
    /// transaction.
    pub async fn replace_turn_artifacts(
        &self,
        turn_id: Uuid,
        artifacts: &[TurnArtifact],
        files_touched: &[String],
        commands_run: &[String],
        errors_encountered: &[String],
        tool_call_count: i32,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM turn_artifacts WHERE turn_id = $1")
            .bind(turn_id)
            .execute(&mut *tx)
            .await?;

        for artifact in artifacts {
            sqlx::query(
                r#"
                INSERT INTO turn_artifacts (turn_id, artifact_type, artifact_value, metadata)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(turn_id)
            .bind(artifact.artifact_type.as_str())
            .bind(&artifact.artifact_value)
            .bind(&artifact.metadata)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE turn_content
            SET files_touched = $2, commands_run = $3, errors_encountered = $4,
                tool_call_count = $5
            WHERE turn_id = $1
            "#,
        )
        .bind(turn_id)
        .bind(files_touched)
        .bind(commands_run)
        .bind(errors_encountered)
        .bind(tool_call_count)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Artifacts recorded for a turn.
    pub async fn artifacts_for_turn(&self, turn_id: Uuid) -> Result<Vec<TurnArtifact>> {
        let rows = sqlx::query(
            r#"
            SELECT turn_id, artifact_type, artifact_value, metadata
            FROM turn_artifacts WHERE turn_id = $1 ORDER BY created_at
            "#,
        )
        .bind(turn_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let artifact_type: String = r.get("artifact_type");
                TurnArtifact {
                    turn_id: r.get("turn_id"),
                    artifact_type: artifact_type.parse().unwrap_or(ArtifactType::File),
                    artifact_value: r.get("artifact_value"),
                    metadata: r.get("metadata"),
                }
            })
            .collect())
    }

    // ============================================
    // Projects and people
    // ============================================

    /// Create a project (slug must be unique).
    pub async fn create_project(&self, name: &str, slug: &str) -> Result<Project> {
        let row = sqlx::query(
            r#"
            INSERT INTO projects (name, slug)
            VALUES ($1, $2)
            RETURNING id, name, slug, tier, status, description, mention_count,
                      last_activity, user_pinned, user_priority, user_deadline
            "#,
        )
        .bind(name)
        .bind(slug)
        .fetch_one(&self.pool)
        .await?;

        Ok(row_to_project(&row))
    }

    /// Look up a project by slug.
    pub async fn project_by_slug(&self, slug: &str) -> Result<Option<Project>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, slug, tier, status, description, mention_count,
                   last_activity, user_pinned, user_priority, user_deadline
            FROM projects WHERE slug = $1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_project(&r)))
    }

    /// Active projects for classifier prefetch.
    pub async fn active_projects(&self) -> Result<Vec<ProjectRef>> {
        let rows =
            sqlx::query("SELECT id, slug, name FROM projects WHERE status = 'active'")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .iter()
            .map(|r| ProjectRef {
                id: r.get("id"),
                slug: r.get("slug"),
                name: r.get("name"),
            })
            .collect())
    }

    /// Create a person.
    pub async fn create_person(&self, name: &str, email: Option<&str>) -> Result<Person> {
        let row = sqlx::query(
            r#"
            INSERT INTO people (name, email)
            VALUES ($1, $2)
            RETURNING id, name, email, relationship, organization
            "#,
        )
        .bind(name)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(Person {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            relationship: row.get("relationship"),
            organization: row.get("organization"),
        })
    }

    /// All people for classifier prefetch.
    pub async fn people_refs(&self) -> Result<Vec<PersonRef>> {
        let rows = sqlx::query("SELECT id, name FROM people")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|r| PersonRef {
                id: r.get("id"),
                name: r.get("name"),
            })
            .collect())
    }

    /// The project most associated with a workspace: most sessions, then
    /// most recent activity. The 4.K fallback for the Focus branch.
    pub async fn selected_project_for_workspace(
        &self,
        workspace_path: &str,
    ) -> Result<Option<Project>> {
        let row = sqlx::query(
            r#"
            SELECT p.id, p.name, p.slug, p.tier, p.status, p.description, p.mention_count,
                   p.last_activity, p.user_pinned, p.user_priority, p.user_deadline
            FROM projects p
            JOIN sessions s ON s.project_id = p.id
            WHERE s.workspace_path = $1 AND p.status = 'active'
            GROUP BY p.id
            ORDER BY count(s.id) DESC, max(s.last_activity_at) DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(workspace_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_project(&r)))
    }

    // ============================================
    // Tasks, commitments, sprints
    // ============================================

    /// Create a task.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_task(
        &self,
        project_id: Option<Uuid>,
        title: &str,
        status: TaskStatus,
        priority: TaskPriority,
        assigned_to: Option<Uuid>,
        due_date: Option<chrono::NaiveDate>,
        user_pinned: bool,
    ) -> Result<Task> {
        let row = sqlx::query(
            r#"
            INSERT INTO tasks (project_id, title, status, priority, assigned_to, due_date, user_pinned)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, project_id, title, status, priority, assigned_to, due_date, user_pinned
            "#,
        )
        .bind(project_id)
        .bind(title)
        .bind(status.as_str())
        .bind(priority.as_str())
        .bind(assigned_to)
        .bind(due_date)
        .bind(user_pinned)
        .fetch_one(&self.pool)
        .await?;

        Ok(row_to_task(&row))
    }

    /// Open tasks joined to matched projects or assigned to matched people.
    pub async fn task_candidates(
        &self,
        project_ids: &[Uuid],
        person_ids: &[Uuid],
        limit: i64,
    ) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, title, status, priority, assigned_to, due_date, user_pinned
            FROM tasks
            WHERE status IN ('backlog', 'in_progress', 'waiting')
              AND (project_id = ANY($1) OR assigned_to = ANY($2))
            ORDER BY user_pinned DESC, due_date ASC NULLS LAST, created_at ASC
            LIMIT $3
            "#,
        )
        .bind(project_ids)
        .bind(person_ids)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_task).collect())
    }

    /// Create a commitment.
    pub async fn create_commitment(
        &self,
        person_id: Option<Uuid>,
        project_id: Option<Uuid>,
        direction: CommitmentDirection,
        description: &str,
        deadline: Option<chrono::NaiveDate>,
    ) -> Result<Commitment> {
        let row = sqlx::query(
            r#"
            INSERT INTO commitments (person_id, project_id, direction, description, deadline)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, person_id, project_id, direction, description, deadline, status
            "#,
        )
        .bind(person_id)
        .bind(project_id)
        .bind(direction.as_str())
        .bind(description)
        .bind(deadline)
        .fetch_one(&self.pool)
        .await?;

        Ok(row_to_commitment(&row))
    }

    /// Open commitments touching matched people or projects.
    pub async fn commitment_candidates(
        &self,
        project_ids: &[Uuid],
        person_ids: &[Uuid],
        limit: i64,
    ) -> Result<Vec<CommitmentRow>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.person_id, c.project_id, c.direction, c.description, c.deadline,
                   c.status, p.name AS person_name
            FROM commitments c
            LEFT JOIN people p ON p.id = c.person_id
            WHERE c.status = 'open'
              AND (c.project_id = ANY($1) OR c.person_id = ANY($2))
            ORDER BY c.deadline ASC NULLS LAST
            LIMIT $3
            "#,
        )
        .bind(project_ids)
        .bind(person_ids)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| CommitmentRow {
                commitment: row_to_commitment(r),
                person_name: r.get("person_name"),
            })
            .collect())
    }

    /// Create a sprint.
    pub async fn create_sprint(
        &self,
        project_id: Uuid,
        name: &str,
        priority_boost: f64,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<Sprint> {
        let row = sqlx::query(
            r#"
            INSERT INTO sprints (project_id, name, priority_boost, starts_at, ends_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, project_id, name, priority_boost, starts_at, ends_at, is_active
            "#,
        )
        .bind(project_id)
        .bind(name)
        .bind(priority_boost)
        .bind(starts_at)
        .bind(ends_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row_to_sprint(&row))
    }

    /// Sprints that are active and inside their window right now.
    pub async fn effective_sprints(&self) -> Result<Vec<Sprint>> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, name, priority_boost, starts_at, ends_at, is_active
            FROM sprints
            WHERE is_active = TRUE AND starts_at <= now() AND ends_at >= now()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_sprint).collect())
    }

    // ============================================
    // Retrieval candidates (hot path)
    // ============================================

    /// Turns from the last 14 days whose entities intersect the signal names
    /// or whose touched files intersect the signal paths.
    ///
    /// `entity_names` must be lowercased by the caller.
    pub async fn conversation_candidates(
        &self,
        entity_names: &[String],
        paths: &[String],
        limit: i64,
    ) -> Result<Vec<ConversationRow>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id AS turn_id, t.title, t.assistant_summary, t.user_message,
                   t.started_at, s.project_id,
                   COALESCE((SELECT count(DISTINCT lower(e.entity_name)) FROM turn_entities e
                             WHERE e.turn_id = t.id AND lower(e.entity_name) = ANY($1)), 0) AS entity_hits,
                   COALESCE((SELECT count(*) FROM unnest(COALESCE(c.files_touched, '{}'::text[])) AS f(path)
                             WHERE f.path = ANY($2)), 0) AS path_hits
            FROM turns t
            JOIN sessions s ON s.id = t.session_id
            LEFT JOIN turn_content c ON c.turn_id = t.id
            WHERE t.started_at > now() - interval '14 days'
              AND (
                EXISTS (SELECT 1 FROM turn_entities e
                        WHERE e.turn_id = t.id AND lower(e.entity_name) = ANY($1))
                OR COALESCE(c.files_touched, '{}'::text[]) && $2
              )
            ORDER BY t.started_at DESC
            LIMIT $3
            "#,
        )
        .bind(entity_names)
        .bind(paths)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| ConversationRow {
                turn_id: r.get("turn_id"),
                title: r.get("title"),
                assistant_summary: r.get("assistant_summary"),
                user_message: r.get("user_message"),
                started_at: r.get("started_at"),
                project_id: r.get("project_id"),
                entity_hits: r.get("entity_hits"),
                path_hits: r.get("path_hits"),
            })
            .collect())
    }

    /// Recent error artifacts whose turn intersects the signal.
    pub async fn error_candidates(
        &self,
        entity_names: &[String],
        paths: &[String],
        limit: i64,
    ) -> Result<Vec<ErrorRow>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id AS artifact_id, a.turn_id, a.artifact_value, t.title AS turn_title,
                   t.started_at, s.project_id,
                   GREATEST(
                     COALESCE((SELECT count(*) FROM turn_entities e
                               WHERE e.turn_id = t.id AND lower(e.entity_name) = ANY($1)), 0),
                     COALESCE((SELECT count(*) FROM unnest(COALESCE(c.files_touched, '{}'::text[])) AS f(path)
                               WHERE f.path = ANY($2)), 0)
                   ) AS signal_hits
            FROM turn_artifacts a
            JOIN turns t ON t.id = a.turn_id
            JOIN sessions s ON s.id = t.session_id
            LEFT JOIN turn_content c ON c.turn_id = t.id
            WHERE a.artifact_type = 'error'
              AND t.started_at > now() - interval '14 days'
              AND (
                EXISTS (SELECT 1 FROM turn_entities e
                        WHERE e.turn_id = t.id AND lower(e.entity_name) = ANY($1))
                OR COALESCE(c.files_touched, '{}'::text[]) && $2
              )
            ORDER BY t.started_at DESC
            LIMIT $3
            "#,
        )
        .bind(entity_names)
        .bind(paths)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| ErrorRow {
                artifact_id: r.get("artifact_id"),
                turn_id: r.get("turn_id"),
                artifact_value: r.get("artifact_value"),
                turn_title: r.get("turn_title"),
                started_at: r.get("started_at"),
                project_id: r.get("project_id"),
                signal_hits: r.get("signal_hits"),
            })
            .collect())
    }

    // ============================================
    // Skills
    // ============================================

    /// Record an installed skill.
    pub async fn insert_skill(&self, skill: &SkillRecord) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO skills (name, description, source, source_session_id, installed_path,
                                scope, trigger_keywords, quality_score, content_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&skill.name)
        .bind(&skill.description)
        .bind(skill.source.as_str())
        .bind(&skill.source_session_id)
        .bind(&skill.installed_path)
        .bind(skill.scope.as_str())
        .bind(&skill.trigger_keywords)
        .bind(skill.quality_score)
        .bind(&skill.content_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Find the active skill with a given name and scope.
    pub async fn find_active_skill(
        &self,
        name: &str,
        scope: SkillScope,
    ) -> Result<Option<SkillRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, source, source_session_id, installed_path, scope,
                   trigger_keywords, quality_score, content_hash, is_active
            FROM skills
            WHERE name = $1 AND scope = $2 AND is_active = TRUE
            "#,
        )
        .bind(name)
        .bind(scope.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_skill(&r)))
    }

    /// All active skills, for the retrieval branch.
    pub async fn active_skills(&self) -> Result<Vec<SkillRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, source, source_session_id, installed_path, scope,
                   trigger_keywords, quality_score, content_hash, is_active
            FROM skills WHERE is_active = TRUE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_skill).collect())
    }

    /// Deactivate a skill record; returns whether one was active.
    pub async fn deactivate_skill(&self, name: &str, scope: SkillScope) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE skills SET is_active = FALSE, updated_at = now() \
             WHERE name = $1 AND scope = $2 AND is_active = TRUE",
        )
        .bind(name)
        .bind(scope.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of auto-generated skills created since UTC midnight.
    pub async fn count_auto_skills_today(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM skills \
             WHERE source = 'auto' AND created_at >= date_trunc('day', now())",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Whether an active skill with this content hash already exists.
    pub async fn has_active_skill_with_hash(&self, content_hash: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM skills WHERE content_hash = $1 AND is_active = TRUE",
        )
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Whether a session already produced an active skill.
    pub async fn has_skill_for_session(&self, session_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM skills WHERE source_session_id = $1 AND is_active = TRUE",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}

// ============================================
// Row mapping
// ============================================

fn row_to_session(row: &PgRow) -> Session {
    Session {
        id: row.get("id"),
        session_id: row.get("session_id"),
        transcript_path: row.get("transcript_path"),
        workspace_path: row.get("workspace_path"),
        title: row.get("title"),
        summary: row.get("summary"),
        started_at: row.get("started_at"),
        last_activity_at: row.get("last_activity_at"),
        project_id: row.get("project_id"),
        turn_count: row.get("turn_count"),
        is_processed: row.get("is_processed"),
    }
}

fn row_to_turn(row: &PgRow) -> Turn {
    Turn {
        id: row.get("id"),
        session_id: row.get("session_id"),
        turn_number: row.get("turn_number"),
        user_message: row.get("user_message"),
        assistant_summary: row.get("assistant_summary"),
        title: row.get("title"),
        content_hash: row.get("content_hash"),
        model_name: row.get("model_name"),
        tool_names: row.get("tool_names"),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
    }
}

fn row_to_content(row: &PgRow) -> TurnContent {
    TurnContent {
        turn_id: row.get("turn_id"),
        raw_jsonl: row.get("raw_jsonl"),
        assistant_text: row.get("assistant_text"),
        files_touched: row.get("files_touched"),
        commands_run: row.get("commands_run"),
        errors_encountered: row.get("errors_encountered"),
        tool_call_count: row.get("tool_call_count"),
        content_size: row.get("content_size"),
    }
}

fn row_to_project(row: &PgRow) -> Project {
    let tier: String = row.get("tier");
    let status: String = row.get("status");
    Project {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
        tier: tier.parse().unwrap_or(ProjectTier::Simple),
        status: status.parse().unwrap_or(ProjectStatus::Active),
        description: row.get("description"),
        mention_count: row.get("mention_count"),
        last_activity: row.get("last_activity"),
        user_pinned: row.get("user_pinned"),
        user_priority: row.get("user_priority"),
        user_deadline: row.get("user_deadline"),
    }
}

fn row_to_task(row: &PgRow) -> Task {
    let status: String = row.get("status");
    let priority: String = row.get("priority");
    Task {
        id: row.get("id"),
        project_id: row.get("project_id"),
        title: row.get("title"),
        status: status.parse().unwrap_or(TaskStatus::Backlog),
        priority: priority.parse().unwrap_or(TaskPriority::Normal),
        assigned_to: row.get("assigned_to"),
        due_date: row.get("due_date"),
        user_pinned: row.get("user_pinned"),
    }
}

fn row_to_commitment(row: &PgRow) -> Commitment {
    let direction: String = row.get("direction");
    Commitment {
        id: row.get("id"),
        person_id: row.get("person_id"),
        project_id: row.get("project_id"),
        direction: direction.parse().unwrap_or(CommitmentDirection::FromMe),
        description: row.get("description"),
        deadline: row.get("deadline"),
        status: row.get("status"),
    }
}

fn row_to_sprint(row: &PgRow) -> Sprint {
    Sprint {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        priority_boost: row.get("priority_boost"),
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        is_active: row.get("is_active"),
    }
}

fn row_to_skill(row: &PgRow) -> SkillRecord {
    let source: String = row.get("source");
    let scope: String = row.get("scope");
    SkillRecord {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        source: source.parse().unwrap_or(SkillSource::Manual),
        source_session_id: row.get("source_session_id"),
        installed_path: row.get("installed_path"),
        scope: scope.parse().unwrap_or(SkillScope::Personal),
        trigger_keywords: row.get("trigger_keywords"),
        quality_score: row.get("quality_score"),
        content_hash: row.get("content_hash"),
        is_active: row.get("is_active"),
    }
}
