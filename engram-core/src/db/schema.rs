//! Database schema
//!
//! PostgreSQL DDL applied idempotently at startup. Every statement is
//! `IF NOT EXISTS` so `migrate()` can run on every process start.

use crate::error::Result;
use sqlx::PgPool;

/// DDL statements, one table or index per entry.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS people (
        id            UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        name          TEXT NOT NULL,
        email         TEXT,
        relationship  TEXT,
        organization  TEXT,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_people_email ON people (email)",
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id             UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        name           TEXT NOT NULL,
        slug           TEXT NOT NULL UNIQUE,
        tier           TEXT NOT NULL DEFAULT 'simple'
                       CHECK (tier IN ('fleeting','simple','complex','life_thread')),
        status         TEXT NOT NULL DEFAULT 'active'
                       CHECK (status IN ('active','paused','completed','abandoned')),
        description    TEXT,
        mention_count  INTEGER NOT NULL DEFAULT 0,
        last_activity  TIMESTAMPTZ,
        user_pinned    BOOLEAN NOT NULL DEFAULT FALSE,
        user_priority  TEXT
                       CHECK (user_priority IN ('critical','high','normal','low') OR user_priority IS NULL),
        user_deadline  DATE,
        created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at     TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_projects_status ON projects (status)",
    "CREATE INDEX IF NOT EXISTS idx_projects_pinned ON projects (user_pinned) WHERE user_pinned = TRUE",
    r#"
    CREATE TABLE IF NOT EXISTS sprints (
        id              UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        project_id      UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        name            TEXT NOT NULL,
        priority_boost  DOUBLE PRECISION NOT NULL DEFAULT 2.0 CHECK (priority_boost >= 1.0),
        starts_at       TIMESTAMPTZ NOT NULL,
        ends_at         TIMESTAMPTZ NOT NULL,
        is_active       BOOLEAN NOT NULL DEFAULT TRUE,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sprints_active ON sprints (is_active) WHERE is_active = TRUE",
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id           UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        project_id   UUID REFERENCES projects(id) ON DELETE SET NULL,
        title        TEXT NOT NULL,
        status       TEXT NOT NULL DEFAULT 'backlog'
                     CHECK (status IN ('backlog','in_progress','waiting','done')),
        priority     TEXT NOT NULL DEFAULT 'normal'
                     CHECK (priority IN ('urgent','high','normal','low')),
        assigned_to  UUID REFERENCES people(id) ON DELETE SET NULL,
        due_date     DATE,
        user_pinned  BOOLEAN NOT NULL DEFAULT FALSE,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks (project_id)",
    r#"
    CREATE TABLE IF NOT EXISTS commitments (
        id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        person_id   UUID REFERENCES people(id) ON DELETE SET NULL,
        project_id  UUID REFERENCES projects(id) ON DELETE SET NULL,
        direction   TEXT NOT NULL CHECK (direction IN ('from_me','to_me')),
        description TEXT NOT NULL,
        deadline    DATE,
        status      TEXT NOT NULL DEFAULT 'open'
                    CHECK (status IN ('open','fulfilled','broken','cancelled')),
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_commitments_status ON commitments (status)",
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id               UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        session_id       TEXT NOT NULL UNIQUE,
        transcript_path  TEXT,
        workspace_path   TEXT,
        title            TEXT,
        summary          TEXT,
        started_at       TIMESTAMPTZ,
        last_activity_at TIMESTAMPTZ,
        project_id       UUID REFERENCES projects(id) ON DELETE SET NULL,
        turn_count       INTEGER NOT NULL DEFAULT 0,
        is_processed     BOOLEAN NOT NULL DEFAULT FALSE,
        created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at       TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sessions_workspace ON sessions (workspace_path)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions (project_id)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_unprocessed ON sessions (is_processed) WHERE is_processed = FALSE",
    r#"
    CREATE TABLE IF NOT EXISTS turns (
        id                UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        session_id        UUID NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        turn_number       INTEGER NOT NULL,
        user_message      TEXT,
        assistant_summary TEXT,
        title             TEXT,
        content_hash      TEXT NOT NULL,
        model_name        TEXT,
        tool_names        TEXT[] NOT NULL DEFAULT '{}',
        started_at        TIMESTAMPTZ,
        ended_at          TIMESTAMPTZ,
        created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (session_id, turn_number)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_turns_session ON turns (session_id)",
    "CREATE INDEX IF NOT EXISTS idx_turns_started ON turns (started_at)",
    r#"
    CREATE TABLE IF NOT EXISTS turn_content (
        turn_id             UUID PRIMARY KEY REFERENCES turns(id) ON DELETE CASCADE,
        raw_jsonl           TEXT NOT NULL,
        assistant_text      TEXT,
        files_touched       TEXT[] NOT NULL DEFAULT '{}',
        commands_run        TEXT[] NOT NULL DEFAULT '{}',
        errors_encountered  TEXT[] NOT NULL DEFAULT '{}',
        tool_call_count     INTEGER NOT NULL DEFAULT 0,
        content_size        INTEGER NOT NULL DEFAULT 0,
        created_at          TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS turn_entities (
        id           UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        turn_id      UUID NOT NULL REFERENCES turns(id) ON DELETE CASCADE,
        entity_type  TEXT NOT NULL CHECK (entity_type IN ('project','person')),
        entity_id    UUID,
        entity_name  TEXT NOT NULL,
        confidence   DOUBLE PRECISION NOT NULL DEFAULT 1.0
                     CHECK (confidence >= 0.0 AND confidence <= 1.0),
        created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_turn_entities_turn ON turn_entities (turn_id)",
    "CREATE INDEX IF NOT EXISTS idx_turn_entities_name ON turn_entities (entity_type, entity_name)",
    r#"
    CREATE TABLE IF NOT EXISTS turn_artifacts (
        id             UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        turn_id        UUID NOT NULL REFERENCES turns(id) ON DELETE CASCADE,
        artifact_type  TEXT NOT NULL CHECK (artifact_type IN ('file','command','error')),
        artifact_value TEXT NOT NULL,
        metadata       JSONB NOT NULL DEFAULT '{}',
        created_at     TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_turn_artifacts_turn ON turn_artifacts (turn_id)",
    "CREATE INDEX IF NOT EXISTS idx_turn_artifacts_type ON turn_artifacts (artifact_type)",
    r#"
    CREATE TABLE IF NOT EXISTS skills (
        id                 UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        name               TEXT NOT NULL,
        description        TEXT NOT NULL,
        source             TEXT NOT NULL CHECK (source IN ('auto','manual','registry')),
        source_session_id  TEXT,
        installed_path     TEXT NOT NULL,
        scope              TEXT NOT NULL CHECK (scope IN ('personal','project')),
        trigger_keywords   TEXT[] NOT NULL DEFAULT '{}',
        quality_score      DOUBLE PRECISION,
        content_hash       TEXT NOT NULL,
        is_active          BOOLEAN NOT NULL DEFAULT TRUE,
        created_at         TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at         TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_skills_name_scope ON skills (name, scope) WHERE is_active = TRUE",
    "CREATE INDEX IF NOT EXISTS idx_skills_hash ON skills (content_hash)",
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id            UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        kind          TEXT NOT NULL,
        dedupe_key    TEXT UNIQUE,
        payload       JSONB NOT NULL,
        status        TEXT NOT NULL DEFAULT 'queued'
                      CHECK (status IN ('queued','processing','retry','done','failed')),
        priority      INTEGER NOT NULL DEFAULT 10,
        attempts      INTEGER NOT NULL DEFAULT 0,
        max_attempts  INTEGER NOT NULL DEFAULT 10,
        locked_until  TIMESTAMPTZ,
        error_message TEXT,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_claimable ON jobs (priority, created_at) WHERE status IN ('queued','retry')",
    "CREATE INDEX IF NOT EXISTS idx_jobs_locked ON jobs (locked_until) WHERE status = 'processing'",
];

/// Apply the schema. Safe to run on every start.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!(statements = SCHEMA.len(), "Schema applied");
    Ok(())
}
