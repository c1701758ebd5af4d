//! Core domain types for engram
//!
//! These types mirror the PostgreSQL schema (see [`crate::db::schema`]) and
//! are shared between the hot retrieval path and the cold ingestion path.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | One assistant conversation, identified by its external session id |
//! | **Turn** | One user message plus the contiguous assistant response |
//! | **TurnContent** | The heavy payload of a turn, split off to keep hot queries small |
//! | **Artifact** | A file, command, or error extracted from a turn's tool calls |
//! | **Project** | A long-lived thread of work the developer cares about |
//! | **Sprint** | A time-boxed priority boost for one project |
//! | **Skill** | A reusable procedure document surfaced back into prompts |
//! | **Job** | A durable unit of background work with lease-based locking |

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================
// Sessions and Turns
// ============================================

/// A recorded assistant session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Internal identifier
    pub id: Uuid,
    /// External session id from the assistant (unique)
    pub session_id: String,
    /// Path to the transcript file this session was ingested from
    pub transcript_path: Option<String>,
    /// Working directory of the session
    pub workspace_path: Option<String>,
    /// Generated title (set by session_summary)
    pub title: Option<String>,
    /// Generated summary (set by session_summary)
    pub summary: Option<String>,
    /// When the session started
    pub started_at: Option<DateTime<Utc>>,
    /// Most recent activity timestamp
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Linked project, if any
    pub project_id: Option<Uuid>,
    /// Number of recorded turns
    pub turn_count: i32,
    /// Whether summarization has completed
    pub is_processed: bool,
}

/// One user message plus the contiguous assistant response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    /// Owning session (internal id)
    pub session_id: Uuid,
    /// Position within the session, unique per session
    pub turn_number: i32,
    /// The user's message text
    pub user_message: Option<String>,
    /// Generated one-line summary of the assistant response
    pub assistant_summary: Option<String>,
    /// Generated short title
    pub title: Option<String>,
    /// Deterministic sha256 hex digest over the turn's content
    pub content_hash: String,
    /// Model that produced the response
    pub model_name: Option<String>,
    /// Ordered unique tool names invoked during the turn
    pub tool_names: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// The heavy payload of a turn, stored 1:1 in its own table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnContent {
    pub turn_id: Uuid,
    /// The raw transcript lines making up this turn
    pub raw_jsonl: String,
    /// Concatenated assistant text blocks
    pub assistant_text: Option<String>,
    /// Files read, written, or edited (set by artifact_extract)
    pub files_touched: Vec<String>,
    /// Shell commands run (set by artifact_extract)
    pub commands_run: Vec<String>,
    /// Error messages encountered (set by artifact_extract)
    pub errors_encountered: Vec<String>,
    pub tool_call_count: i32,
    pub content_size: i32,
}

// ============================================
// Entities and Artifacts
// ============================================

/// Kind of entity mentioned in a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Project,
    Person,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Project => "project",
            EntityType::Person => "person",
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(EntityType::Project),
            "person" => Ok(EntityType::Person),
            _ => Err(format!("unknown entity type: {}", s)),
        }
    }
}

/// A project or person mention linked to a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEntity {
    pub turn_id: Uuid,
    pub entity_type: EntityType,
    /// The matched row, when one exists
    pub entity_id: Option<Uuid>,
    pub entity_name: String,
    /// Match confidence in [0, 1]
    pub confidence: f64,
}

/// Kind of artifact extracted from a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    File,
    Command,
    Error,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::File => "file",
            ArtifactType::Command => "command",
            ArtifactType::Error => "error",
        }
    }
}

impl std::str::FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(ArtifactType::File),
            "command" => Ok(ArtifactType::Command),
            "error" => Ok(ArtifactType::Error),
            _ => Err(format!("unknown artifact type: {}", s)),
        }
    }
}

/// A file, command, or error extracted from a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnArtifact {
    pub turn_id: Uuid,
    pub artifact_type: ArtifactType,
    pub artifact_value: String,
    pub metadata: serde_json::Value,
}

// ============================================
// Projects, People, Tasks, Commitments
// ============================================

/// Lifecycle tier of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectTier {
    Fleeting,
    Simple,
    Complex,
    LifeThread,
}

impl ProjectTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectTier::Fleeting => "fleeting",
            ProjectTier::Simple => "simple",
            ProjectTier::Complex => "complex",
            ProjectTier::LifeThread => "life_thread",
        }
    }
}

impl std::str::FromStr for ProjectTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fleeting" => Ok(ProjectTier::Fleeting),
            "simple" => Ok(ProjectTier::Simple),
            "complex" => Ok(ProjectTier::Complex),
            "life_thread" => Ok(ProjectTier::LifeThread),
            _ => Err(format!("unknown project tier: {}", s)),
        }
    }
}

/// Status of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Paused => "paused",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProjectStatus::Active),
            "paused" => Ok(ProjectStatus::Paused),
            "completed" => Ok(ProjectStatus::Completed),
            "abandoned" => Ok(ProjectStatus::Abandoned),
            _ => Err(format!("unknown project status: {}", s)),
        }
    }
}

/// A long-lived thread of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    /// URL-safe identifier (unique)
    pub slug: String,
    pub tier: ProjectTier,
    pub status: ProjectStatus,
    pub description: Option<String>,
    /// How often this project has been mentioned in turns
    pub mention_count: i32,
    pub last_activity: Option<DateTime<Utc>>,
    pub user_pinned: bool,
    pub user_priority: Option<String>,
    pub user_deadline: Option<NaiveDate>,
}

/// A person known to the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub relationship: Option<String>,
    pub organization: Option<String>,
}

/// Status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    InProgress,
    Waiting,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Done => "done",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(TaskStatus::Backlog),
            "in_progress" => Ok(TaskStatus::InProgress),
            "waiting" => Ok(TaskStatus::Waiting),
            "done" => Ok(TaskStatus::Done),
            _ => Err(format!("unknown task status: {}", s)),
        }
    }
}

/// Priority of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Urgent,
    High,
    Normal,
    Low,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Urgent => "urgent",
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
        }
    }

    /// Contribution to the task retrieval score
    pub fn weight(&self) -> f64 {
        match self {
            TaskPriority::Urgent => 1.0,
            TaskPriority::High => 0.75,
            TaskPriority::Normal => 0.5,
            TaskPriority::Low => 0.25,
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urgent" => Ok(TaskPriority::Urgent),
            "high" => Ok(TaskPriority::High),
            "normal" => Ok(TaskPriority::Normal),
            "low" => Ok(TaskPriority::Low),
            _ => Err(format!("unknown task priority: {}", s)),
        }
    }
}

/// A tracked task, optionally attached to a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub title: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Person this task is assigned to
    pub assigned_to: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
    pub user_pinned: bool,
}

/// Direction of a commitment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentDirection {
    /// Something I promised to someone
    FromMe,
    /// Something promised to me
    ToMe,
}

impl CommitmentDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentDirection::FromMe => "from_me",
            CommitmentDirection::ToMe => "to_me",
        }
    }
}

impl std::str::FromStr for CommitmentDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "from_me" => Ok(CommitmentDirection::FromMe),
            "to_me" => Ok(CommitmentDirection::ToMe),
            _ => Err(format!("unknown commitment direction: {}", s)),
        }
    }
}

/// A promise between the developer and another party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    pub id: Uuid,
    pub person_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub direction: CommitmentDirection,
    pub description: String,
    pub deadline: Option<NaiveDate>,
    /// open, fulfilled, broken, or cancelled
    pub status: String,
}

/// A time-boxed priority boost for a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sprint {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    /// Multiplicative score boost, >= 1.0
    pub priority_boost: f64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Sprint {
    /// A sprint is effective iff active and the current instant is inside
    /// its window.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now >= self.starts_at && now <= self.ends_at
    }
}

// ============================================
// Skills
// ============================================

/// Where a skill came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillSource {
    Auto,
    Manual,
    Registry,
}

impl SkillSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillSource::Auto => "auto",
            SkillSource::Manual => "manual",
            SkillSource::Registry => "registry",
        }
    }
}

impl std::str::FromStr for SkillSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(SkillSource::Auto),
            "manual" => Ok(SkillSource::Manual),
            "registry" => Ok(SkillSource::Registry),
            _ => Err(format!("unknown skill source: {}", s)),
        }
    }
}

/// Installation scope of a skill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillScope {
    Personal,
    Project,
}

impl SkillScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillScope::Personal => "personal",
            SkillScope::Project => "project",
        }
    }
}

impl std::str::FromStr for SkillScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(SkillScope::Personal),
            "project" => Ok(SkillScope::Project),
            _ => Err(format!("unknown skill scope: {}", s)),
        }
    }
}

/// An installed skill tracked in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRecord {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub source: SkillSource,
    /// External session id the skill was generated from
    pub source_session_id: Option<String>,
    pub installed_path: String,
    pub scope: SkillScope,
    /// Keywords that surface this skill into context
    pub trigger_keywords: Vec<String>,
    pub quality_score: Option<f64>,
    /// sha256 hex digest of the installed document
    pub content_hash: String,
    pub is_active: bool,
}

// ============================================
// Jobs
// ============================================

/// Status of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Retry,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Retry => "retry",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "retry" => Ok(JobStatus::Retry),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("unknown job status: {}", s)),
        }
    }
}

/// The background work kinds the worker dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    SessionProcess,
    TurnSummary,
    EntityExtract,
    ArtifactExtract,
    SessionSummary,
    SkillExtract,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::SessionProcess => "session_process",
            JobKind::TurnSummary => "turn_summary",
            JobKind::EntityExtract => "entity_extract",
            JobKind::ArtifactExtract => "artifact_extract",
            JobKind::SessionSummary => "session_summary",
            JobKind::SkillExtract => "skill_extract",
        }
    }

    /// Enqueue priority; lower runs earlier.
    pub fn priority(&self) -> i32 {
        match self {
            JobKind::SessionProcess => 1,
            JobKind::TurnSummary => 5,
            JobKind::EntityExtract => 7,
            JobKind::ArtifactExtract => 7,
            JobKind::SessionSummary => 10,
            JobKind::SkillExtract => 20,
        }
    }

    /// Kinds that yield to backpressure when the queue is deep.
    pub fn is_low_priority(&self) -> bool {
        matches!(self, JobKind::SessionSummary | JobKind::SkillExtract)
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session_process" => Ok(JobKind::SessionProcess),
            "turn_summary" => Ok(JobKind::TurnSummary),
            "entity_extract" => Ok(JobKind::EntityExtract),
            "artifact_extract" => Ok(JobKind::ArtifactExtract),
            "session_summary" => Ok(JobKind::SessionSummary),
            "skill_extract" => Ok(JobKind::SkillExtract),
            _ => Err(format!("unknown job kind: {}", s)),
        }
    }
}

/// A durable unit of background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: String,
    pub dedupe_key: Option<String>,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
