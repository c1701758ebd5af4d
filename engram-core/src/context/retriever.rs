//! Context retrieval
//!
//! Fans out to the store in parallel, one branch per context kind, under a
//! shared wall-clock deadline. Branches still running at the deadline are
//! cancelled and their partial results discarded, so the returned set is
//! always a subset of the intended set, never stale or wrong.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use crate::context::classifier::Signal;
use crate::context::entities;
use crate::db::Store;
use crate::error::Result;
use crate::types::{CommitmentDirection, Project, SkillRecord, Sprint, TaskPriority};

const CONVERSATION_LIMIT: i64 = 10;
const TASK_LIMIT: i64 = 8;
const COMMITMENT_LIMIT: i64 = 5;
const ERROR_LIMIT: i64 = 5;
const SKILL_LIMIT: usize = 3;

/// The kinds of context that can be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContextKind {
    Focus,
    Conversation,
    Task,
    Commitment,
    Skill,
    Error,
}

impl ContextKind {
    /// The literal tag rendered in front of each item.
    pub fn tag(&self) -> &'static str {
        match self {
            ContextKind::Focus => "Focus",
            ContextKind::Conversation => "Conv",
            ContextKind::Task => "Task",
            ContextKind::Commitment => "Commitment",
            ContextKind::Skill => "Skill",
            ContextKind::Error => "Error",
        }
    }

    /// Group header used by the formatter.
    pub fn header(&self) -> &'static str {
        match self {
            ContextKind::Focus => "Focus",
            ContextKind::Conversation => "Conversations",
            ContextKind::Task => "Tasks",
            ContextKind::Commitment => "Commitments",
            ContextKind::Skill => "Skills",
            ContextKind::Error => "Errors",
        }
    }
}

/// A scored candidate piece of context.
#[derive(Debug, Clone)]
pub struct ContextItem {
    pub kind: ContextKind,
    pub ref_id: String,
    pub title: String,
    pub body: Option<String>,
    /// Short annotation rendered after the title
    pub qualifier: Option<String>,
    pub score: f64,
    /// Timestamp rendered as a relative age
    pub recency: Option<DateTime<Utc>>,
    /// Project this item belongs to, for sprint boosting
    pub project_id: Option<Uuid>,
    pub metadata: serde_json::Value,
}

/// Retrieves scored context candidates for a classified prompt.
pub struct Retriever<'a> {
    store: &'a Store,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Run all branches concurrently under the shared deadline and return
    /// the merged, deduplicated, score-sorted candidates.
    pub async fn retrieve(
        &self,
        signal: &Signal,
        workspace_path: Option<&str>,
        budget: Duration,
    ) -> Vec<ContextItem> {
        let entity_names = signal.entity_names();
        let project_ids: Vec<Uuid> = signal.projects.iter().map(|m| m.id).collect();
        let person_ids: Vec<Uuid> = signal.people.iter().map(|m| m.id).collect();

        let (conversations, tasks, commitments, skills, errors, focus, sprints) = tokio::join!(
            tokio::time::timeout(budget, self.conversations(signal, &entity_names)),
            tokio::time::timeout(budget, self.tasks(&project_ids, &person_ids)),
            tokio::time::timeout(budget, self.commitments(&project_ids, &person_ids)),
            tokio::time::timeout(budget, self.skills(signal)),
            tokio::time::timeout(budget, self.errors(signal, &entity_names)),
            tokio::time::timeout(budget, self.focus(signal, workspace_path)),
            tokio::time::timeout(budget, self.store.effective_sprints()),
        );

        let mut items = Vec::new();
        for (name, branch) in [
            ("conversations", conversations),
            ("tasks", tasks),
            ("commitments", commitments),
            ("skills", skills),
            ("errors", errors),
            ("focus", focus),
        ] {
            match branch {
                Ok(Ok(branch_items)) => items.extend(branch_items),
                Ok(Err(e)) => tracing::warn!(branch = name, error = %e, "Retrieval branch failed"),
                Err(_) => tracing::warn!(branch = name, "Retrieval branch hit the deadline"),
            }
        }

        if let Ok(Ok(sprints)) = sprints {
            apply_sprint_boosts(&mut items, &sprints, Utc::now());
        }

        // Dedup by (kind, ref_id), keeping the higher-scored duplicate
        items.sort_by(|a, b| {
            a.kind
                .cmp(&b.kind)
                .then_with(|| a.ref_id.cmp(&b.ref_id))
                .then_with(|| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        items.dedup_by(|a, b| a.kind == b.kind && a.ref_id == b.ref_id);

        items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        items
    }

    /// Turns whose entities or files intersect the signal, last 14 days.
    async fn conversations(
        &self,
        signal: &Signal,
        entity_names: &[String],
    ) -> Result<Vec<ContextItem>> {
        if entity_names.is_empty() && signal.paths.is_empty() {
            return Ok(vec![]);
        }

        let rows = self
            .store
            .conversation_candidates(entity_names, &signal.paths, CONVERSATION_LIMIT)
            .await?;

        let now = Utc::now();
        Ok(rows
            .into_iter()
            .map(|row| {
                let entity_overlap = fraction(row.entity_hits, entity_names.len());
                let path_overlap = fraction(row.path_hits, signal.paths.len());
                let age_hours = age_hours(row.started_at, now);

                let title = row
                    .title
                    .clone()
                    .unwrap_or_else(|| truncate(row.user_message.as_deref().unwrap_or(""), 60));
                let body = row
                    .assistant_summary
                    .clone()
                    .or_else(|| row.user_message.as_deref().map(|m| truncate(m, 150)));

                ContextItem {
                    kind: ContextKind::Conversation,
                    ref_id: row.turn_id.to_string(),
                    title,
                    body,
                    qualifier: None,
                    score: score_conversation(entity_overlap, path_overlap, age_hours),
                    recency: row.started_at,
                    project_id: row.project_id,
                    metadata: json!({ "entity_hits": row.entity_hits, "path_hits": row.path_hits }),
                }
            })
            .collect())
    }

    /// Open tasks on matched projects or assigned to matched people.
    async fn tasks(&self, project_ids: &[Uuid], person_ids: &[Uuid]) -> Result<Vec<ContextItem>> {
        if project_ids.is_empty() && person_ids.is_empty() {
            return Ok(vec![]);
        }

        let tasks = self
            .store
            .task_candidates(project_ids, person_ids, TASK_LIMIT)
            .await?;

        let today = Utc::now().date_naive();
        Ok(tasks
            .into_iter()
            .map(|task| {
                let days_to_due = task.due_date.map(|d| (d - today).num_days());
                let mut qualifier = task.priority.as_str().to_string();
                if task.user_pinned {
                    qualifier.push_str(", pinned");
                }
                if let Some(due) = task.due_date {
                    qualifier.push_str(&format!(", due {}", due));
                }

                ContextItem {
                    kind: ContextKind::Task,
                    ref_id: task.id.to_string(),
                    title: task.title.clone(),
                    body: None,
                    qualifier: Some(qualifier),
                    score: score_task(task.priority, task.user_pinned, days_to_due),
                    recency: None,
                    project_id: task.project_id,
                    metadata: json!({ "status": task.status.as_str() }),
                }
            })
            .collect())
    }

    /// Open commitments touching matched people or projects.
    async fn commitments(
        &self,
        project_ids: &[Uuid],
        person_ids: &[Uuid],
    ) -> Result<Vec<ContextItem>> {
        if project_ids.is_empty() && person_ids.is_empty() {
            return Ok(vec![]);
        }

        let rows = self
            .store
            .commitment_candidates(project_ids, person_ids, COMMITMENT_LIMIT)
            .await?;

        let today = Utc::now().date_naive();
        Ok(rows
            .into_iter()
            .map(|row| {
                let c = row.commitment;
                let days_to_deadline = c.deadline.map(|d| (d - today).num_days());
                let person = row.person_name.as_deref().unwrap_or("someone");
                let mut qualifier = match c.direction {
                    CommitmentDirection::ToMe => format!("from {}", person),
                    CommitmentDirection::FromMe => format!("owed to {}", person),
                };
                if let Some(deadline) = c.deadline {
                    qualifier.push_str(&format!(", by {}", deadline));
                }

                ContextItem {
                    kind: ContextKind::Commitment,
                    ref_id: c.id.to_string(),
                    title: truncate(&c.description, 60),
                    body: None,
                    qualifier: Some(qualifier),
                    score: score_commitment(c.direction, days_to_deadline),
                    recency: None,
                    project_id: c.project_id,
                    metadata: json!({}),
                }
            })
            .collect())
    }

    /// Installed skills whose tokens overlap the signal keywords.
    async fn skills(&self, signal: &Signal) -> Result<Vec<ContextItem>> {
        let prompt_tokens = prompt_token_set(signal);
        if prompt_tokens.is_empty() {
            return Ok(vec![]);
        }

        let skills = self.store.active_skills().await?;

        let mut scored: Vec<(f64, SkillRecord)> = skills
            .into_iter()
            .filter_map(|skill| {
                let score = score_skill(&skill, &prompt_tokens);
                (score > 0.0).then_some((score, skill))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(SKILL_LIMIT);

        Ok(scored
            .into_iter()
            .map(|(score, skill)| ContextItem {
                kind: ContextKind::Skill,
                ref_id: format!("skill:{}", skill.name),
                title: skill.name.clone(),
                body: Some(skill.description.clone()),
                qualifier: None,
                score,
                recency: None,
                project_id: None,
                metadata: json!({ "path": skill.installed_path }),
            })
            .collect())
    }

    /// Recent error artifacts intersecting the signal, preferring 72 hours.
    async fn errors(&self, signal: &Signal, entity_names: &[String]) -> Result<Vec<ContextItem>> {
        if entity_names.is_empty() && signal.paths.is_empty() {
            return Ok(vec![]);
        }

        let rows = self
            .store
            .error_candidates(entity_names, &signal.paths, ERROR_LIMIT)
            .await?;

        let signal_size = entity_names.len() + signal.paths.len();
        let now = Utc::now();
        Ok(rows
            .into_iter()
            .map(|row| {
                let age = age_hours(row.started_at, now);
                let first_line = row.artifact_value.lines().next().unwrap_or("");

                ContextItem {
                    kind: ContextKind::Error,
                    ref_id: row.artifact_id.to_string(),
                    title: truncate(first_line, 80),
                    body: None,
                    qualifier: row.turn_title.clone(),
                    score: score_error(row.signal_hits, signal_size, age),
                    recency: row.started_at,
                    project_id: row.project_id,
                    metadata: json!({ "turn_id": row.turn_id.to_string() }),
                }
            })
            .collect())
    }

    /// The selected project for the workspace, surfaced as a single item.
    ///
    /// An explicit Signal match wins; otherwise the per-workspace selection
    /// (state file, then most-associated project).
    async fn focus(&self, signal: &Signal, workspace_path: Option<&str>) -> Result<Vec<ContextItem>> {
        let matched = signal
            .projects
            .iter()
            .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal));

        let project: Option<(Project, f64)> = if let Some(matched) = matched {
            self.store
                .project_by_slug(&matched.name)
                .await?
                .map(|p| (p, matched.confidence))
        } else if let Some(workspace) = workspace_path {
            entities::selected_project(self.store, workspace)
                .await?
                .map(|p| (p, 0.0))
        } else {
            None
        };

        Ok(project
            .map(|(project, confidence)| {
                let mut qualifier = format!("{}, {}", project.status.as_str(), project.tier.as_str());
                if let Some(deadline) = project.user_deadline {
                    qualifier.push_str(&format!(", due {}", deadline));
                }

                ContextItem {
                    kind: ContextKind::Focus,
                    ref_id: project.id.to_string(),
                    title: project.name.clone(),
                    body: project.description.clone(),
                    qualifier: Some(qualifier),
                    score: score_focus(project.user_pinned, confidence),
                    recency: project.last_activity,
                    project_id: Some(project.id),
                    metadata: json!({ "slug": project.slug }),
                }
            })
            .into_iter()
            .collect())
    }
}

// ============================================
// Scoring
// ============================================

/// Conversation score: 0.5 entity overlap + 0.3 recency + 0.2 path
/// overlap, with recency decaying on a 48 hour half-scale.
fn score_conversation(entity_overlap: f64, path_overlap: f64, age_hours: f64) -> f64 {
    let recency = (-age_hours / 48.0).exp();
    0.5 * entity_overlap + 0.3 * recency + 0.2 * path_overlap
}

/// Task score: priority weight + pin bonus + due-soon bonus, normalized to
/// [0, 1] by the maximum attainable sum.
fn score_task(priority: TaskPriority, pinned: bool, days_to_due: Option<i64>) -> f64 {
    let pin_bonus = if pinned { 0.2 } else { 0.0 };
    let due_bonus = days_to_due
        .map(|d| ((7.0 - d as f64) / 7.0).clamp(0.0, 1.0) * 0.3)
        .unwrap_or(0.0);
    (priority.weight() + pin_bonus + due_bonus) / 1.5
}

/// Commitment score favors promises made to me with near deadlines.
fn score_commitment(direction: CommitmentDirection, days_to_deadline: Option<i64>) -> f64 {
    let direction_bonus = match direction {
        CommitmentDirection::ToMe => 0.3,
        CommitmentDirection::FromMe => 0.0,
    };
    let deadline_bonus = days_to_deadline
        .map(|d| ((14.0 - d as f64) / 14.0).clamp(0.0, 1.0) * 0.3)
        .unwrap_or(0.0);
    0.4 + direction_bonus + deadline_bonus
}

/// Error score: low base, a recency bump inside 72 hours, and a small
/// overlap term. Capped below strong task scores so stale failures don't
/// outrank live work.
fn score_error(signal_hits: i64, signal_size: usize, age_hours: f64) -> f64 {
    let overlap = fraction(signal_hits, signal_size);
    let recency = if age_hours <= 72.0 {
        0.2
    } else {
        0.2 * (-(age_hours - 72.0) / 72.0).exp()
    };
    0.3 + recency + 0.1 * overlap
}

/// Skill score: Jaccard overlap between the skill's tokens and the prompt's
/// keywords and project slugs, on lowercased tokens.
fn score_skill(skill: &SkillRecord, prompt_tokens: &[String]) -> f64 {
    let mut skill_tokens: Vec<String> = Vec::new();
    for part in skill.name.split(['-', '_']) {
        push_token(&mut skill_tokens, part);
    }
    for part in skill.description.split(|c: char| !c.is_alphanumeric()) {
        push_token(&mut skill_tokens, part);
    }
    for keyword in &skill.trigger_keywords {
        push_token(&mut skill_tokens, keyword);
    }

    if skill_tokens.is_empty() {
        return 0.0;
    }

    let intersection = prompt_tokens
        .iter()
        .filter(|t| skill_tokens.contains(t))
        .count();
    if intersection == 0 {
        return 0.0;
    }
    let union = skill_tokens.len() + prompt_tokens.len() - intersection;
    intersection as f64 / union as f64
}

fn score_focus(pinned: bool, match_confidence: f64) -> f64 {
    let pin_bonus = if pinned { 0.15 } else { 0.0 };
    (0.7 + pin_bonus + 0.15 * match_confidence).min(1.0)
}

/// Multiply scores of items whose project has an effective sprint by that
/// sprint's boost. Ineffective sprints have no effect.
pub fn apply_sprint_boosts(items: &mut [ContextItem], sprints: &[Sprint], now: DateTime<Utc>) {
    for sprint in sprints {
        if !sprint.is_effective(now) {
            continue;
        }
        for item in items.iter_mut() {
            if item.project_id == Some(sprint.project_id) {
                item.score *= sprint.priority_boost;
            }
        }
    }
}

fn prompt_token_set(signal: &Signal) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for keyword in &signal.keywords {
        push_token(&mut tokens, keyword);
    }
    for project in &signal.projects {
        for part in project.name.split('-') {
            push_token(&mut tokens, part);
        }
    }
    tokens
}

fn push_token(tokens: &mut Vec<String>, raw: &str) {
    let token = raw.trim().to_lowercase();
    if token.len() > 2 && !tokens.contains(&token) {
        tokens.push(token);
    }
}

fn fraction(hits: i64, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (hits as f64 / total as f64).clamp(0.0, 1.0)
    }
}

fn age_hours(ts: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    ts.map(|t| (now - t).num_seconds().max(0) as f64 / 3600.0)
        .unwrap_or(f64::MAX / 4.0)
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SkillScope;
    use crate::types::SkillSource;
    use chrono::Duration as ChronoDuration;

    fn item(kind: ContextKind, ref_id: &str, score: f64, project_id: Option<Uuid>) -> ContextItem {
        ContextItem {
            kind,
            ref_id: ref_id.to_string(),
            title: ref_id.to_string(),
            body: None,
            qualifier: None,
            score,
            recency: None,
            project_id,
            metadata: json!({}),
        }
    }

    #[test]
    fn test_conversation_score_weights() {
        // Full overlap, zero age: 0.5 + 0.3 + 0.2
        let full = score_conversation(1.0, 1.0, 0.0);
        assert!((full - 1.0).abs() < 1e-9);

        // Recency decays with age
        let fresh = score_conversation(0.5, 0.0, 0.0);
        let stale = score_conversation(0.5, 0.0, 96.0);
        assert!(fresh > stale);
        assert!((fresh - (0.25 + 0.3)).abs() < 1e-9);
    }

    #[test]
    fn test_task_score_ordering() {
        let urgent_pinned = score_task(TaskPriority::Urgent, true, Some(1));
        let normal_plain = score_task(TaskPriority::Normal, false, None);
        assert!(urgent_pinned > normal_plain);
        assert!(urgent_pinned <= 1.0);
        assert!(normal_plain >= 0.0);

        // Overdue due date maxes the bonus rather than exceeding it
        let overdue = score_task(TaskPriority::Low, false, Some(-10));
        let far = score_task(TaskPriority::Low, false, Some(60));
        assert!(overdue > far);
        assert!(overdue <= 1.0);
    }

    #[test]
    fn test_pinned_high_task_outranks_error() {
        // The S5 shape: a pinned high-priority task must rank above a
        // fresh error artifact.
        let task = score_task(TaskPriority::High, true, None);
        let error = score_error(2, 2, 1.0);
        assert!(task > error, "task {} vs error {}", task, error);
    }

    #[test]
    fn test_commitment_favors_to_me_near_deadline() {
        let to_me_soon = score_commitment(CommitmentDirection::ToMe, Some(2));
        let from_me_far = score_commitment(CommitmentDirection::FromMe, Some(60));
        assert!(to_me_soon > from_me_far);
        assert!(to_me_soon <= 1.0);
    }

    #[test]
    fn test_error_prefers_recent() {
        let recent = score_error(1, 2, 10.0);
        let old = score_error(1, 2, 200.0);
        assert!(recent > old);
        assert!(recent <= 0.6 + 1e-9);
    }

    #[test]
    fn test_skill_jaccard() {
        let skill = SkillRecord {
            id: Uuid::new_v4(),
            name: "deploy-staging".to_string(),
            description: "Deploy the app to staging".to_string(),
            source: SkillSource::Auto,
            source_session_id: None,
            installed_path: "/tmp/SKILL.md".to_string(),
            scope: SkillScope::Personal,
            trigger_keywords: vec!["deploy".to_string(), "staging".to_string()],
            quality_score: None,
            content_hash: "0".repeat(64),
            is_active: true,
        };

        let matching = vec!["deploy".to_string(), "staging".to_string()];
        let unrelated = vec!["parser".to_string()];
        assert!(score_skill(&skill, &matching) > 0.0);
        assert!((score_skill(&skill, &unrelated) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sprint_boost_is_exactly_multiplicative() {
        let project_id = Uuid::new_v4();
        let other_project = Uuid::new_v4();
        let now = Utc::now();

        let sprint = Sprint {
            id: Uuid::new_v4(),
            project_id,
            name: "crunch".to_string(),
            priority_boost: 2.5,
            starts_at: now - ChronoDuration::days(1),
            ends_at: now + ChronoDuration::days(1),
            is_active: true,
        };

        let mut items = vec![
            item(ContextKind::Task, "boosted", 0.4, Some(project_id)),
            item(ContextKind::Task, "other", 0.4, Some(other_project)),
            item(ContextKind::Skill, "no-project", 0.4, None),
        ];

        apply_sprint_boosts(&mut items, &[sprint], now);
        assert!((items[0].score - 1.0).abs() < 1e-9);
        assert!((items[1].score - 0.4).abs() < 1e-9);
        assert!((items[2].score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_ineffective_sprint_has_no_effect() {
        let project_id = Uuid::new_v4();
        let now = Utc::now();

        let expired = Sprint {
            id: Uuid::new_v4(),
            project_id,
            name: "old".to_string(),
            priority_boost: 3.0,
            starts_at: now - ChronoDuration::days(10),
            ends_at: now - ChronoDuration::days(5),
            is_active: true,
        };
        let inactive = Sprint {
            id: Uuid::new_v4(),
            project_id,
            name: "off".to_string(),
            priority_boost: 3.0,
            starts_at: now - ChronoDuration::days(1),
            ends_at: now + ChronoDuration::days(1),
            is_active: false,
        };

        let mut items = vec![item(ContextKind::Task, "t", 0.5, Some(project_id))];
        apply_sprint_boosts(&mut items, &[expired, inactive], now);
        assert!((items[0].score - 0.5).abs() < 1e-9);
    }
}
