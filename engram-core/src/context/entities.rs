//! Entity linking and project selection
//!
//! Linking scans a turn's text for known project slugs/names and person
//! names (the classifier's matching) and materializes TurnEntity rows.
//!
//! Project selection answers "which project is this workspace about":
//! an explicit selection in a local JSON state file wins (per-workspace
//! override, then global), falling back to the project most associated
//! with the workspace's recorded sessions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::Config;
use crate::context::classifier::Classifier;
use crate::db::Store;
use crate::error::Result;
use crate::types::{EntityType, Project, TurnEntity};

/// Scan a turn's user and assistant text and store entity mentions.
///
/// Replaces any prior mentions for the turn, so re-running is idempotent.
/// Returns the number of entities linked.
pub async fn link_turn_entities(
    store: &Store,
    classifier: &Classifier,
    turn_id: Uuid,
) -> Result<usize> {
    let Some(turn) = store.get_turn(turn_id).await? else {
        tracing::warn!(%turn_id, "Turn not found, skipping entity extraction");
        return Ok(0);
    };
    let content = store.get_turn_content(turn_id).await?;

    let mut text = turn.user_message.unwrap_or_default();
    if let Some(assistant_text) = content.and_then(|c| c.assistant_text) {
        text.push('\n');
        text.push_str(&assistant_text);
    }
    if text.trim().is_empty() {
        return Ok(0);
    }

    let signal = classifier.classify(&text);

    let mut entities: Vec<TurnEntity> = Vec::new();
    for m in &signal.projects {
        entities.push(TurnEntity {
            turn_id,
            entity_type: EntityType::Project,
            entity_id: Some(m.id),
            entity_name: m.name.clone(),
            confidence: m.confidence,
        });
    }
    for m in &signal.people {
        entities.push(TurnEntity {
            turn_id,
            entity_type: EntityType::Person,
            entity_id: Some(m.id),
            entity_name: m.name.clone(),
            confidence: m.confidence,
        });
    }

    store.replace_turn_entities(turn_id, &entities).await?;
    Ok(entities.len())
}

// ============================================
// Project selection state
// ============================================

/// Selection state persisted in the config directory.
#[derive(Debug, Serialize, Deserialize, Default)]
struct SelectionState {
    global: Option<String>,
    #[serde(default)]
    workspaces: HashMap<String, String>,
}

fn state_path() -> PathBuf {
    Config::config_dir().join("active_project.json")
}

fn read_state(path: &Path) -> SelectionState {
    let Ok(content) = std::fs::read_to_string(path) else {
        return SelectionState::default();
    };
    serde_json::from_str(&content).unwrap_or_default()
}

fn write_state(path: &Path, state: &SelectionState) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(state)? + "\n")?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn selected_slug_in(path: &Path, workspace: Option<&str>) -> Option<String> {
    let state = read_state(path);
    if let Some(workspace) = workspace {
        if let Some(slug) = state.workspaces.get(workspace) {
            return Some(slug.clone());
        }
    }
    state.global
}

/// The explicitly selected project slug: per-workspace override, then
/// global.
pub fn selected_slug(workspace: Option<&str>) -> Option<String> {
    selected_slug_in(&state_path(), workspace)
}

/// Set the active project, per-workspace when a workspace is given.
pub fn set_selected(slug: &str, workspace: Option<&str>) -> Result<()> {
    let path = state_path();
    let mut state = read_state(&path);
    match workspace {
        Some(workspace) => {
            state
                .workspaces
                .insert(workspace.to_string(), slug.to_string());
        }
        None => state.global = Some(slug.to_string()),
    }
    write_state(&path, &state)?;
    tracing::info!(slug, ?workspace, "Active project set");
    Ok(())
}

/// Clear the active project selection.
pub fn clear_selected(workspace: Option<&str>) -> Result<()> {
    let path = state_path();
    let mut state = read_state(&path);
    match workspace {
        Some(workspace) => {
            state.workspaces.remove(workspace);
        }
        None => state.global = None,
    }
    write_state(&path, &state)
}

/// Resolve the selected project for a workspace: explicit selection first,
/// then the most-associated project from recorded sessions.
pub async fn selected_project(store: &Store, workspace: &str) -> Result<Option<Project>> {
    if let Some(slug) = selected_slug(Some(workspace)) {
        if let Some(project) = store.project_by_slug(&slug).await? {
            return Ok(Some(project));
        }
    }
    store.selected_project_for_workspace(workspace).await
}

/// Link a session to its workspace's project: explicit selection, then the
/// workspace directory name as a slug.
pub async fn link_session_to_project(
    store: &Store,
    session_uuid: Uuid,
    workspace: &str,
) -> Result<Option<String>> {
    let dir_name = Path::new(workspace)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_lowercase());

    let slug = match selected_slug(Some(workspace)).or(dir_name) {
        Some(slug) if !slug.is_empty() => slug,
        _ => return Ok(None),
    };

    let Some(project) = store.project_by_slug(&slug).await? else {
        return Ok(None);
    };

    if store.link_session_project(session_uuid, project.id).await? {
        tracing::info!(%session_uuid, slug = %project.slug, "Linked session to project");
        Ok(Some(project.slug))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active_project.json");

        let mut state = SelectionState {
            global: Some("simon".to_string()),
            workspaces: HashMap::new(),
        };
        state
            .workspaces
            .insert("/home/dev/auth".to_string(), "auth".to_string());
        write_state(&path, &state).unwrap();

        // Workspace override beats global
        assert_eq!(
            selected_slug_in(&path, Some("/home/dev/auth")).as_deref(),
            Some("auth")
        );
        // Unknown workspace falls back to global
        assert_eq!(
            selected_slug_in(&path, Some("/somewhere/else")).as_deref(),
            Some("simon")
        );
        assert_eq!(selected_slug_in(&path, None).as_deref(), Some("simon"));
    }

    #[test]
    fn test_missing_state_file_is_empty_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert_eq!(selected_slug_in(&path, None), None);
    }

    #[test]
    fn test_corrupt_state_file_is_empty_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active_project.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(selected_slug_in(&path, Some("/ws")), None);
    }
}
