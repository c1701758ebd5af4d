//! The skill surface
//!
//! Quality scoring gates which completed sessions become skills;
//! generation synthesizes the document through the model service;
//! installation writes it to disk and records it for retrieval. Manual
//! creation and registry cloning share the same install path.

pub mod generator;
pub mod installer;
pub mod quality;
pub mod registry;

pub use installer::InstalledSkill;
pub use quality::{score_session_quality, SessionSignals};

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::db::Store;
use crate::error::{Error, Result};
use crate::model::{ModelService, SkillRequest};
use crate::types::{SkillRecord, SkillScope, SkillSource};
use uuid::Uuid;

/// Outcome of a skill extraction pass over a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillOutcome {
    /// The session did not pass the quality gate
    Skipped,
    /// An equivalent skill already exists
    Duplicate,
    /// A new skill was installed
    Installed { name: String, path: String },
}

/// Coordinates scoring, generation, and installation.
pub struct SkillEngine {
    store: Store,
    config: Config,
    model: Arc<dyn ModelService>,
}

impl SkillEngine {
    pub fn new(store: Store, config: Config, model: Arc<dyn ModelService>) -> Self {
        Self {
            store,
            config,
            model,
        }
    }

    /// Auto-generation for a completed session.
    ///
    /// Returns an error when the model is unavailable or fails, so the job
    /// retries later; everything that can be decided without the model is
    /// decided first.
    pub async fn extract_for_session(&self, session_id: &str) -> Result<SkillOutcome> {
        let Some(session) = self.store.get_session(session_id).await? else {
            tracing::warn!(session_id, "Session not found for skill extraction");
            return Ok(SkillOutcome::Skipped);
        };

        let Some(candidate) =
            quality::analyze_session(&self.store, &self.config.skills, &session).await?
        else {
            return Ok(SkillOutcome::Skipped);
        };

        // Deferred rather than skipped: the job fails retryably until the
        // model comes back.
        if !self.model.is_available() {
            return Err(Error::Model(
                "model service unavailable, deferring skill generation".to_string(),
            ));
        }

        let draft = self.model.synthesize_skill(&candidate.request).await?;
        let name = generator::validate_skill_name(&draft.name)?;
        let triggers = generator::derive_triggers(&candidate.request, 8);
        let content = generator::render_skill_md(&name, &draft.description, &triggers, &draft.body);

        self.install_and_record(
            &name,
            &draft.description,
            &content,
            &triggers,
            SkillScope::Personal,
            SkillSource::Auto,
            Some(session_id.to_string()),
            Some(candidate.quality_score),
            session.workspace_path.as_deref(),
        )
        .await
    }

    /// Manual creation from a natural-language description. Model failures
    /// surface to the caller.
    pub async fn create_manual(
        &self,
        description: &str,
        scope: SkillScope,
        workspace: Option<&Path>,
        name_override: Option<&str>,
    ) -> Result<SkillOutcome> {
        let request = SkillRequest {
            description: description.to_string(),
            workspace_path: workspace
                .map(|w| w.to_string_lossy().to_string())
                .unwrap_or_default(),
            ..Default::default()
        };

        let draft = self.model.synthesize_skill(&request).await?;
        let name = match name_override {
            Some(name) => generator::validate_skill_name(name)?,
            None => generator::validate_skill_name(&draft.name)?,
        };
        let triggers = generator::derive_triggers(&request, 8);
        let content = generator::render_skill_md(&name, &draft.description, &triggers, &draft.body);

        self.install_and_record(
            &name,
            &draft.description,
            &content,
            &triggers,
            scope,
            SkillSource::Manual,
            None,
            None,
            workspace.and_then(|w| w.to_str()),
        )
        .await
    }

    /// Clone a registry document to the installed path.
    pub async fn install_from_registry(
        &self,
        url: &str,
        scope: SkillScope,
        workspace: Option<&Path>,
    ) -> Result<SkillOutcome> {
        let fetched = registry::fetch_skill(url).await?;
        let name = generator::validate_skill_name(&fetched.name)?;
        let fields = installer::parse_frontmatter(&fetched.content);
        let triggers = fields
            .iter()
            .find(|(k, _)| k == "triggers")
            .map(|(_, v)| installer::parse_triggers(v))
            .unwrap_or_default();

        self.install_and_record(
            &name,
            &fetched.description,
            &fetched.content,
            &triggers,
            scope,
            SkillSource::Registry,
            None,
            None,
            workspace.and_then(|w| w.to_str()),
        )
        .await
    }

    /// Remove a skill from disk and deactivate its record.
    pub async fn remove(
        &self,
        name: &str,
        scope: SkillScope,
        workspace: Option<&Path>,
    ) -> Result<bool> {
        let skills_dir = self.skills_dir(scope, workspace.and_then(|w| w.to_str()));
        let removed = installer::uninstall_skill(&skills_dir, name)?;
        let deactivated = self.store.deactivate_skill(name, scope).await?;
        Ok(removed || deactivated)
    }

    fn skills_dir(&self, scope: SkillScope, workspace: Option<&str>) -> std::path::PathBuf {
        match scope {
            SkillScope::Personal => self.config.personal_skills_dir(),
            SkillScope::Project => {
                let base = workspace
                    .map(Path::new)
                    .unwrap_or_else(|| Path::new("."));
                self.config.project_skills_dir(base)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn install_and_record(
        &self,
        name: &str,
        description: &str,
        content: &str,
        triggers: &[String],
        scope: SkillScope,
        source: SkillSource,
        source_session_id: Option<String>,
        quality_score: Option<f64>,
        workspace: Option<&str>,
    ) -> Result<SkillOutcome> {
        let content_hash = generator::skill_content_hash(content);

        // Same (name, scope) with the same content is a no-op
        if let Some(existing) = self.store.find_active_skill(name, scope).await? {
            if existing.content_hash == content_hash {
                tracing::debug!(name, "Skill unchanged, skipping install");
                return Ok(SkillOutcome::Duplicate);
            }
            self.store.deactivate_skill(name, scope).await?;
        }

        let skills_dir = self.skills_dir(scope, workspace);
        let path = installer::install_skill(&skills_dir, name, content, true)?;

        let record = SkillRecord {
            id: Uuid::nil(),
            name: name.to_string(),
            description: description.to_string(),
            source,
            source_session_id,
            installed_path: path.to_string_lossy().to_string(),
            scope,
            trigger_keywords: triggers.to_vec(),
            quality_score,
            content_hash,
            is_active: true,
        };
        self.store.insert_skill(&record).await?;

        tracing::info!(name, scope = scope.as_str(), source = source.as_str(), "Skill installed");
        Ok(SkillOutcome::Installed {
            name: name.to_string(),
            path: path.to_string_lossy().to_string(),
        })
    }
}
