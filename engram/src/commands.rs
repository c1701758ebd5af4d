//! CLI command implementations
//!
//! Everything here is a thin wrapper over engram-core; user-actionable
//! failures exit non-zero with a single-line reason.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use engram_core::context::{build_context, entities, recorder, Classifier};
use engram_core::db::jobs;
use engram_core::model::build_model_service;
use engram_core::skills::{installer, SkillEngine, SkillOutcome};
use engram_core::types::SkillScope;
use engram_core::worker::Worker;
use engram_core::{Config, Store};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum SkillCommand {
    /// Generate a new skill from a description
    Create {
        /// What the skill should do
        description: String,
        /// personal or project
        #[arg(long, short, default_value = "personal")]
        scope: String,
        /// Override the generated skill name
        #[arg(long, short)]
        name: Option<String>,
    },
    /// List installed skills
    List {
        /// personal, project, or all
        #[arg(long, short, default_value = "all")]
        scope: String,
    },
    /// Install a skill document from a registry URL
    Install {
        url: String,
        #[arg(long, short, default_value = "personal")]
        scope: String,
    },
    /// Remove an installed skill
    Remove {
        name: String,
        #[arg(long, short, default_value = "personal")]
        scope: String,
    },
}

#[derive(Subcommand)]
pub enum ProjectCommand {
    /// Select the active project, optionally for this workspace only
    Use {
        slug: String,
        #[arg(long)]
        workspace: bool,
    },
    /// Clear the active project selection
    Clear {
        #[arg(long)]
        workspace: bool,
    },
    /// Show the current selection
    Show,
}

async fn connect(config: &Config) -> Result<Store> {
    let store = Store::connect(&config.general.db_url)
        .await
        .context("failed to connect to the database")?;
    store.migrate().await.context("failed to apply the schema")?;
    Ok(store)
}

/// Manual retrieval for testing: print the classification and the packed
/// context block.
pub async fn retrieve_manual(
    config: &Config,
    query: Option<String>,
    cwd: Option<String>,
    tokens: Option<usize>,
) -> Result<()> {
    let Some(query) = query else {
        bail!("usage: engram retrieve --hook (for the assistant) or --query <text>");
    };

    let mut config = config.clone();
    if let Some(tokens) = tokens {
        config.context.max_context_tokens = tokens;
    }

    let store = connect(&config).await?;
    let classifier = Classifier::load(&store).await?;
    let signal = classifier.classify(&query);

    println!("Classification:");
    println!(
        "  projects: {}",
        signal
            .projects
            .iter()
            .map(|m| format!("{} ({:.2})", m.name, m.confidence))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  people:   {}",
        signal
            .people
            .iter()
            .map(|m| m.name.clone())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  paths:    {}", signal.paths.join(", "));
    println!("  intent:   {}", signal.intent.as_str());

    let context = build_context(&store, &config, &query, cwd.as_deref()).await?;
    if context.is_empty() {
        println!("\n(no context selected)");
    } else {
        println!("\n{}", context);
    }
    Ok(())
}

/// Scan the transcript directory and record every session.
pub async fn record_all(config: &Config, all: bool) -> Result<()> {
    if !all {
        bail!("usage: engram record --hook (for the assistant) or --all");
    }

    let Some(sessions_dir) = engram_core::ingest::default_sessions_dir() else {
        bail!("cannot determine the sessions directory");
    };
    if !sessions_dir.exists() {
        bail!("no sessions directory at {}", sessions_dir.display());
    }

    let store = connect(config).await?;
    let transcripts = engram_core::ingest::discover_transcripts(&sessions_dir)?;
    println!("Found {} transcript files", transcripts.len());

    let mut recorded = 0usize;
    let mut skipped = 0usize;
    let mut errors = 0usize;

    for path in &transcripts {
        let session_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        match recorder::record_session(&store, &session_id, &path.to_string_lossy(), "").await {
            Ok(outcome) => {
                recorder::enqueue_followups(&store, &config.worker, &outcome).await?;
                if outcome.turns_recorded > 0 {
                    recorded += 1;
                } else {
                    skipped += 1;
                }
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "Recording failed");
                errors += 1;
            }
        }
    }

    println!("Recorded: {recorded}, unchanged: {skipped}, errors: {errors}");
    Ok(())
}

/// Run the worker until interrupted, or drain once.
pub async fn run_worker(config: &Config, once: bool) -> Result<()> {
    let store = connect(config).await?;
    let model = build_model_service(&config.anthropic);
    let worker = Worker::new(store, config.clone(), model);

    if once {
        let processed = worker.process_available(100).await?;
        println!("Processed {processed} jobs");
        return Ok(());
    }

    let shutdown = worker.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    println!("Worker running (Ctrl+C to stop)");
    worker.run().await?;
    Ok(())
}

pub async fn run_skill(config: &Config, command: SkillCommand) -> Result<()> {
    match command {
        SkillCommand::Create {
            description,
            scope,
            name,
        } => {
            let scope = parse_scope(&scope)?;
            let store = connect(config).await?;
            let model = build_model_service(&config.anthropic);
            if !model.is_available() {
                bail!("no model API key configured; set ANTHROPIC_API_KEY");
            }

            let engine = SkillEngine::new(store, config.clone(), model);
            let workspace = std::env::current_dir().ok();
            let outcome = engine
                .create_manual(&description, scope, workspace.as_deref(), name.as_deref())
                .await?;

            match outcome {
                SkillOutcome::Installed { name, path } => {
                    println!("Skill '{name}' installed at {path}")
                }
                SkillOutcome::Duplicate => println!("An identical skill is already installed"),
                SkillOutcome::Skipped => println!("Skill generation skipped"),
            }
            Ok(())
        }
        SkillCommand::List { scope } => {
            let mut skills = Vec::new();
            if scope == "personal" || scope == "all" {
                skills.extend(installer::list_installed(
                    &config.personal_skills_dir(),
                    SkillScope::Personal,
                ));
            }
            if scope == "project" || scope == "all" {
                let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                skills.extend(installer::list_installed(
                    &config.project_skills_dir(&workspace),
                    SkillScope::Project,
                ));
            }

            if skills.is_empty() {
                println!("No skills installed.");
                return Ok(());
            }
            for skill in skills {
                println!(
                    "{:24} [{}] {}",
                    skill.name,
                    skill.scope.as_str(),
                    skill.description
                );
            }
            Ok(())
        }
        SkillCommand::Install { url, scope } => {
            let scope = parse_scope(&scope)?;
            let store = connect(config).await?;
            let model = build_model_service(&config.anthropic);
            let engine = SkillEngine::new(store, config.clone(), model);
            let workspace = std::env::current_dir().ok();

            match engine
                .install_from_registry(&url, scope, workspace.as_deref())
                .await?
            {
                SkillOutcome::Installed { name, path } => {
                    println!("Skill '{name}' installed at {path}")
                }
                SkillOutcome::Duplicate => println!("An identical skill is already installed"),
                SkillOutcome::Skipped => println!("Install skipped"),
            }
            Ok(())
        }
        SkillCommand::Remove { name, scope } => {
            let scope = parse_scope(&scope)?;
            let store = connect(config).await?;
            let model = build_model_service(&config.anthropic);
            let engine = SkillEngine::new(store, config.clone(), model);
            let workspace = std::env::current_dir().ok();

            if engine.remove(&name, scope, workspace.as_deref()).await? {
                println!("Removed '{name}'");
            } else {
                println!("No skill named '{name}' found");
            }
            Ok(())
        }
    }
}

pub async fn run_project(config: &Config, command: ProjectCommand) -> Result<()> {
    let workspace_path = std::env::current_dir()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    match command {
        ProjectCommand::Use { slug, workspace } => {
            let store = connect(config).await?;
            if store.project_by_slug(&slug).await?.is_none() {
                bail!("no project with slug '{slug}'");
            }
            entities::set_selected(&slug, workspace.then_some(workspace_path.as_str()))?;
            println!("Active project: {slug}");
            Ok(())
        }
        ProjectCommand::Clear { workspace } => {
            entities::clear_selected(workspace.then_some(workspace_path.as_str()))?;
            println!("Selection cleared");
            Ok(())
        }
        ProjectCommand::Show => {
            match entities::selected_slug(Some(&workspace_path)) {
                Some(slug) => println!("Active project: {slug}"),
                None => println!("No active project selected"),
            }
            Ok(())
        }
    }
}

pub async fn status(config: &Config) -> Result<()> {
    let store = connect(config).await?;

    let stats = jobs::stats(store.pool()).await?;
    if stats.is_empty() {
        println!("Job queue: empty");
    } else {
        println!("Job queue:");
        for (status, count) in stats {
            println!("  {status:12} {count}");
        }
    }

    let depth = jobs::queue_depth(store.pool()).await?;
    println!("Claimable: {depth}");
    Ok(())
}

fn parse_scope(raw: &str) -> Result<SkillScope> {
    raw.parse::<SkillScope>()
        .map_err(|_| anyhow::anyhow!("scope must be 'personal' or 'project'"))
}
