//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/engram/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/engram/` (~/.config/engram/)
//! - State/Logs: `$XDG_STATE_HOME/engram/` (~/.local/state/engram/)
//!
//! Environment overrides: `ENGRAM_DB_URL` for the database URL and
//! `ANTHROPIC_API_KEY` for the model service key.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Database and logging basics
    #[serde(default)]
    pub general: GeneralConfig,

    /// Context retrieval and recording
    #[serde(default)]
    pub context: ContextConfig,

    /// Skill generation and installation
    #[serde(default)]
    pub skills: SkillsConfig,

    /// Background worker
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Anthropic model service (optional)
    #[serde(default)]
    pub anthropic: AnthropicConfig,
}

/// General settings: database URL and log level
#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    /// PostgreSQL connection URL
    #[serde(default = "default_db_url")]
    pub db_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            db_url: default_db_url(),
            log_level: default_log_level(),
        }
    }
}

fn default_db_url() -> String {
    "postgres://localhost/engram".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Context retrieval and recording settings
#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Master switch for the context system
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Token budget for injected context
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Wall-clock budget for the retrieval fan-out (milliseconds)
    #[serde(default = "default_retrieval_timeout_ms")]
    pub retrieval_timeout_ms: u64,

    /// Wall-clock budget for the whole prompt hook (milliseconds)
    #[serde(default = "default_hook_timeout_ms")]
    pub hook_timeout_ms: u64,

    /// Truncation length for summary fallback when the model is unavailable
    #[serde(default = "default_summary_fallback_chars")]
    pub summary_fallback_chars: usize,

    /// Record full command strings; false records only the first argv token
    #[serde(default = "default_true")]
    pub record_full_commands: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_context_tokens: default_max_context_tokens(),
            retrieval_timeout_ms: default_retrieval_timeout_ms(),
            hook_timeout_ms: default_hook_timeout_ms(),
            summary_fallback_chars: default_summary_fallback_chars(),
            record_full_commands: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_context_tokens() -> usize {
    1500
}

fn default_retrieval_timeout_ms() -> u64 {
    1500
}

fn default_hook_timeout_ms() -> u64 {
    2000
}

fn default_summary_fallback_chars() -> usize {
    200
}

/// Skill generation settings
#[derive(Debug, Deserialize, Clone)]
pub struct SkillsConfig {
    /// Auto-generate skills from high-quality sessions
    #[serde(default = "default_true")]
    pub auto_generate: bool,

    /// Quality score threshold gating auto-generation
    #[serde(default = "default_min_quality_score")]
    pub min_quality_score: f64,

    /// Default scope for new skills ("personal" or "project")
    #[serde(default = "default_scope")]
    pub default_scope: String,

    /// Cap on auto-generated skills per day
    #[serde(default = "default_max_auto_skills_per_day")]
    pub max_auto_skills_per_day: i64,

    /// Tokens in a final user message that signal the session succeeded
    #[serde(default = "default_confirmation_keywords")]
    pub confirmation_keywords: Vec<String>,

    /// Base directory for personal-scope skills
    pub personal_dir: Option<PathBuf>,

    /// Base directory for project-scope skills, relative to the workspace
    pub project_dir: Option<PathBuf>,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            auto_generate: true,
            min_quality_score: default_min_quality_score(),
            default_scope: default_scope(),
            max_auto_skills_per_day: default_max_auto_skills_per_day(),
            confirmation_keywords: default_confirmation_keywords(),
            personal_dir: None,
            project_dir: None,
        }
    }
}

fn default_min_quality_score() -> f64 {
    0.6
}

fn default_scope() -> String {
    "personal".to_string()
}

fn default_max_auto_skills_per_day() -> i64 {
    3
}

fn default_confirmation_keywords() -> Vec<String> {
    ["works", "working", "thanks", "thank you", "perfect", "great", "lgtm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Background worker settings
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Number of parallel claimers (1-4)
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Job lease duration in seconds
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: i64,

    /// Sleep between empty claims (seconds, grows up to max_idle_sleep_secs)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,

    /// Cap on the idle sleep backoff
    #[serde(default = "default_max_idle_sleep_secs")]
    pub max_idle_sleep_secs: f64,

    /// Ceiling for the retry backoff (seconds)
    #[serde(default = "default_backoff_ceiling_secs")]
    pub backoff_ceiling_secs: i64,

    /// Queue depth above which low-priority kinds are enqueued with delay
    #[serde(default = "default_queue_soft_cap")]
    pub queue_soft_cap: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            lease_seconds: default_lease_seconds(),
            poll_interval_secs: default_poll_interval_secs(),
            max_idle_sleep_secs: default_max_idle_sleep_secs(),
            backoff_ceiling_secs: default_backoff_ceiling_secs(),
            queue_soft_cap: default_queue_soft_cap(),
        }
    }
}

fn default_parallelism() -> usize {
    1
}

fn default_lease_seconds() -> i64 {
    60
}

fn default_poll_interval_secs() -> f64 {
    1.0
}

fn default_max_idle_sleep_secs() -> f64 {
    5.0
}

fn default_backoff_ceiling_secs() -> i64 {
    3600
}

fn default_queue_soft_cap() -> i64 {
    500
}

/// Anthropic model service configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AnthropicConfig {
    /// API key (ANTHROPIC_API_KEY env var takes precedence)
    #[serde(default)]
    pub api_key: String,

    /// Model used for turn and skill generation
    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            timeout_secs: default_model_timeout(),
        }
    }
}

fn default_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

fn default_model_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default path, applying env overrides
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::debug!("No config file found at {:?}, using defaults", config_path);
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Apply environment variable overrides for db_url and the model API key
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ENGRAM_DB_URL") {
            if !url.is_empty() {
                self.general.db_url = url;
            }
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                self.anthropic.api_key = key;
            }
        }
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/engram/config.toml` (~/.config/engram/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("engram").join("config.toml")
    }

    /// Returns the config directory (also holds the project selection state)
    pub fn config_dir() -> PathBuf {
        xdg_config_home().join("engram")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/engram/` (~/.local/state/engram/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("engram")
    }

    /// Personal-scope skills base directory (default ~/.claude/skills)
    pub fn personal_skills_dir(&self) -> PathBuf {
        self.skills
            .personal_dir
            .clone()
            .unwrap_or_else(|| home_dir().join(".claude").join("skills"))
    }

    /// Project-scope skills base directory under a workspace
    pub fn project_skills_dir(&self, workspace: &std::path::Path) -> PathBuf {
        match &self.skills.project_dir {
            Some(rel) => workspace.join(rel),
            None => workspace.join(".claude").join("skills"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.context.max_context_tokens, 1500);
        assert_eq!(config.context.retrieval_timeout_ms, 1500);
        assert_eq!(config.worker.lease_seconds, 60);
        assert_eq!(config.worker.parallelism, 1);
        assert!((config.skills.min_quality_score - 0.6).abs() < f64::EPSILON);
        assert!(config.skills.auto_generate);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[general]
db_url = "postgres://db.local/engram"

[context]
max_context_tokens = 800

[skills]
auto_generate = false
min_quality_score = 0.75

[worker]
parallelism = 4
lease_seconds = 120
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.general.db_url, "postgres://db.local/engram");
        assert_eq!(config.context.max_context_tokens, 800);
        assert!(!config.skills.auto_generate);
        assert!((config.skills.min_quality_score - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.worker.parallelism, 4);
        assert_eq!(config.worker.lease_seconds, 120);
        // Unspecified sections keep defaults
        assert_eq!(config.context.retrieval_timeout_ms, 1500);
    }

    #[test]
    fn test_confirmation_keywords_default() {
        let config = Config::default();
        assert!(config
            .skills
            .confirmation_keywords
            .iter()
            .any(|k| k == "works"));
    }
}
