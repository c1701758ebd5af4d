//! Large-model service access
//!
//! The model is an external collaborator, not a dependency of correctness:
//! every call site defines a degraded fallback (truncation for summaries,
//! retryable deferral for skill generation). Access goes through the single
//! [`ModelService`] capability so the rest of the system never touches the
//! wire format.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::AnthropicConfig;
use crate::error::{Error, Result};

/// A generated turn title and summary.
#[derive(Debug, Clone)]
pub struct TurnSummary {
    pub title: String,
    pub summary: String,
}

/// Context handed to skill synthesis.
#[derive(Debug, Clone, Default)]
pub struct SkillRequest {
    pub description: String,
    pub session_summary: String,
    pub workspace_path: String,
    pub files_touched: Vec<String>,
    pub commands_run: Vec<String>,
    pub tools_used: Vec<String>,
    /// Ordered turn titles, the backbone of the procedure
    pub turn_titles: Vec<String>,
}

/// A synthesized skill draft, pre-validation.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillDraft {
    pub name: String,
    pub description: String,
    pub body: String,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

/// The capability interface for the large-model service.
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Whether the service can be called at all (key present).
    fn is_available(&self) -> bool;

    /// Generate a short title and one-sentence summary for a turn.
    async fn summarize_turn(&self, user_message: &str, assistant_text: &str)
        -> Result<TurnSummary>;

    /// Synthesize a skill draft from a description and session context.
    async fn synthesize_skill(&self, request: &SkillRequest) -> Result<SkillDraft>;
}

// ============================================
// Anthropic client
// ============================================

const TURN_SUMMARY_SYSTEM: &str = "Generate a short title (5-10 words) and a 1-sentence summary \
of what the user asked and what was done. Return as:\nTITLE: <title>\nSUMMARY: <summary>";

const SKILL_SYSTEM: &str = "You generate reusable skills (SKILL.md files) for a coding assistant.\n\
Given a description of what the skill should do and context about the project/task, return JSON \
with these fields:\n\
- name: string (lowercase, hyphens only, max 64 chars)\n\
- description: string (1-2 sentences, max 200 chars)\n\
- body: string (a numbered, step-by-step markdown procedure)\n\
- allowed_tools: list of tool name strings\n\
Keep instructions concise and specific. Reference file paths and commands from the context when \
available. Focus on the repeatable workflow, not one-time setup.";

/// Anthropic messages API client.
pub struct AnthropicClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(config: &AnthropicConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            http,
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        if !self.is_available() {
            return Err(Error::Model("no API key configured".to_string()));
        }

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": self.model,
                "max_tokens": max_tokens,
                "system": system,
                "messages": [{ "role": "user", "content": user }],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Model(format!(
                "API returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        #[derive(Deserialize)]
        struct ApiResponse {
            content: Vec<ContentBlock>,
        }
        #[derive(Deserialize)]
        struct ContentBlock {
            #[serde(default)]
            text: String,
        }

        let parsed: ApiResponse = response.json().await?;
        Ok(parsed
            .content
            .first()
            .map(|b| b.text.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ModelService for AnthropicClient {
    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn summarize_turn(
        &self,
        user_message: &str,
        assistant_text: &str,
    ) -> Result<TurnSummary> {
        let prompt = format!(
            "User asked:\n{}\n\nAssistant response (may be truncated):\n{}",
            &user_message.chars().take(1000).collect::<String>(),
            &assistant_text.chars().take(2000).collect::<String>(),
        );

        let text = self.complete(TURN_SUMMARY_SYSTEM, &prompt, 200).await?;
        Ok(parse_turn_summary(&text, user_message))
    }

    async fn synthesize_skill(&self, request: &SkillRequest) -> Result<SkillDraft> {
        let prompt = build_skill_prompt(request);
        let text = self.complete(SKILL_SYSTEM, &prompt, 2000).await?;

        let stripped = strip_code_fences(&text);
        let draft: SkillDraft = serde_json::from_str(stripped)
            .map_err(|e| Error::Model(format!("unparseable skill response: {}", e)))?;

        if draft.body.trim().is_empty() {
            return Err(Error::Model("model returned empty skill body".to_string()));
        }
        Ok(draft)
    }
}

/// A service that is never available; every call site falls back.
pub struct UnavailableModel;

#[async_trait]
impl ModelService for UnavailableModel {
    fn is_available(&self) -> bool {
        false
    }

    async fn summarize_turn(&self, _: &str, _: &str) -> Result<TurnSummary> {
        Err(Error::Model("model service disabled".to_string()))
    }

    async fn synthesize_skill(&self, _: &SkillRequest) -> Result<SkillDraft> {
        Err(Error::Model("model service disabled".to_string()))
    }
}

/// Build the model service from configuration.
pub fn build_model_service(config: &AnthropicConfig) -> std::sync::Arc<dyn ModelService> {
    if config.api_key.is_empty() {
        std::sync::Arc::new(UnavailableModel)
    } else {
        std::sync::Arc::new(AnthropicClient::new(config))
    }
}

fn parse_turn_summary(text: &str, fallback: &str) -> TurnSummary {
    let mut title = String::new();
    let mut summary = String::new();

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("TITLE:") {
            title = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("SUMMARY:") {
            summary = rest.trim().to_string();
        }
    }

    if title.is_empty() {
        title = fallback.chars().take(80).collect();
    }
    if summary.is_empty() {
        summary = fallback.chars().take(200).collect();
    }

    TurnSummary { title, summary }
}

fn build_skill_prompt(request: &SkillRequest) -> String {
    let mut parts = vec![format!("Generate a skill for:\n{}", request.description)];

    if !request.workspace_path.is_empty() {
        parts.push(format!("Workspace: {}", request.workspace_path));
    }
    if !request.session_summary.is_empty() {
        parts.push(format!(
            "Session summary:\n{}",
            request.session_summary.chars().take(2000).collect::<String>()
        ));
    }
    if !request.turn_titles.is_empty() {
        let steps: Vec<String> = request
            .turn_titles
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{}. {}", i + 1, t))
            .collect();
        parts.push(format!("Steps taken, in order:\n{}", steps.join("\n")));
    }
    if !request.files_touched.is_empty() {
        parts.push(format!(
            "Files involved: {}",
            request.files_touched[..request.files_touched.len().min(20)].join(", ")
        ));
    }
    if !request.commands_run.is_empty() {
        parts.push(format!(
            "Commands used: {}",
            request.commands_run[..request.commands_run.len().min(10)].join(", ")
        ));
    }
    if !request.tools_used.is_empty() {
        parts.push(format!(
            "Tools used: {}",
            request.tools_used[..request.tools_used.len().min(10)].join(", ")
        ));
    }

    parts.push("Return JSON with: name, description, body, allowed_tools".to_string());
    parts.join("\n\n")
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the fence line (possibly "```json") and the closing fence
    let inner = inner.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_turn_summary() {
        let parsed = parse_turn_summary(
            "TITLE: Fix login crash\nSUMMARY: Patched the null check in auth.",
            "fallback message",
        );
        assert_eq!(parsed.title, "Fix login crash");
        assert_eq!(parsed.summary, "Patched the null check in auth.");
    }

    #[test]
    fn test_parse_turn_summary_falls_back_to_truncation() {
        let long_message = "x".repeat(300);
        let parsed = parse_turn_summary("no structured output here", &long_message);
        assert_eq!(parsed.title.chars().count(), 80);
        assert_eq!(parsed.summary.chars().count(), 200);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(
            strip_code_fences("```json\n{\"a\": 1}\n```"),
            "{\"a\": 1}"
        );
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_skill_prompt_includes_ordered_steps() {
        let request = SkillRequest {
            description: "release the crate".to_string(),
            turn_titles: vec!["bump version".to_string(), "publish".to_string()],
            ..Default::default()
        };
        let prompt = build_skill_prompt(&request);
        assert!(prompt.contains("1. bump version"));
        assert!(prompt.contains("2. publish"));
    }

    #[tokio::test]
    async fn test_unavailable_model_errors() {
        let model = UnavailableModel;
        assert!(!model.is_available());
        assert!(model.summarize_turn("a", "b").await.is_err());
    }
}
