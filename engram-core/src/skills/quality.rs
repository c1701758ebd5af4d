//! Session quality scoring
//!
//! Decides whether a completed session represents a repeatable pattern
//! worth turning into a skill. The score combines structural signals from
//! the recorded turns; a configurable threshold gates generation.

use crate::config::SkillsConfig;
use crate::db::{Store, TurnWithContent};
use crate::error::Result;
use crate::model::SkillRequest;
use crate::types::Session;

/// Structural signals extracted from a session's turns.
#[derive(Debug, Clone, Default)]
pub struct SessionSignals {
    pub turn_count: usize,
    pub turns_with_tools: usize,
    /// Turns that touched at least one file
    pub turns_touching_files: usize,
    pub distinct_tools: usize,
    pub error_in_final_turn: bool,
    pub final_user_message: String,
}

impl SessionSignals {
    /// Collect signals from a session's turns in order.
    pub fn collect(turns: &[TurnWithContent]) -> Self {
        let mut signals = SessionSignals {
            turn_count: turns.len(),
            ..Default::default()
        };

        let mut tools: Vec<&str> = Vec::new();
        for entry in turns {
            let tool_count = entry
                .content
                .as_ref()
                .map(|c| c.tool_call_count)
                .unwrap_or(0);
            if !entry.turn.tool_names.is_empty() || tool_count > 0 {
                signals.turns_with_tools += 1;
            }
            for tool in &entry.turn.tool_names {
                if !tools.contains(&tool.as_str()) {
                    tools.push(tool);
                }
            }
            if entry
                .content
                .as_ref()
                .is_some_and(|c| !c.files_touched.is_empty())
            {
                signals.turns_touching_files += 1;
            }
        }
        signals.distinct_tools = tools.len();

        if let Some(last) = turns.last() {
            signals.error_in_final_turn = last
                .content
                .as_ref()
                .is_some_and(|c| !c.errors_encountered.is_empty());
            signals.final_user_message = last.turn.user_message.clone().unwrap_or_default();
        }

        signals
    }
}

/// Score a session's quality in [0, 1].
///
/// Components: log-scaled turn count (0.25), fraction of turns with tool
/// calls (0.2), multi-step edit success (0.2: files touched across at
/// least two turns with a clean final turn), tool diversity (0.15), and an
/// explicit confirmation token in the final user message (0.2).
pub fn score_session_quality(signals: &SessionSignals, confirmation_keywords: &[String]) -> f64 {
    if signals.turn_count == 0 {
        return 0.0;
    }

    let mut score = 0.0;

    // Log-scaled turn count, saturating around a dozen turns
    let turn_component = ((1.0 + signals.turn_count as f64).ln() / 13.0_f64.ln()).min(1.0);
    score += 0.25 * turn_component;

    let tool_fraction = signals.turns_with_tools as f64 / signals.turn_count as f64;
    score += 0.2 * tool_fraction;

    if signals.turns_touching_files >= 2 && !signals.error_in_final_turn {
        score += 0.2;
    }

    let diversity = (signals.distinct_tools as f64 / 5.0).min(1.0);
    score += 0.15 * diversity;

    let final_lower = signals.final_user_message.to_lowercase();
    if confirmation_keywords
        .iter()
        .any(|k| !k.is_empty() && final_lower.contains(&k.to_lowercase()))
    {
        score += 0.2;
    }

    score.min(1.0)
}

/// A session that passed the quality gate.
#[derive(Debug, Clone)]
pub struct SkillCandidate {
    pub quality_score: f64,
    pub description: String,
    pub request: SkillRequest,
}

/// Analyze a completed session against the gate: generation enabled,
/// session fully processed, daily cap not reached, quality at or above the
/// threshold, and no equivalent skill already installed.
pub async fn analyze_session(
    store: &Store,
    config: &SkillsConfig,
    session: &Session,
) -> Result<Option<SkillCandidate>> {
    if !config.auto_generate {
        return Ok(None);
    }

    let Some(summary) = session.summary.clone().filter(|_| session.is_processed) else {
        tracing::debug!(session_id = %session.session_id, "Session not fully processed, skipping");
        return Ok(None);
    };

    let today_count = store.count_auto_skills_today().await?;
    if today_count >= config.max_auto_skills_per_day {
        tracing::debug!(today_count, "Daily auto-skill cap reached");
        return Ok(None);
    }

    let turns = store.turns_with_content(session.id).await?;
    let signals = SessionSignals::collect(&turns);
    let quality = score_session_quality(&signals, &config.confirmation_keywords);

    if quality < config.min_quality_score {
        tracing::debug!(
            session_id = %session.session_id,
            quality,
            threshold = config.min_quality_score,
            "Session below quality threshold"
        );
        return Ok(None);
    }

    if store.has_skill_for_session(&session.session_id).await? {
        tracing::debug!(session_id = %session.session_id, "Session already produced a skill");
        return Ok(None);
    }

    // Assemble the generation context from the turns
    let mut request = SkillRequest {
        description: summary.clone(),
        session_summary: summary.clone(),
        workspace_path: session.workspace_path.clone().unwrap_or_default(),
        ..Default::default()
    };
    for entry in &turns {
        if let Some(title) = &entry.turn.title {
            request.turn_titles.push(title.clone());
        }
        for tool in &entry.turn.tool_names {
            if !request.tools_used.contains(tool) {
                request.tools_used.push(tool.clone());
            }
        }
        if let Some(content) = &entry.content {
            for file in &content.files_touched {
                if !request.files_touched.contains(file) {
                    request.files_touched.push(file.clone());
                }
            }
            for command in &content.commands_run {
                if !request.commands_run.contains(command) {
                    request.commands_run.push(command.clone());
                }
            }
        }
    }

    Ok(Some(SkillCandidate {
        quality_score: quality,
        description: summary,
        request,
    }))
}
