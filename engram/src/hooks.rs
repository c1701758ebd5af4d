//! Assistant hook entry points
//!
//! Both hooks read a JSON object on stdin and must be silent on failure:
//! any internal error produces empty output and exit code 0, so the
//! assistant is never blocked. Stdout is reserved for hook output; all
//! diagnostics go to the log file.

use engram_core::context::build_context;
use engram_core::context::recorder::enqueue_session_recording;
use engram_core::{Config, Store};
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PromptHookInput {
    #[allow(dead_code)]
    session_id: String,
    workspace_path: String,
    prompt: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct StopHookInput {
    session_id: String,
    transcript_path: String,
    workspace_path: String,
}

fn read_stdin() -> Option<String> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input).ok()?;
    Some(input)
}

/// Prompt hook: classify, retrieve, pack, and print
/// `{"context": "..."}`. Bounded by the configured hook budget.
pub async fn prompt_hook(config: &Config) {
    let Some(input) = read_stdin() else {
        return;
    };
    let Ok(parsed) = serde_json::from_str::<PromptHookInput>(&input) else {
        return;
    };
    if parsed.prompt.is_empty() {
        return;
    }

    let budget = Duration::from_millis(config.context.hook_timeout_ms);
    let workspace = (!parsed.workspace_path.is_empty()).then_some(parsed.workspace_path.as_str());

    let context = match tokio::time::timeout(budget, async {
        let store = Store::connect(&config.general.db_url).await?;
        build_context(&store, config, &parsed.prompt, workspace).await
    })
    .await
    {
        Ok(Ok(context)) => context,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Prompt hook failed");
            return;
        }
        Err(_) => {
            tracing::warn!("Prompt hook hit the wall-clock budget");
            return;
        }
    };

    if !context.is_empty() {
        println!("{}", serde_json::json!({ "context": context }));
    }
}

/// Stop hook: enqueue a `session_process` job for the transcript and
/// return immediately.
pub async fn stop_hook(config: &Config) {
    let Some(input) = read_stdin() else {
        return;
    };
    let Ok(parsed) = serde_json::from_str::<StopHookInput>(&input) else {
        return;
    };
    if parsed.session_id.is_empty() || parsed.transcript_path.is_empty() {
        return;
    }

    let result = async {
        let store = Store::connect(&config.general.db_url).await?;
        store.migrate().await?;
        enqueue_session_recording(
            &store,
            &parsed.session_id,
            &parsed.transcript_path,
            &parsed.workspace_path,
        )
        .await
    }
    .await;

    match result {
        Ok(created) => {
            tracing::debug!(session_id = %parsed.session_id, created, "Recording enqueued")
        }
        Err(e) => tracing::warn!(error = %e, "Stop hook failed"),
    }
}
