//! The context pipeline
//!
//! Hot path: [`classifier`] → [`retriever`] → [`formatter`], bounded by a
//! wall-clock budget with no model calls.
//!
//! Cold path support: [`recorder`] ingests transcripts, [`artifacts`]
//! extracts files/commands/errors, [`entities`] links mentions and tracks
//! the per-workspace project selection.

pub mod artifacts;
pub mod classifier;
pub mod entities;
pub mod formatter;
pub mod recorder;
pub mod retriever;

pub use classifier::{Classifier, EntityMatch, Intent, Signal};
pub use formatter::format_context;
pub use retriever::{ContextItem, ContextKind, Retriever};

use crate::config::Config;
use crate::db::Store;
use crate::error::Result;
use std::time::Duration;

/// The complete hot path: classify the prompt, fan out retrieval under
/// the wall-clock budget, and pack the result. Returns the empty string
/// when nothing matched or nothing fit.
pub async fn build_context(
    store: &Store,
    config: &Config,
    prompt: &str,
    workspace_path: Option<&str>,
) -> Result<String> {
    if !config.context.enabled {
        return Ok(String::new());
    }

    let classifier = Classifier::load(store).await?;
    let signal = classifier.classify(prompt);

    if signal.is_empty() && workspace_path.is_none() {
        return Ok(String::new());
    }

    let retriever = Retriever::new(store);
    let items = retriever
        .retrieve(
            &signal,
            workspace_path,
            Duration::from_millis(config.context.retrieval_timeout_ms),
        )
        .await;

    Ok(format_context(
        &items,
        config.context.max_context_tokens,
        chrono::Utc::now(),
    ))
}
