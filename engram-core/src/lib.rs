//! # engram-core
//!
//! Core library for engram - a per-developer memory service that gives a
//! coding assistant durable, session-spanning context.
//!
//! Two execution domains:
//! - **Hot path**: classify a prompt, fan out retrieval queries in
//!   parallel under a wall-clock budget, and pack the scored results into
//!   a token-bounded context block. No model calls.
//! - **Cold path**: ingest completed session transcripts with
//!   content-hash deduplication, then drive summarization, entity
//!   linking, artifact extraction, and skill generation through a
//!   durable, lease-locked job queue.
//!
//! ## Example
//!
//! ```rust,no_run
//! use engram_core::{config::Config, db::Store};
//!
//! # async fn example() -> engram_core::Result<()> {
//! let config = Config::load()?;
//! let store = Store::connect(&config.general.db_url).await?;
//! store.migrate().await?;
//!
//! let context = engram_core::context::build_context(
//!     &store, &config, "continue the parser refactor", Some("/home/dev/parser"),
//! ).await?;
//! # Ok(())
//! # }
//! ```

pub use config::Config;
pub use db::Store;
pub use error::{Error, Result};

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod skills;
pub mod types;
pub mod worker;
