//! Database layer for engram
//!
//! PostgreSQL access in three parts:
//! - `schema`: idempotent DDL applied at startup
//! - `store`: typed queries and transaction-scoped aggregate writes
//! - `jobs`: the durable lease-locked job queue

pub mod jobs;
pub mod schema;
pub mod store;

pub use store::{
    CommitmentRow, ConversationRow, ErrorRow, NewTurn, PersonRef, ProjectRef, Store,
    TurnWithContent,
};
