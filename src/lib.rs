//! Deterministic fact memory for voice assistants.
//!
//! Verity keeps a small set of critical user facts (the user's name, pet
//! names, where they live, what they do) exact and reproducible, while
//! lower-trust context comes from a separate semantic retriever. Facts are
//! extracted from conversation, stored per user with full history, reconciled
//! when evidence duplicates or contradicts itself, and injected into system
//! prompts as a verified block that is never mixed with advisory context.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with partial unique indexes for the identity and
//!   single-current-value invariants, plus an audit log
//! - **Extraction**: compiled pattern rules, with an optional time-bounded
//!   LLM fallback for compound sentences
//! - **Consistency**: every write, its conflict resolution and the user's
//!   cache invalidation commit as one transaction
//! - **Transport**: MCP over stdio (primary) or Streamable HTTP
//!
//! # Modules
//!
//! - [`config`]: configuration from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations, and health checks
//! - [`facts`]: entity store, cache, conflict resolver, diagnostics
//! - [`extract`]: pattern rules, the structured extractor, and the write path
//! - [`prompt`]: critical-facts block assembly
//! - [`retriever`]: advisory context from an external service
//! - [`engine`]: the [`FactEngine`](engine::FactEngine) facade

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod extract;
pub mod facts;
pub mod prompt;
pub mod retriever;

pub use engine::FactEngine;
pub use error::{FactError, Result};
