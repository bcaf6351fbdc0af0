pub mod diag;
pub mod doctor;
pub mod extract;
pub mod facts;
pub mod prompt;
pub mod resolve;
pub mod selftest;

use anyhow::{Context, Result};

use verity::config::VerityConfig;
use verity::engine::FactEngine;

/// Open the engine for a one-shot command.
fn open_engine(config: &VerityConfig) -> Result<FactEngine> {
    FactEngine::open(config.clone()).context("failed to open fact engine")
}

/// Print a list as `a, b, c`, or a dash when empty.
fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}
