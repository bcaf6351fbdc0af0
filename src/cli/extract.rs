//! CLI `extract` command: store facts from one message or a batch file.

use std::path::Path;

use anyhow::{Context, Result};

use verity::config::VerityConfig;
use verity::extract::IncomingMessage;

/// Extract and store facts from a single message.
pub async fn extract(
    config: &VerityConfig,
    user_id: &str,
    content: &str,
    message_id: Option<&str>,
) -> Result<()> {
    let engine = super::open_engine(config)?;
    let report = engine.extract_and_store_facts(content, message_id, user_id).await?;

    let stored = &report.stored;
    println!("Entities created:     {}", stored.entities_created);
    println!("Entities reinforced:  {}", stored.entities_reinforced);
    println!("Attributes written:   {}", stored.attributes_written);
    println!("Relationships:        {}", stored.relationships_written);
    if let Some(ref name) = stored.renamed_to {
        println!("Preferred name:       {name}");
    }
    for merge in &report.resolved.merged {
        println!(
            "Merged:               {} into {}",
            merge.absorbed.join(", "),
            merge.primary_name
        );
    }
    if report.resolved.contradictions_pending > 0 {
        println!(
            "Pending conflicts:    {} (see `verity resolve`)",
            report.resolved.contradictions_pending
        );
    }
    if report.degraded {
        println!("Note: structured extraction unavailable, pattern results only.");
    }
    Ok(())
}

/// Extract from a JSON file holding an array of `{message_id, content}`.
pub async fn extract_batch(config: &VerityConfig, user_id: &str, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let messages: Vec<IncomingMessage> =
        serde_json::from_str(&raw).context("batch file must be a JSON array of messages")?;

    let engine = super::open_engine(config)?;
    let report = engine.extract_batch(user_id, messages).await?;

    println!("Processed {}/{} messages", report.processed, report.total);
    println!("  Entities created:   {}", report.entities_created);
    println!("  Attributes written: {}", report.attributes_written);
    if let Some(failure) = report.failure() {
        println!("  {failure}: {}", report.skipped.join(", "));
    }
    Ok(())
}
