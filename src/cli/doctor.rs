//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use verity::config::VerityConfig;
use verity::db;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &VerityConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `verity serve` or `verity extract` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path)
        .map(|m| m.len())
        .unwrap_or(0);

    let conn = db::open_database(&db_path)
        .context("failed to open database (may be corrupt)")?;

    let report = db::check_database_health(&conn)
        .context("failed to run health check")?;

    println!("Verity Health Report");
    println!("====================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!();
    println!("Structured extractor:");
    if config.extraction.llm_enabled {
        println!("  Configured:      {} ({})", config.extraction.llm_model, config.extraction.llm_endpoint);
    } else {
        println!("  Configured:      disabled (pattern rules only)");
    }
    println!("  Last used:       {}", report.extractor_model.as_deref().unwrap_or("(never)"));
    println!(
        "Retriever:         {}",
        config.retriever.url.as_deref().unwrap_or("none (no advisory context)")
    );
    println!();
    println!("Row counts:");
    println!("  Entities:        {}", report.entity_count);
    println!("  Aliases:         {}", report.alias_count);
    println!("  Attributes:      {}", report.attribute_count);
    println!("  Relationships:   {}", report.relationship_count);
    println!("  Cache rows:      {}", report.cache_count);
    println!("  Pending review:  {}", report.pending_conflicts);
    println!("  Audit log:       {}", report.log_count);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery steps:");
        println!("  1. Stop the server and restore from a backup: cp backup.db ~/.verity/facts.db");
        println!("  2. Cached projections are re-derivable; only the store tables matter.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_human_readable() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
