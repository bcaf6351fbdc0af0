use anyhow::Result;

use verity::config::VerityConfig;

/// Display per-user diagnostics in the terminal.
pub async fn diag(config: &VerityConfig, user_id: &str) -> Result<()> {
    let engine = super::open_engine(config)?;
    let info = engine.get_diagnostic_info(user_id).await?;

    println!("Diagnostics for {user_id}");
    println!("{}", "=".repeat(40));
    println!("  Live entities:       {}", info.entity_count);
    println!("  Aliases:             {}", info.alias_count);
    println!("  Current attributes:  {}", info.current_attributes);
    println!("  Attribute history:   {}", info.historical_attributes);
    println!("  Relationships:       {}", info.relationship_count);
    println!("  Cache entries:       {}", info.cache_entries);
    println!("  Pending conflicts:   {}", info.pending_conflicts);
    println!();

    println!("By Status:");
    for s in &["proposed", "active", "merged", "inactive"] {
        let count = info.by_status.get(*s).copied().unwrap_or(0);
        println!("  {:<12} {}", s, count);
    }
    println!();

    println!("By Type:");
    for t in &["person", "pet", "place", "thing"] {
        let count = info.by_type.get(*t).copied().unwrap_or(0);
        println!("  {:<12} {}", t, count);
    }

    if let Some(ref last) = info.last_updated {
        println!();
        println!("Last updated:          {last}");
    }

    Ok(())
}
