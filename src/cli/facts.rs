//! CLI `facts`, `inspect` and `forget` commands.

use anyhow::Result;

use verity::config::VerityConfig;
use verity::error::FactError;
use verity::facts::types::{AttributeKind, EntityType};

/// Show a user's critical facts and live entities, or one attribute's history.
pub async fn facts(config: &VerityConfig, user_id: &str, history: Option<&str>) -> Result<()> {
    let engine = super::open_engine(config)?;

    if let Some(name) = history {
        let kind = AttributeKind::from(name);
        let rows = engine.attribute_history(user_id, kind.clone()).await?;
        println!("History of {kind} for {user_id}");
        println!("{}", "=".repeat(50));
        if rows.is_empty() {
            println!("  (none)");
        }
        for row in rows {
            let marker = if row.is_current { "*" } else { " " };
            println!(
                "  {marker} {:<24} conf {:.2}  {}",
                row.value, row.confidence, row.created_at
            );
        }
        return Ok(());
    }

    let facts = engine.get_all_critical_facts(user_id).await?;
    println!("Critical facts for {user_id}");
    println!("{}", "=".repeat(50));
    println!("  Name:        {}", facts.user_name.as_deref().unwrap_or("-"));
    println!("  Pets:        {}", super::join_or_dash(&facts.pet_names));
    println!("  Location:    {}", facts.location.as_deref().unwrap_or("-"));
    println!("  Occupation:  {}", facts.occupation.as_deref().unwrap_or("-"));

    match engine.current_attribute(user_id, AttributeKind::Birthday).await {
        Ok(rows) => {
            if let Some(row) = rows.first() {
                println!("  Birthday:    {}", row.value);
            }
        }
        Err(FactError::ConflictUnresolved { current, pending, .. }) => {
            println!("  Birthday:    {current} ({pending} unresolved conflict)");
        }
        Err(FactError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    println!();
    println!("Entities:");
    for entity_type in [EntityType::Person, EntityType::Pet, EntityType::Place, EntityType::Thing] {
        for entity in engine.list_entities(user_id, entity_type).await? {
            println!(
                "  {}  {:<8} {:<10} {:<20} conf {:.2} [{}]",
                entity.id,
                entity.entity_type.as_str(),
                entity.entity_subtype.as_deref().unwrap_or("-"),
                entity.canonical_name,
                entity.confidence,
                entity.status,
            );
        }
    }
    Ok(())
}

/// Show one entity with its aliases and audit trail.
pub async fn inspect(config: &VerityConfig, user_id: &str, entity_id: &str) -> Result<()> {
    let engine = super::open_engine(config)?;
    let details = engine.inspect_entity(user_id, entity_id).await?;

    let e = &details.entity;
    println!("Entity: {}", e.id);
    println!("{}", "=".repeat(50));
    println!("  Name:           {}", e.canonical_name);
    println!("  Type:           {}", e.entity_type);
    if let Some(ref subtype) = e.entity_subtype {
        println!("  Subtype:        {subtype}");
    }
    println!("  Status:         {}", e.status);
    println!("  Confidence:     {:.2}", e.confidence);
    println!("  Source:         {}", e.source_type);
    if let Some(ref into) = e.merged_into {
        println!("  Merged into:    {into}");
    }
    println!("  Created:        {}", e.created_at);
    println!("  Updated:        {}", e.updated_at);

    if !details.aliases.is_empty() {
        println!();
        println!("Aliases:");
        for alias in &details.aliases {
            println!("  {} ({}, conf {:.2})", alias.alias_name, alias.alias_type, alias.confidence);
        }
    }

    if !details.audit.is_empty() {
        println!();
        println!("Audit Log:");
        for entry in &details.audit {
            println!(
                "  {} [{}] {} -> {}",
                entry.created_at,
                entry.action_type,
                entry.old_value.as_deref().unwrap_or("-"),
                entry.new_value.as_deref().unwrap_or("-"),
            );
        }
    }
    Ok(())
}

/// Deactivate an entity at the user's request.
pub async fn forget(
    config: &VerityConfig,
    user_id: &str,
    entity_id: &str,
    reason: Option<&str>,
) -> Result<()> {
    let engine = super::open_engine(config)?;
    let result = engine.forget_entity(user_id, entity_id, reason).await?;
    if result.deactivated {
        println!("Forgot {} ({})", result.canonical_name, result.id);
    } else {
        println!("{} ({}) was already forgotten", result.canonical_name, result.id);
    }
    Ok(())
}
