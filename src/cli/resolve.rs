//! CLI `resolve` command: run the resolver, confirm conflicts, list pending ones.

use anyhow::Result;

use verity::config::VerityConfig;

pub async fn resolve(config: &VerityConfig, user_id: &str, dismiss: Option<&str>) -> Result<()> {
    let engine = super::open_engine(config)?;

    if let Some(conflict_id) = dismiss {
        let conflict = engine.dismiss_conflict(user_id, conflict_id).await?;
        println!("Confirmed conflict {} ({})", conflict.id, conflict.conflict_type);
    }

    let report = engine.resolve_conflicts(user_id).await?;
    for merge in &report.merged {
        println!(
            "Merged {} into {} ({})",
            merge.absorbed.join(", "),
            merge.primary_name,
            merge.primary_id
        );
    }
    if report.is_empty() {
        println!("No new conflicts.");
    } else {
        println!(
            "Contradictions: {} resolved, {} pending. Identity conflicts: {}",
            report.contradictions_resolved, report.contradictions_pending, report.identity_conflicts
        );
    }

    let pending = engine.pending_conflicts(user_id).await?;
    if !pending.is_empty() {
        println!();
        println!("Pending review:");
        for conflict in &pending {
            let details = conflict
                .details
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_default();
            println!("  {} [{}] {}", conflict.id, conflict.conflict_type, details);
        }
        println!();
        println!("Confirm the current value with `verity resolve --user {user_id} --dismiss <id>`.");
    }
    Ok(())
}
