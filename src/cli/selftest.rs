//! CLI `selftest` command: run the read-only fact accuracy checks.

use anyhow::Result;

use verity::config::VerityConfig;

/// Run the accuracy checks and fail when any check fails.
pub async fn selftest(config: &VerityConfig, user_id: &str) -> Result<()> {
    let engine = super::open_engine(config)?;
    let checks = engine.test_fact_accuracy(user_id).await?;

    println!("Fact accuracy for {user_id}");
    println!("{}", "=".repeat(50));
    for check in &checks {
        let status = if check.pass { "PASS" } else { "FAIL" };
        println!("  [{status}] {}", check.test_name);
        if !check.pass {
            println!("         expected: {}", check.expected);
            println!("         actual:   {}", check.actual);
        }
    }

    let failed = checks.iter().filter(|c| !c.pass).count();
    println!();
    println!("{} of {} checks passed", checks.len() - failed, checks.len());
    anyhow::ensure!(failed == 0, "{failed} fact accuracy checks failed");
    Ok(())
}
