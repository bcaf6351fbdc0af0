use anyhow::Result;

use verity::config::VerityConfig;

/// Print the enhanced system prompt for a user.
pub async fn prompt(
    config: &VerityConfig,
    user_id: &str,
    base_prompt: &str,
    query: Option<&str>,
) -> Result<()> {
    let engine = super::open_engine(config)?;
    let generated = match query {
        Some(query) => {
            engine
                .generate_system_prompt_with_context(user_id, base_prompt, query)
                .await?
        }
        None => engine.generate_system_prompt_with_facts(user_id, base_prompt).await?,
    };

    println!("{}", generated.enhanced_prompt);
    println!("{}", "-".repeat(50));
    println!("Confidence:          {:.2}", generated.confidence);
    if !generated.missing.is_empty() {
        let missing: Vec<String> = generated.missing.iter().map(|c| c.to_string()).collect();
        println!("Missing:             {}", missing.join(", "));
    }
    if generated.pending_conflicts > 0 {
        println!("Pending conflicts:   {}", generated.pending_conflicts);
    }
    Ok(())
}
