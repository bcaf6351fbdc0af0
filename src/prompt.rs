//! Prompt fact injection.
//!
//! The verified block carries exact canonical values and is always placed
//! before, and delimited from, any advisory context.

use serde::Serialize;

use crate::facts::critical::{CriticalCategory, CriticalFacts};
use crate::facts::types::Conflict;
use crate::retriever::AdvisoryChunk;

pub const FACTS_HEADER: &str = "=== CRITICAL USER FACTS (verified) ===";
pub const FACTS_FOOTER: &str = "=== END CRITICAL USER FACTS ===";
pub const ADVISORY_HEADER: &str = "--- Advisory context (unverified, may be inaccurate) ---";
pub const ADVISORY_FOOTER: &str = "--- End advisory context ---";

const USE_EXACTLY: &str =
    "Use these values exactly as written. Do not paraphrase, abbreviate, translate or guess them.";

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedPrompt {
    pub enhanced_prompt: String,
    /// Present required categories over required categories.
    pub confidence: f64,
    pub missing: Vec<CriticalCategory>,
    pub pending_conflicts: usize,
}

/// Assemble the enhanced prompt.
pub fn build_prompt(
    base_prompt: &str,
    facts: &CriticalFacts,
    required: &[CriticalCategory],
    pending: &[Conflict],
    advisory: &[AdvisoryChunk],
) -> GeneratedPrompt {
    let missing = facts.missing(required);
    let mut out = String::new();

    let base = base_prompt.trim_end();
    if !base.is_empty() {
        out.push_str(base);
        out.push_str("\n\n");
    }

    out.push_str(FACTS_HEADER);
    out.push('\n');
    out.push_str(USE_EXACTLY);
    out.push('\n');
    for category in CriticalCategory::ALL {
        if let Some(value) = fact_value(facts, category) {
            out.push_str(&format!("{}: {}\n", category.label(), one_line(&value)));
        }
    }
    for category in &missing {
        out.push_str(&format!(
            "{}: unknown. Ask the user; never assume a value.\n",
            category.label()
        ));
    }
    for conflict in pending {
        let attribute = conflict
            .details
            .as_ref()
            .and_then(|d| d.get("attribute"))
            .and_then(|v| v.as_str());
        if let Some(attribute) = attribute {
            out.push_str(&format!(
                "Unconfirmed: the user gave conflicting values for {}. Confirm before relying on it.\n",
                one_line(attribute)
            ));
        }
    }
    out.push_str(FACTS_FOOTER);
    out.push('\n');

    if !advisory.is_empty() {
        out.push('\n');
        out.push_str(ADVISORY_HEADER);
        out.push('\n');
        for chunk in advisory {
            let content = one_line(&chunk.content);
            if content.is_empty() {
                continue;
            }
            match chunk.source.as_deref().map(one_line).filter(|s| !s.is_empty()) {
                Some(source) => out.push_str(&format!("- {content} (source: {source})\n")),
                None => out.push_str(&format!("- {content}\n")),
            }
        }
        out.push_str(ADVISORY_FOOTER);
        out.push('\n');
    }

    GeneratedPrompt {
        enhanced_prompt: out,
        confidence: facts.confidence(required),
        missing,
        pending_conflicts: pending.len(),
    }
}

/// Collapse text to a single line with no section delimiters in it, so nothing
/// interpolated into the prompt can open or close a section.
fn one_line(text: &str) -> String {
    let mut line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    // Removing one delimiter can splice the text around it into another.
    while let Some(delimiter) = DELIMITERS.iter().find(|d| line.contains(**d)) {
        line = line.replace(delimiter, " ");
        line = line.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    line
}

const DELIMITERS: [&str; 4] = [FACTS_HEADER, FACTS_FOOTER, ADVISORY_HEADER, ADVISORY_FOOTER];

fn fact_value(facts: &CriticalFacts, category: CriticalCategory) -> Option<String> {
    match category {
        CriticalCategory::UserName => facts.user_name.clone(),
        CriticalCategory::PetNames => (!facts.pet_names.is_empty()).then(|| facts.pet_names.join(", ")),
        CriticalCategory::Location => facts.location.clone(),
        CriticalCategory::Occupation => facts.occupation.clone(),
    }
}
