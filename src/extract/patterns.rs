//! Deterministic statement rules.
//!
//! Each rule is a regex compiled once. Rules only fire on unambiguous first-person
//! statements; everything else is left to the structured extractor.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::{ExtractedAttribute, ExtractedEntity, ExtractedFacts};
use crate::facts::store::USER_SUBTYPE;
use crate::facts::types::{AttributeKind, EntityType, SourceType};

const SPECIES: &str = "dog|cat|puppy|kitten|bird|parrot|budgie|fish|hamster|rabbit|bunny|\
                       turtle|tortoise|snake|lizard|horse|pony|ferret|gerbil|guinea pig|mouse|rat|pet";

/// First word of a name: any letter, any case (lowercase input is capitalized later).
const FIRST_WORD: &str = r"\p{L}[\p{L}\p{M}'\-]*";
/// Later words of a name must be capitalized, so "Sarah and" stops at "Sarah".
const NEXT_WORD: &str = r"\p{Lu}[\p{Ll}\p{M}'\-]+";

const PLACE: &str = r"\p{L}[\p{L}\p{M}'\.\-]*(?:\s+\p{Lu}[\p{L}\p{M}'\.\-]*)*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    UserName,
    CallMe,
    PetNamed,
    PetPossessive,
    PastLocation,
    Location,
    Occupation,
    Employer,
    Birthday,
    ListSeparator,
}

fn rule_sources() -> Vec<(Rule, String)> {
    vec![
        (
            Rule::UserName,
            format!(r"(?i:\bmy\s+name\s+is|\bmy\s+name's)\s+(?P<name>{FIRST_WORD}(?:\s+{NEXT_WORD})?)"),
        ),
        (
            Rule::CallMe,
            format!(r"(?i:\b(?:please\s+)?call\s+me|\bi\s+go\s+by)\s+(?P<name>{FIRST_WORD})"),
        ),
        (
            Rule::PetNamed,
            format!(
                r"(?i:\b(?:a|an|one|two|three|four|\d+|my)\s+)(?P<species>(?i:{SPECIES}))(?i:es|s)?\s+(?i:named|called)\s+(?P<names>{FIRST_WORD}(?:(?:\s*,\s*(?i:and\s+)?|\s+(?i:and|&)\s+){NEXT_WORD})*)"
            ),
        ),
        (
            Rule::PetPossessive,
            format!(
                r"(?i:\bmy\s+)(?P<species>(?i:{SPECIES}))(?i:'s\s+name\s+is|\s+is\s+named|\s+is\s+called)\s+(?P<name>{FIRST_WORD})"
            ),
        ),
        (
            Rule::PastLocation,
            format!(
                r"(?i:\bi\s+used\s+to\s+live\s+in|\bi\s+(?:previously\s+|once\s+)?lived\s+in|\bi\s+grew\s+up\s+in)\s+(?P<place>{PLACE})"
            ),
        ),
        (
            Rule::Location,
            format!(
                r"(?i:\bi\s+(?:now\s+)?live\s+in|\bi\s+(?:just\s+)?moved\s+to|\bi'm\s+living\s+in|\bi\s+am\s+living\s+in)\s+(?P<place>{PLACE})"
            ),
        ),
        (
            Rule::Occupation,
            r"(?i:\bi\s+work\s+as)\s+(?i:(?:a|an)\s+)?(?P<job>\p{L}[\p{L}\p{M}\-]*(?:\s+\p{L}[\p{L}\p{M}\-]*){0,2})".to_string(),
        ),
        (
            Rule::Employer,
            r"(?i:\bi\s+work\s+(?:at|for))\s+(?P<org>\p{Lu}[\p{L}\p{M}\p{N}&'\.\-]*(?:\s+\p{Lu}[\p{L}\p{M}\p{N}&'\.\-]*)*)".to_string(),
        ),
        (
            Rule::Birthday,
            r"(?i:\bmy\s+birthday\s+is(?:\s+on)?)\s+(?P<date>[\p{L}\p{N}][\p{L}\p{M}\p{N} ,/\-]*?)\s*(?:[.!?;]|\s+and\s|$)".to_string(),
        ),
        (
            Rule::ListSeparator,
            r"(?i)\s*(?:,\s*and\s+|,|\s+and\s+|\s*&\s*)\s*".to_string(),
        ),
    ]
}

static RULES: LazyLock<Vec<(Rule, Regex)>> = LazyLock::new(|| {
    rule_sources()
        .into_iter()
        .filter_map(|(rule, pattern)| match Regex::new(&pattern) {
            Ok(regex) => Some((rule, regex)),
            Err(e) => {
                tracing::error!(?rule, error = %e, "pattern rule failed to compile");
                None
            }
        })
        .collect()
});

fn captures<'c>(rule: Rule, content: &'c str) -> impl Iterator<Item = Captures<'c>> + 'c {
    RULES
        .iter()
        .filter(move |(r, _)| *r == rule)
        .flat_map(move |(_, regex)| regex.captures_iter(content))
}

fn split_list(names: &str) -> Vec<&str> {
    match RULES.iter().find(|(r, _)| *r == Rule::ListSeparator) {
        Some((_, separator)) => separator.split(names).collect(),
        None => vec![names],
    }
}

/// Words that follow "my name is" without being a name.
const NOT_NAMES: &[&str] = &["not", "a", "an", "the", "what", "unknown", "actually", "really", "just", "also"];

/// Words that end a job title ("nurse and I ..." stops at "nurse").
const JOB_STOP: &[&str] = &["and", "at", "in", "for", "but", "with", "so", "since", "now", "because", "from"];

/// Trim punctuation and capitalize a name that was typed all lowercase.
pub(crate) fn tidy_name(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_end_matches(['.', ',', '!', '?', ';', ':'])
        .trim();
    if trimmed.chars().any(char::is_uppercase) {
        return trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    trimmed
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_name(candidate: &str) -> bool {
    !candidate.is_empty() && !NOT_NAMES.contains(&candidate.to_lowercase().as_str())
}

fn species(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run every rule over one message.
pub fn extract(content: &str, confidence: f64) -> ExtractedFacts {
    let mut facts = ExtractedFacts::default();
    let entity = |entity_type, subtype: Option<String>, name: String| ExtractedEntity {
        entity_type,
        subtype,
        name,
        confidence,
        source: SourceType::UserStated,
    };

    for caps in captures(Rule::UserName, content) {
        let name = tidy_name(&caps["name"]);
        if is_name(&name) {
            facts.entities.push(entity(EntityType::Person, Some(USER_SUBTYPE.to_string()), name));
        }
    }

    if let Some(caps) = captures(Rule::CallMe, content).last() {
        let name = tidy_name(&caps["name"]);
        if is_name(&name) {
            facts.preferred_name = Some((name, confidence));
        }
    }

    for caps in captures(Rule::PetNamed, content) {
        let subtype = species(&caps["species"]);
        for raw in split_list(&caps["names"]) {
            let name = tidy_name(raw);
            if is_name(&name) {
                facts.entities.push(entity(EntityType::Pet, Some(subtype.clone()), name));
            }
        }
    }

    for caps in captures(Rule::PetPossessive, content) {
        let name = tidy_name(&caps["name"]);
        if is_name(&name) {
            facts.entities.push(entity(EntityType::Pet, Some(species(&caps["species"])), name));
        }
    }

    let attribute = |kind: AttributeKind, value: String, current: bool| ExtractedAttribute {
        kind,
        value,
        confidence,
        current,
    };

    for caps in captures(Rule::PastLocation, content) {
        facts.attributes.push(attribute(AttributeKind::Location, tidy_name(&caps["place"]), false));
    }
    for caps in captures(Rule::Location, content) {
        facts.attributes.push(attribute(AttributeKind::Location, tidy_name(&caps["place"]), true));
    }

    for caps in captures(Rule::Occupation, content) {
        let job: Vec<&str> = caps["job"]
            .split_whitespace()
            .take_while(|w| !JOB_STOP.contains(&w.to_lowercase().as_str()))
            .collect();
        if !job.is_empty() {
            facts.attributes.push(attribute(AttributeKind::Occupation, job.join(" ").to_lowercase(), true));
        }
    }

    for caps in captures(Rule::Employer, content) {
        facts.attributes.push(attribute(AttributeKind::Employer, tidy_name(&caps["org"]), true));
    }

    for caps in captures(Rule::Birthday, content) {
        let date = caps["date"].trim().to_string();
        if !date.is_empty() {
            facts.attributes.push(attribute(AttributeKind::Birthday, date, true));
        }
    }

    facts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(facts: &ExtractedFacts, entity_type: EntityType) -> Vec<String> {
        facts
            .entities
            .iter()
            .filter(|e| e.entity_type == entity_type)
            .map(|e| e.name.clone())
            .collect()
    }

    fn attribute(facts: &ExtractedFacts, kind: AttributeKind) -> Vec<(String, bool)> {
        facts
            .attributes
            .iter()
            .filter(|a| a.kind == kind)
            .map(|a| (a.value.clone(), a.current))
            .collect()
    }

    #[test]
    fn name_and_pet_in_one_sentence() {
        let facts = extract("Hi, my name is Sarah and I have a cat named Mittens", 0.9);
        assert_eq!(names(&facts, EntityType::Person), vec!["Sarah"]);
        assert_eq!(names(&facts, EntityType::Pet), vec!["Mittens"]);

        let user = &facts.entities[0];
        assert_eq!(user.subtype.as_deref(), Some("user"));
        assert_eq!(user.confidence, 0.9);
        let pet = facts.entities.iter().find(|e| e.entity_type == EntityType::Pet).unwrap();
        assert_eq!(pet.subtype.as_deref(), Some("cat"));
    }

    #[test]
    fn two_word_names_and_lowercase_input() {
        assert_eq!(names(&extract("my name is Mary Ann.", 0.9), EntityType::Person), vec!["Mary Ann"]);
        assert_eq!(names(&extract("my name is clemens", 0.9), EntityType::Person), vec!["Clemens"]);
        assert!(names(&extract("my name is not important", 0.9), EntityType::Person).is_empty());
    }

    #[test]
    fn pet_lists() {
        let facts = extract("I have two dogs named Holly and Benny.", 0.9);
        assert_eq!(names(&facts, EntityType::Pet), vec!["Holly", "Benny"]);
        assert_eq!(facts.entities[0].subtype.as_deref(), Some("dog"));

        let facts = extract("I have a dog named Holly and a cat named Benny", 0.9);
        assert_eq!(names(&facts, EntityType::Pet), vec!["Holly", "Benny"]);

        let facts = extract("we got a kitten named mochi, and I love her", 0.9);
        assert_eq!(names(&facts, EntityType::Pet), vec!["Mochi"]);
    }

    #[test]
    fn pet_possessive() {
        let facts = extract("My dog's name is Rex", 0.9);
        assert_eq!(names(&facts, EntityType::Pet), vec!["Rex"]);
        assert_eq!(facts.entities[0].subtype.as_deref(), Some("dog"));
    }

    #[test]
    fn friends_are_not_pets() {
        let facts = extract("I have a friend named Tom", 0.9);
        assert!(facts.entities.is_empty());
    }

    #[test]
    fn preferred_name() {
        let facts = extract("My name is Robert but please call me Bob", 0.9);
        assert_eq!(names(&facts, EntityType::Person), vec!["Robert"]);
        assert_eq!(facts.preferred_name, Some(("Bob".to_string(), 0.9)));
    }

    #[test]
    fn current_and_past_locations() {
        let facts = extract("I used to live in Boston, but I moved to Portland last year", 0.9);
        assert_eq!(
            attribute(&facts, AttributeKind::Location),
            vec![("Boston".to_string(), false), ("Portland".to_string(), true)]
        );

        let facts = extract("I live in New York City now", 0.9);
        assert_eq!(attribute(&facts, AttributeKind::Location), vec![("New York City".to_string(), true)]);
    }

    #[test]
    fn work_statements() {
        let facts = extract("I work as a software engineer at Acme Corp", 0.9);
        assert_eq!(attribute(&facts, AttributeKind::Occupation), vec![("software engineer".to_string(), true)]);

        let facts = extract("I work at Acme Corp.", 0.9);
        assert_eq!(attribute(&facts, AttributeKind::Employer), vec![("Acme Corp".to_string(), true)]);
    }

    #[test]
    fn birthday() {
        let facts = extract("My birthday is March 3rd and I love cake", 0.9);
        assert_eq!(attribute(&facts, AttributeKind::Birthday), vec![("March 3rd".to_string(), true)]);
    }

    #[test]
    fn small_talk_yields_nothing() {
        let facts = extract("What's the weather like today?", 0.9);
        assert!(facts.is_empty());
    }

    #[test]
    fn every_rule_compiles() {
        assert_eq!(RULES.len(), rule_sources().len());
    }

    #[test]
    fn accented_names_are_kept_whole() {
        let facts = extract("my name is José and I have a dog named Müsli", 0.9);
        assert_eq!(names(&facts, EntityType::Person), vec!["José"]);
        assert_eq!(names(&facts, EntityType::Pet), vec!["Müsli"]);

        let facts = extract("I have two cats named Zoë and Åsa", 0.9);
        assert_eq!(names(&facts, EntityType::Pet), vec!["Zoë", "Åsa"]);

        let facts = extract("My name is Chloé Müller", 0.9);
        assert_eq!(names(&facts, EntityType::Person), vec!["Chloé Müller"]);

        let facts = extract("I moved to Zürich", 0.9);
        assert_eq!(attribute(&facts, AttributeKind::Location), vec![("Zürich".to_string(), true)]);
    }

    #[test]
    fn lowercase_accented_name_is_capitalized() {
        let facts = extract("call me élodie", 0.9);
        assert_eq!(facts.preferred_name.map(|(n, _)| n).as_deref(), Some("Élodie"));
    }

    #[test]
    fn tidy_name_rules() {
        assert_eq!(tidy_name(" holly "), "Holly");
        assert_eq!(tidy_name("McDonald,"), "McDonald");
        assert_eq!(tidy_name("new  york"), "New York");
    }
}
