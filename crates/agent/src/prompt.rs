use homebot_home::{EntityRecord, ServiceDescriptor};
use homebot_providers::Prompt;
use std::collections::BTreeSet;
use std::fmt::Write;

use crate::correction::CommandAttempt;
use crate::intent::IntentClass;

/// Entities listed when nothing in the message matches a name.
const FALLBACK_ENTITY_LIMIT: usize = 100;
/// Shortest shared prefix that counts as a match for inflected words
/// ("peteklerini" vs "petekleri").
const MIN_PREFIX: usize = 4;

const OUTPUT_FORMAT: &str = r#"## Output format
Reply with exactly one JSON object and nothing else.
Read a state:
{"type": "state_query", "entity_id": "<entity_id>"}
Change something:
{"type": "service_call", "domain": "<domain>", "service": "<service>", "entity_id": "<entity_id>", "data": {}}"#;

const RULES: &str = r#"## Rules
1. Questions (kaç, nedir, açık mı, "?") are state reads: answer with state_query and never change anything.
2. Use only entity ids listed below. Never invent one.
3. The domain is the part of the entity id before the dot. Pick a service listed for that domain.
4. group.* entities only accept services of the group domain. Do not use light or climate services on a group.
5. Put extra parameters in "data" and include every required field."#;

/// Lowercases and folds Turkish letters to ASCII so that "Sıcaklığı"
/// lines up with `sensor.salon_sicaklik`.
fn fold(text: &str) -> String {
    text.chars()
        .flat_map(|c| c.to_lowercase())
        .map(|c| match c {
            'ı' => 'i',
            'ğ' => 'g',
            'ü' => 'u',
            'ş' => 's',
            'ö' => 'o',
            'ç' => 'c',
            'â' => 'a',
            'î' => 'i',
            'û' => 'u',
            other => other,
        })
        .filter(|c| *c != '\u{307}')
        .collect()
}

fn tokens(text: &str) -> Vec<String> {
    fold(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_string)
        .collect()
}

fn common_prefix(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

fn token_score(word: &str, name_token: &str) -> u32 {
    if word == name_token {
        return 3;
    }
    let shared = common_prefix(word, name_token);
    if shared >= MIN_PREFIX && shared + 3 >= name_token.chars().count().min(word.chars().count()) {
        return 2;
    }
    0
}

fn entity_tokens(entity: &EntityRecord) -> Vec<String> {
    let object_id = entity
        .entity_id
        .split_once('.')
        .map(|(_, o)| o)
        .unwrap_or(&entity.entity_id);
    let mut out = tokens(object_id);
    if let Some(name) = entity.friendly_name() {
        out.extend(tokens(name));
    }
    out.sort();
    out.dedup();
    out
}

/// Ranks entities by how well their id and friendly name match the words
/// of the message. Entities with no match are dropped.
pub fn match_entities<'a>(
    message: &str,
    entities: &'a [EntityRecord],
    limit: usize,
) -> Vec<&'a EntityRecord> {
    let words = tokens(message);
    let mut scored: Vec<(u32, &EntityRecord)> = entities
        .iter()
        .filter_map(|e| {
            let names = entity_tokens(e);
            let score: u32 = words
                .iter()
                .map(|w| names.iter().map(|n| token_score(w, n)).max().unwrap_or(0))
                .sum();
            (score > 0).then_some((score, e))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.entity_id.cmp(&b.1.entity_id)));
    scored.into_iter().take(limit).map(|(_, e)| e).collect()
}

/// Domains whose services the prompt should list.
pub fn implicated_domains(entities: &[&EntityRecord]) -> Vec<String> {
    entities
        .iter()
        .map(|e| e.domain().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Assembles prompts from already-fetched data. Does no I/O.
pub struct PromptBuilder {
    persona: String,
}

impl PromptBuilder {
    pub fn new(persona: &str) -> Self {
        Self {
            persona: persona.trim().to_string(),
        }
    }

    /// `matched` are the name-matched entities; when empty, `known` is
    /// listed compactly instead. `corrections` holds every failed attempt
    /// so far, oldest first.
    pub fn build(
        &self,
        message: &str,
        hint: IntentClass,
        matched: &[&EntityRecord],
        known: &[EntityRecord],
        services: &[ServiceDescriptor],
        corrections: &[CommandAttempt],
    ) -> Prompt {
        let mut system = String::new();
        if !self.persona.is_empty() {
            system.push_str(&self.persona);
            system.push_str("\n\n");
        }
        system.push_str(
            "You control a Home Assistant installation. Turn the user's message into one command.\n\n",
        );
        system.push_str(OUTPUT_FORMAT);
        system.push_str("\n\n");
        system.push_str(RULES);

        let mut user = String::new();
        let _ = writeln!(user, "Message: {}", message.trim());
        let _ = writeln!(
            user,
            "Message looks like: {}",
            match hint {
                IntentClass::Question => "a question (read state, change nothing)",
                IntentClass::Action => "an action request",
            }
        );

        if matched.is_empty() {
            let _ = writeln!(user, "\n## Known entities");
            for e in known.iter().take(FALLBACK_ENTITY_LIMIT) {
                let _ = writeln!(
                    user,
                    "- {} ({})",
                    e.entity_id,
                    e.friendly_name().unwrap_or(&e.entity_id)
                );
            }
        } else {
            let _ = writeln!(user, "\n## Relevant entities");
            for e in matched {
                let _ = writeln!(user, "- {}", e.describe());
                let attrs = serde_json::Value::Object(e.attributes.clone());
                let _ = writeln!(user, "  attributes: {}", attrs);
            }
        }

        if !services.is_empty() {
            let _ = writeln!(user, "\n## Available services");
            for s in services {
                let _ = write!(user, "- {}.{}", s.domain, s.service);
                if !s.fields.is_empty() {
                    let fields: Vec<String> = s
                        .fields
                        .iter()
                        .map(|(name, f)| {
                            format!("{} ({})", name, if f.required { "required" } else { "optional" })
                        })
                        .collect();
                    let _ = write!(user, " fields: {}", fields.join(", "));
                }
                let _ = writeln!(user);
            }
        }

        if !corrections.is_empty() {
            let _ = writeln!(user, "\n## Previous attempts failed");
            for attempt in corrections {
                let command = attempt
                    .intent
                    .as_ref()
                    .map(|i| i.to_command_json().to_string())
                    .unwrap_or_else(|| attempt.raw_output.trim().to_string());
                let _ = writeln!(user, "Attempt {} command: {}", attempt.attempt, command);
                let _ = writeln!(user, "Error: {}", attempt.error);
            }
            let _ = writeln!(
                user,
                "Fix the command using the error above. Do not repeat a command that failed."
            );
        }

        Prompt { system, user }
    }
}
