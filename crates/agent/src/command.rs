use homebot_core::{Error, Result};
use homebot_home::{entity_domain, Discovery, ServiceCall};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// What the model asked for, after parsing. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    StateQuery {
        entity_id: String,
    },
    ServiceCommand {
        domain: String,
        service: String,
        entity_id: String,
        data: Map<String, Value>,
    },
}

impl Intent {
    pub fn entity_id(&self) -> &str {
        match self {
            Intent::StateQuery { entity_id } => entity_id,
            Intent::ServiceCommand { entity_id, .. } => entity_id,
        }
    }

    pub fn to_service_call(&self) -> Option<ServiceCall> {
        match self {
            Intent::StateQuery { .. } => None,
            Intent::ServiceCommand {
                domain,
                service,
                entity_id,
                data,
            } => Some(ServiceCall {
                domain: domain.clone(),
                service: service.clone(),
                entity_id: entity_id.clone(),
                data: data.clone(),
            }),
        }
    }

    pub fn from_service_call(call: ServiceCall) -> Self {
        Intent::ServiceCommand {
            domain: call.domain,
            service: call.service,
            entity_id: call.entity_id,
            data: call.data,
        }
    }

    /// Canonical structured form, as shown back to the model.
    pub fn to_command_json(&self) -> Value {
        match self {
            Intent::StateQuery { entity_id } => serde_json::json!({
                "type": "state_query",
                "entity_id": entity_id,
            }),
            Intent::ServiceCommand {
                domain,
                service,
                entity_id,
                data,
            } => serde_json::json!({
                "type": "service_call",
                "domain": domain,
                "service": service,
                "entity_id": entity_id,
                "data": data,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Structured(StructuredCommand),
    Legacy(LegacyCommand),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StructuredCommand {
    #[serde(alias = "query", alias = "get_state")]
    StateQuery { entity_id: String },
    #[serde(alias = "call_service", alias = "service")]
    ServiceCall {
        #[serde(default)]
        domain: Option<String>,
        service: String,
        entity_id: String,
        #[serde(default)]
        data: Option<Map<String, Value>>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Older output format: `{"entities": ["light.salon"], "action": "turn_on"}`.
#[derive(Debug, Deserialize)]
struct LegacyCommand {
    entities: OneOrMany,
    action: String,
    #[serde(default)]
    data: Option<Map<String, Value>>,
}

const QUERY_ACTIONS: &[&str] = &["query", "state", "status", "get_state", "read", "durum"];

fn legacy_service(action: &str) -> &str {
    match action {
        "on" | "aç" | "ac" | "open" => "turn_on",
        "off" | "kapat" | "close" => "turn_off",
        other => other,
    }
}

/// `"light.turn_on"` carries its own domain; a bare `"turn_on"` takes the
/// entity's.
fn split_service(service: &str, entity_id: &str) -> (String, String) {
    match service.split_once('.') {
        Some((domain, svc)) if !domain.is_empty() && !svc.is_empty() => {
            (domain.to_string(), svc.to_string())
        }
        _ => (entity_domain(entity_id).to_string(), service.to_string()),
    }
}

impl RawCommand {
    fn into_intent(self) -> Result<Intent> {
        match self {
            RawCommand::Structured(StructuredCommand::StateQuery { entity_id }) => {
                Ok(Intent::StateQuery {
                    entity_id: require_entity(entity_id)?,
                })
            }
            RawCommand::Structured(StructuredCommand::ServiceCall {
                domain,
                service,
                entity_id,
                data,
            }) => {
                let entity_id = require_entity(entity_id)?;
                let service = service.trim().to_string();
                if service.is_empty() {
                    return Err(Error::MalformedCommand("service is empty".to_string()));
                }
                let (domain, service) = match domain.map(|d| d.trim().to_string()) {
                    Some(d) if !d.is_empty() => (d, service),
                    _ => split_service(&service, &entity_id),
                };
                Ok(Intent::ServiceCommand {
                    domain,
                    service,
                    entity_id,
                    data: data.unwrap_or_default(),
                })
            }
            RawCommand::Legacy(legacy) => {
                let entity_id = match legacy.entities {
                    OneOrMany::One(id) => id,
                    OneOrMany::Many(ids) if ids.len() == 1 => ids.into_iter().next().unwrap_or_default(),
                    OneOrMany::Many(ids) if ids.is_empty() => {
                        return Err(Error::MalformedCommand("entities is empty".to_string()))
                    }
                    OneOrMany::Many(ids) => {
                        return Err(Error::MalformedCommand(format!(
                            "one entity per command, got {}",
                            ids.len()
                        )))
                    }
                };
                let entity_id = require_entity(entity_id)?;
                let action = legacy.action.trim().to_lowercase();
                if QUERY_ACTIONS.contains(&action.as_str()) {
                    return Ok(Intent::StateQuery { entity_id });
                }
                let (domain, service) = split_service(legacy_service(&action), &entity_id);
                Ok(Intent::ServiceCommand {
                    domain,
                    service,
                    entity_id,
                    data: legacy.data.unwrap_or_default(),
                })
            }
        }
    }
}

fn require_entity(entity_id: String) -> Result<String> {
    let entity_id = entity_id.trim().to_string();
    if entity_domain(&entity_id).is_empty() {
        return Err(Error::MalformedCommand(format!(
            "'{}' is not an entity id (expected domain.object_id)",
            entity_id
        )));
    }
    Ok(entity_id)
}

/// Balanced `{...}` opening at byte `start`, skipping braces inside strings.
fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Balanced objects in order of their opening brace. Tolerates code fences
/// and prose around the command, stray braces in the prose included.
fn json_objects(text: &str) -> impl Iterator<Item = &str> {
    text.match_indices('{')
        .filter_map(move |(start, _)| balanced_object(text, start))
}

/// Parses raw model output into an [`Intent`]. The first object that
/// decodes as a command wins.
pub fn parse(llm_output: &str) -> Result<Intent> {
    let mut first_error = None;
    for candidate in json_objects(llm_output) {
        match serde_json::from_str::<RawCommand>(candidate) {
            Ok(raw) => {
                let intent = raw.into_intent()?;
                debug!(?intent, "Parsed command");
                return Ok(intent);
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    Err(match first_error {
        Some(e) => Error::MalformedCommand(format!(
            "expected {{type, domain, service, entity_id, data}} or {{entities, action}}: {}",
            e
        )),
        None => Error::MalformedCommand("no JSON object found in model output".to_string()),
    })
}

/// Checks an intent against what the platform actually offers. Never
/// rewrites the intent: a mismatch is an error for the model to fix.
pub async fn validate(intent: Intent, discovery: &Discovery) -> Result<Intent> {
    let entity = discovery.entity(intent.entity_id()).await?;

    let (domain, service, data) = match &intent {
        Intent::StateQuery { .. } => return Ok(intent.clone()),
        Intent::ServiceCommand {
            domain,
            service,
            data,
            ..
        } => (domain, service, data),
    };

    if domain != entity.domain() {
        return Err(Error::UnsupportedService {
            domain: domain.clone(),
            service: service.clone(),
            reason: format!(
                "{} belongs to domain '{}'; use a '{}' service",
                entity.entity_id,
                entity.domain(),
                entity.domain()
            ),
        });
    }

    let Some(descriptor) = discovery.service(domain, service).await? else {
        let available: Vec<String> = discovery
            .services(domain)
            .await?
            .into_iter()
            .map(|d| d.service)
            .collect();
        return Err(Error::UnsupportedService {
            domain: domain.clone(),
            service: service.clone(),
            reason: format!(
                "not offered by domain '{}'; available: {}",
                domain,
                if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                }
            ),
        });
    };

    let missing: Vec<&str> = descriptor
        .required_fields()
        .filter(|f| !data.contains_key(*f))
        .collect();
    if !missing.is_empty() {
        return Err(Error::UnsupportedService {
            domain: domain.clone(),
            service: service.clone(),
            reason: format!("missing required field(s): {}", missing.join(", ")),
        });
    }

    Ok(intent)
}
