use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Domain of an entity id: everything before the first '.'.
pub fn entity_domain(entity_id: &str) -> &str {
    entity_id.split_once('.').map(|(d, _)| d).unwrap_or("")
}

/// Shape of one entry of `GET /api/states`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityRecord {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub last_changed: Option<String>,
}

impl EntityRecord {
    pub fn new(entity_id: &str, state: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            state: state.to_string(),
            attributes: Map::new(),
            last_changed: None,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn domain(&self) -> &str {
        entity_domain(&self.entity_id)
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get("friendly_name").and_then(|v| v.as_str())
    }

    pub fn supported_features(&self) -> u64 {
        self.attributes
            .get("supported_features")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    /// `"temperature: 21.5 °C"`-style summary used in prompts and replies.
    pub fn describe(&self) -> String {
        let unit = self
            .attributes
            .get("unit_of_measurement")
            .and_then(|v| v.as_str())
            .map(|u| format!(" {}", u))
            .unwrap_or_default();
        format!(
            "{} ({}) = {}{}",
            self.entity_id,
            self.friendly_name().unwrap_or(&self.entity_id),
            self.state,
            unit
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServiceField {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDescriptor {
    pub domain: String,
    pub service: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: BTreeMap<String, ServiceField>,
}

impl ServiceDescriptor {
    pub fn new(domain: &str, service: &str) -> Self {
        Self {
            domain: domain.to_string(),
            service: service.to_string(),
            description: String::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, required: bool) -> Self {
        self.fields.insert(
            name.to_string(),
            ServiceField {
                required,
                description: String::new(),
            },
        );
        self
    }

    /// Required fields other than `entity_id`, which every call carries.
    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(name, f)| f.required && name.as_str() != "entity_id")
            .map(|(name, _)| name.as_str())
    }

    /// Flattens the `GET /api/services` payload:
    /// `[{"domain": "light", "services": {"turn_on": {"fields": {...}}}}]`.
    pub fn parse_catalog(body: &Value) -> Vec<ServiceDescriptor> {
        let mut out = Vec::new();
        let Some(domains) = body.as_array() else {
            return out;
        };
        for entry in domains {
            let Some(domain) = entry.get("domain").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(services) = entry.get("services").and_then(|v| v.as_object()) else {
                continue;
            };
            for (service, schema) in services {
                let mut desc = ServiceDescriptor::new(domain, service);
                desc.description = schema
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                if let Some(fields) = schema.get("fields").and_then(|v| v.as_object()) {
                    for (name, field) in fields {
                        desc.fields.insert(
                            name.clone(),
                            ServiceField {
                                required: field
                                    .get("required")
                                    .and_then(|v| v.as_bool())
                                    .unwrap_or(false),
                                description: field
                                    .get("description")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or("")
                                    .to_string(),
                            },
                        );
                    }
                }
                out.push(desc);
            }
        }
        out
    }
}

/// Parameters of `POST /api/services/{domain}/{service}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub entity_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ServiceCall {
    /// Request body: `data` plus `entity_id`.
    pub fn body(&self) -> Value {
        let mut body = self.data.clone();
        body.insert("entity_id".to_string(), Value::String(self.entity_id.clone()));
        Value::Object(body)
    }
}
