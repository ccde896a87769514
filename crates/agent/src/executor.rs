use homebot_core::{Error, Result};
use homebot_home::{Discovery, EntityRecord, ServiceCall};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::command::Intent;

/// Result of executing one intent.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Read-only answer.
    State { entity: EntityRecord },
    /// Nothing to do; no call was made.
    AlreadyInState { entity: EntityRecord },
    /// Dispatched. `warning` is set when the re-read state does not match
    /// the expected one.
    Executed {
        call: ServiceCall,
        entity: Option<EntityRecord>,
        warning: Option<String>,
    },
    /// Dry-run mode: logged, not sent.
    DryRun { call: ServiceCall },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::State { .. } => "state",
            Outcome::AlreadyInState { .. } => "already_in_state",
            Outcome::Executed { warning: None, .. } => "executed",
            Outcome::Executed { warning: Some(_), .. } => "executed_unverified",
            Outcome::DryRun { .. } => "dry_run",
        }
    }
}

/// State an entity should be in after a service ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expected {
    Is(&'static str),
    /// Any state but this one (and not unavailable/unknown). Thermostats
    /// report their hvac mode rather than "on".
    IsNot(&'static str),
}

impl Expected {
    fn matches(&self, state: &str) -> bool {
        match self {
            Expected::Is(s) => state == *s,
            Expected::IsNot(s) => state != *s && state != "unavailable" && state != "unknown",
        }
    }

    fn describe(&self) -> String {
        match self {
            Expected::Is(s) => format!("'{}'", s),
            Expected::IsNot(s) => format!("anything but '{}'", s),
        }
    }
}

fn expected_state(domain: &str, service: &str) -> Option<Expected> {
    let hvac_like = matches!(domain, "climate" | "water_heater" | "media_player");
    match service {
        "turn_on" if hvac_like => Some(Expected::IsNot("off")),
        "turn_on" => Some(Expected::Is("on")),
        "turn_off" => Some(Expected::Is("off")),
        "lock" => Some(Expected::Is("locked")),
        "unlock" => Some(Expected::Is("unlocked")),
        "open_cover" => Some(Expected::Is("open")),
        "close_cover" => Some(Expected::Is("closed")),
        _ => None,
    }
}

/// Runs validated intents against the platform through [`Discovery`].
pub struct Executor {
    discovery: Arc<Discovery>,
    dry_run: bool,
    verify_delay: Duration,
}

impl Executor {
    pub fn new(discovery: Arc<Discovery>, dry_run: bool, verify_delay: Duration) -> Self {
        Self {
            discovery,
            dry_run,
            verify_delay,
        }
    }

    pub async fn execute(&self, intent: &Intent) -> Result<Outcome> {
        let Some(call) = intent.to_service_call() else {
            let entity = self.discovery.entity(intent.entity_id()).await?;
            return Ok(Outcome::State { entity });
        };

        let expected = expected_state(&call.domain, &call.service);

        // Extra data (brightness, colour) may still change something on an
        // entity that is already in the target state.
        if let (true, Some(expected)) = (call.data.is_empty(), expected) {
            let current = self.discovery.entity(&call.entity_id).await?;
            if expected.matches(&current.state) {
                info!(
                    entity_id = %call.entity_id,
                    state = %current.state,
                    service = %call.service,
                    "Entity already in requested state, skipping call"
                );
                return Ok(Outcome::AlreadyInState { entity: current });
            }
        }

        if self.dry_run {
            info!(
                domain = %call.domain,
                service = %call.service,
                entity_id = %call.entity_id,
                data = %serde_json::Value::Object(call.data.clone()),
                "Dry-run: service call not sent"
            );
            return Ok(Outcome::DryRun { call });
        }

        self.discovery.api().call_service(&call).await?;
        self.discovery.invalidate(&call.entity_id).await;

        let Some(expected) = expected else {
            return Ok(Outcome::Executed {
                call,
                entity: None,
                warning: None,
            });
        };

        if !self.verify_delay.is_zero() {
            tokio::time::sleep(self.verify_delay).await;
        }

        match self.discovery.entity(&call.entity_id).await {
            Ok(entity) => {
                let warning = (!expected.matches(&entity.state)).then(|| {
                    warn!(
                        entity_id = %call.entity_id,
                        state = %entity.state,
                        "State after service call does not match"
                    );
                    format!(
                        "expected {} after {}.{}, but {} is '{}'",
                        expected.describe(),
                        call.domain,
                        call.service,
                        entity.entity_id,
                        entity.state
                    )
                });
                Ok(Outcome::Executed {
                    call,
                    entity: Some(entity),
                    warning,
                })
            }
            Err(Error::DiscoveryUnavailable(e)) => Ok(Outcome::Executed {
                warning: Some(format!("could not re-read {}: {}", call.entity_id, e)),
                call,
                entity: None,
            }),
            Err(e) => Err(e),
        }
    }
}
