//! In-memory platform and scripted model shared by the pipeline tests.

use async_trait::async_trait;
use homebot_core::{Error, Result};
use homebot_home::{EntityRecord, HomeApi, ServiceCall, ServiceDescriptor};
use homebot_providers::{Prompt, Provider};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

pub struct FakeHome {
    states: Mutex<HashMap<String, EntityRecord>>,
    services: Vec<ServiceDescriptor>,
    rejections: Mutex<VecDeque<(u16, String)>>,
    pub calls: Mutex<Vec<ServiceCall>>,
    pub writes: AtomicU32,
    pub reads: AtomicU32,
    /// When false, service calls succeed but leave the state untouched.
    pub apply_writes: AtomicBool,
    pub down: AtomicBool,
}

impl FakeHome {
    pub fn new(states: Vec<EntityRecord>, services: Vec<ServiceDescriptor>) -> Self {
        Self {
            states: Mutex::new(
                states
                    .into_iter()
                    .map(|s| (s.entity_id.clone(), s))
                    .collect(),
            ),
            services,
            rejections: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            writes: AtomicU32::new(0),
            reads: AtomicU32::new(0),
            apply_writes: AtomicBool::new(true),
            down: AtomicBool::new(false),
        }
    }

    /// Living room fixture: a temperature sensor, a thermostat, a light, a
    /// heater group, a boiler switch and the front door lock.
    pub fn salon() -> Self {
        Self::new(
            vec![
                EntityRecord::new("sensor.salon_sicaklik", "21.5")
                    .with_attribute("friendly_name", json!("Salon Sıcaklık"))
                    .with_attribute("unit_of_measurement", json!("°C")),
                EntityRecord::new("climate.salon", "heat")
                    .with_attribute("friendly_name", json!("Salon Termostat"))
                    .with_attribute("current_temperature", json!(21.5))
                    .with_attribute("temperature", json!(23)),
                EntityRecord::new("light.salon", "off")
                    .with_attribute("friendly_name", json!("Salon Işık"))
                    .with_attribute("supported_features", json!(44)),
                EntityRecord::new("group.salon_petekleri", "off")
                    .with_attribute("friendly_name", json!("Salon Petekleri")),
                EntityRecord::new("switch.kombi", "on")
                    .with_attribute("friendly_name", json!("Kombi")),
                EntityRecord::new("lock.kapi", "locked")
                    .with_attribute("friendly_name", json!("Kapı Kilidi")),
            ],
            vec![
                ServiceDescriptor::new("light", "turn_on").with_field("brightness", false),
                ServiceDescriptor::new("light", "turn_off"),
                ServiceDescriptor::new("light", "toggle"),
                ServiceDescriptor::new("climate", "turn_on"),
                ServiceDescriptor::new("climate", "turn_off"),
                ServiceDescriptor::new("climate", "set_temperature").with_field("temperature", true),
                ServiceDescriptor::new("group", "turn_on"),
                ServiceDescriptor::new("group", "turn_off"),
                ServiceDescriptor::new("group", "reload"),
                ServiceDescriptor::new("switch", "turn_on"),
                ServiceDescriptor::new("switch", "turn_off"),
                ServiceDescriptor::new("lock", "lock"),
                ServiceDescriptor::new("lock", "unlock"),
            ],
        )
    }

    pub fn reject_next(&self, status: u16, body: &str) {
        self.rejections
            .lock()
            .unwrap()
            .push_back((status, body.to_string()));
    }

    pub fn state_of(&self, entity_id: &str) -> Option<String> {
        self.states
            .lock()
            .unwrap()
            .get(entity_id)
            .map(|e| e.state.clone())
    }

    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HomeApi for FakeHome {
    async fn ping(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::DiscoveryUnavailable("connection refused".into()));
        }
        Ok(())
    }

    async fn list_states(&self) -> Result<Vec<EntityRecord>> {
        self.ping().await?;
        let mut all: Vec<EntityRecord> = self.states.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(all)
    }

    async fn get_state(&self, entity_id: &str) -> Result<EntityRecord> {
        self.ping().await?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.states
            .lock()
            .unwrap()
            .get(entity_id)
            .cloned()
            .ok_or_else(|| Error::UnknownEntity(entity_id.to_string()))
    }

    async fn list_services(&self) -> Result<Vec<ServiceDescriptor>> {
        self.ping().await?;
        Ok(self.services.clone())
    }

    async fn call_service(&self, call: &ServiceCall) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::PlatformUnavailable("connection refused".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call.clone());
        if let Some((status, body)) = self.rejections.lock().unwrap().pop_front() {
            return Err(Error::PlatformRejected { status, body });
        }
        if self.apply_writes.load(Ordering::SeqCst) {
            let new_state = match call.service.as_str() {
                "turn_on" if call.domain == "climate" => Some("heat"),
                "turn_on" => Some("on"),
                "turn_off" => Some("off"),
                "lock" => Some("locked"),
                "unlock" => Some("unlocked"),
                _ => None,
            };
            if let Some(state) = new_state {
                if let Some(entity) = self.states.lock().unwrap().get_mut(&call.entity_id) {
                    entity.state = state.to_string();
                }
            }
        }
        Ok(())
    }
}

/// Returns canned completions in order and records every prompt it saw.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String>>>,
    pub prompts: Mutex<Vec<Prompt>>,
    pub calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(error: Error) -> Self {
        let p = Self::new(vec![]);
        p.replies.lock().unwrap().push_back(Err(error));
        p
    }

    pub fn prompt(&self, index: usize) -> Prompt {
        self.prompts.lock().unwrap()[index].clone()
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::provider("script exhausted", false)))
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}
