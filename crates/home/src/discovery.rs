use homebot_core::config::Config;
use homebot_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::client::HomeApi;
use crate::types::{entity_domain, EntityRecord, ServiceDescriptor};

struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

impl<T> Cached<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
        }
    }

    fn fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<Cached<EntityRecord>>>>;

/// Entity-state and service-catalog caches in front of a [`HomeApi`].
///
/// Each entity id has its own slot and lock: concurrent misses on the same
/// id share one fetch, unrelated ids never wait on each other. The service
/// catalog is a single snapshot with a longer TTL.
pub struct Discovery {
    api: Arc<dyn HomeApi>,
    entity_ttl: Duration,
    service_ttl: Duration,
    exposed: HashSet<String>,
    slots: Mutex<HashMap<String, Slot>>,
    listing: tokio::sync::Mutex<Option<Cached<Arc<Vec<EntityRecord>>>>>,
    catalog: tokio::sync::Mutex<Option<Cached<Arc<Vec<ServiceDescriptor>>>>>,
}

impl Discovery {
    pub fn new(api: Arc<dyn HomeApi>, entity_ttl: Duration, service_ttl: Duration) -> Self {
        Self {
            api,
            entity_ttl,
            service_ttl,
            exposed: HashSet::new(),
            slots: Mutex::new(HashMap::new()),
            listing: tokio::sync::Mutex::new(None),
            catalog: tokio::sync::Mutex::new(None),
        }
    }

    pub fn from_config(api: Arc<dyn HomeApi>, config: &Config) -> Self {
        Self::new(
            api,
            Duration::from_secs(config.pipeline.entity_ttl_secs),
            Duration::from_secs(config.pipeline.service_ttl_secs),
        )
        .with_exposed(config.home_assistant.exposed_entities.iter().cloned())
    }

    /// Limits visibility to these ids. An empty set exposes everything.
    pub fn with_exposed(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.exposed = ids
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn api(&self) -> &Arc<dyn HomeApi> {
        &self.api
    }

    fn is_exposed(&self, entity_id: &str) -> bool {
        self.exposed.is_empty() || self.exposed.contains(entity_id)
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn slot(&self, entity_id: &str) -> Slot {
        self.slots()
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    /// Current record for one entity, fetched on miss or expiry.
    pub async fn entity(&self, entity_id: &str) -> Result<EntityRecord> {
        if !self.is_exposed(entity_id) {
            return Err(Error::UnknownEntity(entity_id.to_string()));
        }

        let slot = self.slot(entity_id);
        let mut cached = slot.lock().await;
        if let Some(entry) = cached.as_ref() {
            if entry.fresh(self.entity_ttl) {
                return Ok(entry.value.clone());
            }
        }

        debug!(entity_id, "Entity cache miss");
        let record = match self.api.get_state(entity_id).await {
            Ok(record) => record,
            Err(e @ Error::UnknownEntity(_)) => {
                // Ids the model made up must not pile up as empty slots.
                if cached.is_none() {
                    let mut slots = self.slots();
                    if slots.get(entity_id).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                        slots.remove(entity_id);
                    }
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        *cached = Some(Cached::new(record.clone()));
        Ok(record)
    }

    /// Every visible entity, used for name matching.
    pub async fn entities(&self) -> Result<Arc<Vec<EntityRecord>>> {
        let mut listing = self.listing.lock().await;
        if let Some(entry) = listing.as_ref() {
            if entry.fresh(self.entity_ttl) {
                return Ok(entry.value.clone());
            }
        }

        debug!("Entity list cache miss");
        let states: Vec<EntityRecord> = self
            .api
            .list_states()
            .await?
            .into_iter()
            .filter(|e| self.is_exposed(&e.entity_id))
            .collect();
        let states = Arc::new(states);
        *listing = Some(Cached::new(states.clone()));
        Ok(states)
    }

    async fn catalog(&self) -> Result<Arc<Vec<ServiceDescriptor>>> {
        let mut catalog = self.catalog.lock().await;
        if let Some(entry) = catalog.as_ref() {
            if entry.fresh(self.service_ttl) {
                return Ok(entry.value.clone());
            }
        }

        debug!("Service catalog cache miss");
        let services = Arc::new(self.api.list_services().await?);
        *catalog = Some(Cached::new(services.clone()));
        Ok(services)
    }

    /// Services offered by one domain.
    pub async fn services(&self, domain: &str) -> Result<Vec<ServiceDescriptor>> {
        let catalog = self.catalog().await?;
        Ok(catalog
            .iter()
            .filter(|d| d.domain == domain)
            .cloned()
            .collect())
    }

    pub async fn service(&self, domain: &str, service: &str) -> Result<Option<ServiceDescriptor>> {
        let catalog = self.catalog().await?;
        Ok(catalog
            .iter()
            .find(|d| d.domain == domain && d.service == service)
            .cloned())
    }

    /// Drops cached state for an entity after something acted on it.
    pub async fn invalidate(&self, entity_id: &str) {
        let slot = self.slots().get(entity_id).cloned();
        if let Some(slot) = slot {
            *slot.lock().await = None;
        }
        *self.listing.lock().await = None;
        debug!(entity_id, domain = entity_domain(entity_id), "Entity cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceCall;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingApi {
        get_calls: AtomicU32,
        list_calls: AtomicU32,
        service_calls: AtomicU32,
        down: bool,
        delay_ms: u64,
    }

    #[async_trait]
    impl HomeApi for CountingApi {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn list_states(&self) -> Result<Vec<EntityRecord>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.down {
                return Err(Error::DiscoveryUnavailable("connection refused".into()));
            }
            Ok(vec![
                EntityRecord::new("light.salon", "off"),
                EntityRecord::new("group.salon_petekleri", "off"),
            ])
        }

        async fn get_state(&self, entity_id: &str) -> Result<EntityRecord> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.down {
                return Err(Error::DiscoveryUnavailable("connection refused".into()));
            }
            match entity_id {
                "light.salon" | "group.salon_petekleri" => Ok(EntityRecord::new(entity_id, "off")),
                other => Err(Error::UnknownEntity(other.to_string())),
            }
        }

        async fn list_services(&self) -> Result<Vec<ServiceDescriptor>> {
            self.service_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                ServiceDescriptor::new("light", "turn_on"),
                ServiceDescriptor::new("light", "turn_off"),
                ServiceDescriptor::new("group", "set"),
            ])
        }

        async fn call_service(&self, _call: &ServiceCall) -> Result<()> {
            Ok(())
        }
    }

    fn discovery(api: Arc<CountingApi>) -> Discovery {
        Discovery::new(api, Duration::from_secs(30), Duration::from_secs(600))
    }

    #[tokio::test]
    async fn test_entity_cached_until_invalidated() {
        let api = Arc::new(CountingApi::default());
        let d = discovery(api.clone());
        d.entity("light.salon").await.unwrap();
        d.entity("light.salon").await.unwrap();
        assert_eq!(api.get_calls.load(Ordering::SeqCst), 1);

        d.invalidate("light.salon").await;
        d.entity("light.salon").await.unwrap();
        assert_eq!(api.get_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_ids_leave_no_slot_behind() {
        let api = Arc::new(CountingApi::default());
        let d = discovery(api.clone());
        for id in ["light.uydurma", "switch.hayali", "light.uydurma"] {
            assert!(matches!(d.entity(id).await, Err(Error::UnknownEntity(_))));
        }
        d.invalidate("switch.hayali").await;
        assert!(d.slots().is_empty());

        d.entity("light.salon").await.unwrap();
        assert_eq!(d.slots().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refetches() {
        let api = Arc::new(CountingApi::default());
        let d = Discovery::new(api.clone(), Duration::from_millis(0), Duration::from_secs(600));
        d.entity("light.salon").await.unwrap();
        d.entity("light.salon").await.unwrap();
        assert_eq!(api.get_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let api = Arc::new(CountingApi {
            delay_ms: 30,
            ..CountingApi::default()
        });
        let d = Arc::new(discovery(api.clone()));
        let a = tokio::spawn({
            let d = d.clone();
            async move { d.entity("light.salon").await }
        });
        let b = tokio::spawn({
            let d = d.clone();
            async move { d.entity("light.salon").await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(api.get_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_services_by_domain() {
        let api = Arc::new(CountingApi::default());
        let d = discovery(api.clone());
        let group = d.services("group").await.unwrap();
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].service, "set");
        assert!(d.service("group", "turn_on").await.unwrap().is_none());
        assert!(d.service("light", "turn_on").await.unwrap().is_some());
        assert_eq!(api.service_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_platform() {
        let api = Arc::new(CountingApi {
            down: true,
            ..CountingApi::default()
        });
        let d = discovery(api);
        assert!(matches!(d.entity("light.salon").await, Err(Error::DiscoveryUnavailable(_))));
        assert!(matches!(d.entities().await, Err(Error::DiscoveryUnavailable(_))));
    }

    #[tokio::test]
    async fn test_exposed_entities_filter() {
        let api = Arc::new(CountingApi::default());
        let d = discovery(api.clone()).with_exposed(vec!["light.salon".to_string()]);
        let all = d.entities().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(matches!(
            d.entity("group.salon_petekleri").await,
            Err(Error::UnknownEntity(_))
        ));
        assert_eq!(api.get_calls.load(Ordering::SeqCst), 0);
    }
}
