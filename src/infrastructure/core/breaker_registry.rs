use crate::infrastructure::core::circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig,
};
use crate::infrastructure::event_bus::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Process-wide set of breakers, one per dependency name.
///
/// Constructed once at startup and injected; `clear` is called on shutdown.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
    defaults: CircuitBreakerConfig,
    event_bus: Option<EventBus>,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            defaults,
            event_bus: None,
        }
    }

    /// Breakers created after this call publish trip events on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn defaults(&self) -> &CircuitBreakerConfig {
        &self.defaults
    }

    /// Return the breaker for `name`, creating it with the default config.
    pub async fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.defaults).await
    }

    /// Return the breaker for `name`, creating it with `config` if absent.
    ///
    /// An existing breaker keeps its original config.
    pub async fn get_or_create_with(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().await.get(name) {
            return existing.clone();
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("CircuitBreakerRegistry: created breaker [{}]", name);
                let breaker = CircuitBreaker::with_config(name, config);
                let breaker = match &self.event_bus {
                    Some(bus) => breaker.with_event_bus(bus.clone()),
                    None => breaker,
                };
                Arc::new(breaker)
            })
            .clone()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshots of every breaker, sorted by name.
    pub async fn snapshot_all(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            snapshots.push(breaker.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub async fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();
        for breaker in breakers {
            breaker.reset().await;
        }
    }

    /// Drop every breaker. Holders of an `Arc` keep their instance.
    pub async fn clear(&self) {
        let mut breakers = self.breakers.write().await;
        info!("CircuitBreakerRegistry: clearing {} breakers", breakers.len());
        breakers.clear();
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
