use crate::adapters::pubsub::PubSub;
use crate::adapters::store::ChatStore;
use crate::config::HealthConfig;
use opentelemetry::{KeyValue, global, metrics::Gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Clone, Debug)]
struct Metrics {
    status: Gauge<i64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            status: meter
                .i64_gauge("parley_health_status")
                .with_description("Status of health checks (1 for ok, 0 for error)")
                .build(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HealthService {
    store: Arc<dyn ChatStore>,
    pubsub: Arc<dyn PubSub>,
    config: HealthConfig,
    metrics: Metrics,
}

impl HealthService {
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>, pubsub: Arc<dyn PubSub>, config: HealthConfig) -> Self {
        Self { store, pubsub, config, metrics: Metrics::new() }
    }

    /// Checks store connectivity.
    ///
    /// # Errors
    /// Returns a string describing the failure if the store is unreachable.
    pub async fn check_store(&self) -> Result<(), String> {
        let store_timeout = Duration::from_millis(self.config.store_timeout_ms);

        let result = match timeout(store_timeout, self.store.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("Store connection failed: {e}")),
            Err(_) => Err("Store connection timed out".to_string()),
        };
        self.record("store", result.is_ok());
        result
    }

    /// Checks pub/sub connectivity.
    ///
    /// # Errors
    /// Returns a string describing the failure if the bus is unreachable.
    pub async fn check_pubsub(&self) -> Result<(), String> {
        let pubsub_timeout = Duration::from_millis(self.config.pubsub_timeout_ms);

        let result = match timeout(pubsub_timeout, self.pubsub.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("PubSub connection failed: {e}")),
            Err(_) => Err("PubSub connection timed out".to_string()),
        };
        self.record("pubsub", result.is_ok());
        result
    }

    fn record(&self, component: &'static str, healthy: bool) {
        self.metrics.status.record(i64::from(healthy), &[KeyValue::new("component", component)]);
    }
}
