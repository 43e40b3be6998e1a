#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod session;
pub mod telemetry;

use crate::adapters::database::{DbPool, PgStore};
use crate::adapters::memory::MemoryStore;
use crate::adapters::pubsub::{LocalPubSub, PubSub};
use crate::adapters::redis::RedisClient;
use crate::adapters::store::ChatStore;
use crate::config::{Config, StoreBackend};
use crate::services::ServiceContainer;
use crate::services::assignment_service::AssignmentService;
use crate::services::conversation_service::ConversationService;
use crate::services::health_service::HealthService;
use crate::services::message_service::MessageService;
use crate::services::read_state_service::ReadStateService;
use crate::services::subscription::SubscriptionManager;
use std::sync::Arc;
use tokio::sync::watch;

/// Applies pending schema migrations.
///
/// # Errors
/// Returns an error if a migration fails.
pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    sqlx::migrate!().run(pool).await?;
    Ok(())
}

/// Builds the configured store, connecting and migrating if it is Postgres.
///
/// # Errors
/// Returns an error if the database is unreachable, unconfigured or cannot be migrated.
pub async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn ChatStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let url = config
                .store
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("--database-url is required for the postgres backend"))?;
            let pool = adapters::database::init_pool(&config.store, url).await?;
            run_migrations(&pool).await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}

/// Builds the configured pub/sub bus: Redis when a URL is set, otherwise in-process.
///
/// # Errors
/// Returns an error if Redis is configured but unreachable.
pub async fn connect_pubsub(config: &Config, shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<Arc<dyn PubSub>> {
    match config.pubsub.url.as_deref() {
        Some(url) => {
            let client: Arc<dyn PubSub> = RedisClient::new(url, &config.pubsub, shutdown_rx).await?;
            Ok(client)
        }
        None => {
            tracing::info!("No pubsub URL configured, using the in-process bus");
            Ok(Arc::new(LocalPubSub::new(config.pubsub.channel_capacity)))
        }
    }
}

#[derive(Debug)]
pub struct App {
    pub services: ServiceContainer,
    pub health_service: HealthService,
}

#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    store: Option<Arc<dyn ChatStore>>,
    pubsub: Option<Arc<dyn PubSub>>,
    shutdown_rx: Option<watch::Receiver<bool>>,
}

impl AppBuilder {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config, store: None, pubsub: None, shutdown_rx: None }
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ChatStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_pubsub(mut self, pubsub: Arc<dyn PubSub>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    #[must_use]
    pub fn with_shutdown_rx(mut self, shutdown_rx: watch::Receiver<bool>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Wires every service. Must run inside a Tokio runtime.
    ///
    /// # Errors
    /// Returns an error if the store, pub/sub or shutdown receiver is missing.
    pub fn build(self) -> anyhow::Result<App> {
        let store = self.store.ok_or_else(|| anyhow::anyhow!("Store is required"))?;
        let pubsub = self.pubsub.ok_or_else(|| anyhow::anyhow!("PubSub is required"))?;
        let shutdown_rx = self.shutdown_rx.ok_or_else(|| anyhow::anyhow!("Shutdown receiver is required"))?;

        let subscription_manager =
            Arc::new(SubscriptionManager::new(Arc::clone(&pubsub), &self.config.notifications, shutdown_rx));

        let conversation_service = ConversationService::new(Arc::clone(&store), Arc::clone(&subscription_manager));
        let message_service = MessageService::new(
            Arc::clone(&store),
            conversation_service.clone(),
            Arc::clone(&subscription_manager),
            self.config.messaging.clone(),
        );
        let read_state_service = ReadStateService::new(
            Arc::clone(&store),
            conversation_service.clone(),
            Arc::clone(&subscription_manager),
        );
        let assignment_service = AssignmentService::new(Arc::clone(&store), Arc::clone(&subscription_manager));
        let health_service = HealthService::new(store, pubsub, self.config.health.clone());

        let services = ServiceContainer {
            conversation_service,
            message_service,
            read_state_service,
            assignment_service,
            subscription_manager,
            health_service: health_service.clone(),
        };

        Ok(App { services, health_service })
    }
}

/// Flips the shutdown channel on SIGINT or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }

        tracing::info!("Shutdown signal received, starting graceful shutdown");
        let _ = shutdown_tx.send(true);
    });
}

/// Routes panics through tracing so they reach the configured log sink.
pub fn setup_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info.location().map(ToString::to_string).unwrap_or_default();
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_default();
        tracing::error!(panic.location = %location, panic.payload = %payload, "Thread panicked");
    }));
}
