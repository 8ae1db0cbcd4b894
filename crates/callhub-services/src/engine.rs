//! Engine wiring and lifecycle
//!
//! `Engine` owns the shared registries and services for one process. It is
//! cheap to clone and is handed to the HTTP layer as application data.

use crate::background::BackgroundTasks;
use crate::call_store::CallRecordStore;
use crate::gateway::CallResponseGateway;
use crate::orchestrator::CallOrchestrator;
use crate::registry::ConnectionRegistry;
use crate::retry::RetryPolicy;
use crate::ring_timer::RingTimers;
use crate::twiml::CallbackUrls;
use crate::webhook::WebhookResponder;
use callhub_core::traits::{
    CallRecordRepository, DedupeStore, DestinationDirectory, ProviderControl,
};
use callhub_core::EngineConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// External seams the engine talks to
pub struct EngineCollaborators {
    pub repository: Arc<dyn CallRecordRepository>,
    pub directory: Arc<dyn DestinationDirectory>,
    pub dedupe: Arc<dyn DedupeStore>,
    pub provider: Arc<dyn ProviderControl>,
}

#[derive(Clone)]
pub struct Engine {
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<CallRecordStore>,
    pub orchestrator: Arc<CallOrchestrator>,
    pub responder: Arc<WebhookResponder>,
    pub gateway: Arc<CallResponseGateway>,
    config: EngineConfig,
    tasks: BackgroundTasks,
    timers: RingTimers,
    dedupe: Arc<dyn DedupeStore>,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        urls: CallbackUrls,
        hold_music_url: Option<String>,
        collaborators: EngineCollaborators,
    ) -> Self {
        let tasks = BackgroundTasks::new();
        let timers = RingTimers::new();
        let registry = Arc::new(ConnectionRegistry::new());

        let store = Arc::new(CallRecordStore::new(
            collaborators.repository,
            collaborators.dedupe.clone(),
            RetryPolicy::from_config(&config),
            config.dedupe_bucket_secs,
        ));

        let orchestrator = Arc::new(CallOrchestrator::new(
            store.clone(),
            registry.clone(),
            timers.clone(),
            collaborators.provider,
            tasks.clone(),
            urls.clone(),
            config.clone(),
        ));

        let responder = Arc::new(WebhookResponder::new(
            collaborators.directory,
            orchestrator.clone(),
            registry.clone(),
            tasks.clone(),
            urls,
            config.clone(),
            hold_music_url,
        ));

        let gateway = Arc::new(CallResponseGateway::new(orchestrator.clone()));

        Self {
            registry,
            store,
            orchestrator,
            responder,
            gateway,
            config,
            tasks,
            timers,
            dedupe: collaborators.dedupe,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawn the dedupe sweep and the settled-session eviction loops
    pub fn start_maintenance(&self) {
        let dedupe = self.dedupe.clone();
        let shutdown = self.shutdown.clone();
        let sweep_every = self.config.dedupe_sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => match dedupe.sweep().await {
                        Ok(0) => {}
                        Ok(removed) => debug!(removed, "Dedupe sweep"),
                        Err(e) => warn!(error = %e, "Dedupe sweep failed"),
                    },
                }
            }
            debug!("Dedupe sweeper stopped");
        });

        let orchestrator = self.orchestrator.clone();
        let shutdown = self.shutdown.clone();
        let evict_every = self.config.dedupe_sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(evict_every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = orchestrator.evict_settled();
                        if evicted > 0 {
                            debug!(evicted, "Settled sessions evicted");
                        }
                    }
                }
            }
            debug!("Session eviction stopped");
        });

        info!(
            sweep_secs = sweep_every.as_secs(),
            retention_secs = self.config.session_retention_secs,
            "Engine maintenance started"
        );
    }

    /// Stop maintenance, cancel ring timers and drain background jobs.
    ///
    /// Returns `false` if jobs were still running after `grace`.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shutdown.cancel();
        let cancelled = self.timers.cancel_all();
        let in_flight = self.tasks.in_flight();
        info!(cancelled_timers = cancelled, in_flight, "Engine shutting down");
        self.tasks.drain(grace).await
    }

    /// Wait for every outstanding background job
    pub async fn settle(&self) {
        self.tasks.settle().await;
    }

    pub fn online_users(&self) -> usize {
        self.registry.online_users()
    }

    pub fn active_sessions(&self) -> usize {
        self.store.active_sessions()
    }

    pub fn background_jobs(&self) -> usize {
        self.tasks.in_flight()
    }
}
