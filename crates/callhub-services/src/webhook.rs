//! Webhook responder
//!
//! Answers provider callbacks inside the provider's deadline. The only
//! awaited external call is the bounded destination lookup on `incoming`;
//! session creation, transitions, notification and persistence are handed
//! to the orchestrator as a background job after the document is built.

use crate::background::BackgroundTasks;
use crate::orchestrator::{CallOrchestrator, CallRoute};
use crate::registry::ConnectionRegistry;
use crate::twiml::{CallbackUrls, ControlDocument, DialTarget};
use callhub_core::models::{
    DestinationOwner, ProviderEvent, ProviderEventKind, QueueResult, WebhookKind,
};
use callhub_core::traits::DestinationDirectory;
use callhub_core::{AppError, EngineConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Hard ceiling on building a response; the provider gives up at 5s
pub const RESPONSE_DEADLINE: Duration = Duration::from_secs(4);

const MAX_VOICEMAIL_SECS: u32 = 120;
const HOLD_PAUSE_SECS: u32 = 10;

/// Builds the immediate control document for each provider callback
pub struct WebhookResponder {
    directory: Arc<dyn DestinationDirectory>,
    orchestrator: Arc<CallOrchestrator>,
    registry: Arc<ConnectionRegistry>,
    tasks: BackgroundTasks,
    urls: CallbackUrls,
    config: EngineConfig,
    hold_music_url: Option<String>,
}

impl WebhookResponder {
    pub fn new(
        directory: Arc<dyn DestinationDirectory>,
        orchestrator: Arc<CallOrchestrator>,
        registry: Arc<ConnectionRegistry>,
        tasks: BackgroundTasks,
        urls: CallbackUrls,
        config: EngineConfig,
        hold_music_url: Option<String>,
    ) -> Self {
        Self {
            directory,
            orchestrator,
            registry,
            tasks,
            urls,
            config,
            hold_music_url,
        }
    }

    /// Build the response document and schedule the event's side effects
    #[instrument(skip(self, event), fields(call_id = %event.call_id, event = event.label()))]
    pub async fn respond(&self, event: ProviderEvent) -> ControlDocument {
        let document = match tokio::time::timeout(RESPONSE_DEADLINE, self.plan(&event)).await {
            Ok(document) => document,
            Err(_) => {
                let e = AppError::ProviderTimeout(event.call_id.clone());
                error!(error = %e, "Response deadline exceeded; answering with fallback");
                if event.kind == ProviderEventKind::Incoming {
                    self.orchestrator
                        .remember_route(&event.call_id, CallRoute::Unavailable);
                    self.unavailable()
                } else {
                    ControlDocument::new()
                }
            }
        };

        let orchestrator = self.orchestrator.clone();
        let call_id = event.call_id.clone();
        self.tasks.spawn(event.label(), &call_id, async move {
            orchestrator.handle_event(event).await
        });

        document
    }

    async fn plan(&self, event: &ProviderEvent) -> ControlDocument {
        match &event.kind {
            ProviderEventKind::Incoming => {
                let owner = match event.to.as_deref() {
                    Some(address) => self.lookup_owner(address).await,
                    None => {
                        warn!("Incoming call without a destination address");
                        None
                    }
                };
                let route = self.route(owner);
                let document = self.document_for_route(&event.call_id, &route);
                self.orchestrator.remember_route(&event.call_id, route);
                document
            }

            ProviderEventKind::QueueWait => match &self.hold_music_url {
                Some(url) => ControlDocument::new().play(url.clone(), 0),
                None => ControlDocument::new()
                    .say("Please hold while we connect your call.")
                    .pause(HOLD_PAUSE_SECS),
            },

            ProviderEventKind::Connect => match self.orchestrator.route_for(&event.call_id) {
                Some(route) => match route.owner() {
                    Some(owner) => ControlDocument::new().dial(
                        DialTarget::Client(owner.owner_user_id.clone()),
                        None,
                        None,
                    ),
                    None => self.unavailable(),
                },
                None => self.unavailable(),
            },

            ProviderEventKind::VoicemailPrompt => {
                let route = self.orchestrator.route_for(&event.call_id);
                self.voicemail(route.as_ref().and_then(CallRoute::owner))
            }

            ProviderEventKind::Recording { .. } => ControlDocument::new()
                .say("Thank you. Goodbye.")
                .hangup(),

            ProviderEventKind::Unavailable => self.unavailable(),

            ProviderEventKind::DialResult { dial_status, .. } => {
                if dial_status.was_answered() {
                    return ControlDocument::new().hangup();
                }
                match self.orchestrator.route_for(&event.call_id) {
                    Some(route) if route.voicemail_enabled() => self.voicemail(route.owner()),
                    _ => self.unavailable(),
                }
            }

            ProviderEventKind::QueueExit {
                result: QueueResult::Error | QueueResult::QueueFull,
            } => self.unavailable(),

            ProviderEventKind::QueueExit { .. }
            | ProviderEventKind::Status { .. }
            | ProviderEventKind::Bridged => ControlDocument::new(),
        }
    }

    /// Destination owner, or `None` when the lookup fails or overruns
    async fn lookup_owner(&self, address: &str) -> Option<DestinationOwner> {
        let bound = self.config.directory_lookup_timeout();
        match tokio::time::timeout(bound, self.directory.lookup(address)).await {
            Ok(Ok(owner)) => owner,
            Ok(Err(e)) => {
                warn!(address, error = %e, "Destination lookup failed; treating as unowned");
                None
            }
            Err(_) => {
                let e = AppError::DirectoryLookupTimeout(address.to_string());
                warn!(
                    bound_ms = bound.as_millis() as u64,
                    error = %e,
                    "Treating destination as unowned"
                );
                None
            }
        }
    }

    fn route(&self, owner: Option<DestinationOwner>) -> CallRoute {
        let Some(owner) = owner else {
            return CallRoute::Unavailable;
        };
        if owner.forward_to.is_some() && !self.registry.is_online(&owner.owner_user_id) {
            info!(owner_user_id = %owner.owner_user_id, "Owner offline; forwarding");
            return CallRoute::Forward(owner);
        }
        CallRoute::Queue(owner)
    }

    fn document_for_route(&self, call_id: &str, route: &CallRoute) -> ControlDocument {
        match route {
            CallRoute::Unavailable => {
                debug!("No owner for destination");
                self.unavailable()
            }
            CallRoute::Queue(_) => ControlDocument::new().enqueue(
                call_id,
                self.urls.url(WebhookKind::QueueWait),
                self.urls.url(WebhookKind::QueueExit),
            ),
            CallRoute::Forward(owner) => match &owner.forward_to {
                Some(number) => ControlDocument::new().dial(
                    DialTarget::Number(number.clone()),
                    Some(self.urls.url(WebhookKind::DialResult)),
                    Some(self.config.ring_timeout_secs as u32),
                ),
                None => self.unavailable(),
            },
        }
    }

    fn voicemail(&self, owner: Option<&DestinationOwner>) -> ControlDocument {
        let greeting = owner
            .map(|owner| owner.greeting_or(&self.config.default_greeting))
            .unwrap_or(self.config.default_greeting.as_str());
        ControlDocument::new()
            .say(greeting)
            .record(self.urls.url(WebhookKind::Recording), MAX_VOICEMAIL_SECS)
            .hangup()
    }

    fn unavailable(&self) -> ControlDocument {
        ControlDocument::new()
            .say(self.config.unavailable_message.clone())
            .hangup()
    }
}
