//! Incoming call orchestration
//!
//! The orchestrator turns parsed provider events and user decisions into
//! call-session transitions, then performs their side effects: ring timer
//! arm/cancel, device notification, provider redirects and persistence.
//!
//! Every side effect is keyed on an *applied* transition. A redelivered
//! webhook, a late bridge or a timer that lost the race against a hangup
//! resolves to `Duplicate`/`Rejected` in the store and does nothing here,
//! so no side effect happens twice.

use crate::background::BackgroundTasks;
use crate::call_store::{AppliedUpdate, CallRecordStore, CallUpdate, Expectation, TransitionRequest};
use crate::registry::ConnectionRegistry;
use crate::retry::{with_backoff, RetryPolicy};
use crate::ring_timer::RingTimers;
use crate::twiml::CallbackUrls;
use callhub_core::models::{
    CallSession, CallStatus, DestinationOwner, DialStatus, ProviderCallStatus, ProviderEvent,
    ProviderEventKind, QueueResult, ServerEvent, Transition, WebhookKind,
};
use callhub_core::traits::ProviderControl;
use callhub_core::{AppError, AppResult, EngineConfig};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// How an incoming call was routed by the webhook responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallRoute {
    /// No owner; caller hears the unavailable message
    Unavailable,
    /// Caller waits in the queue while the owner's devices ring
    Queue(DestinationOwner),
    /// Owner offline; call forwarded to their external number
    Forward(DestinationOwner),
}

impl CallRoute {
    pub fn owner(&self) -> Option<&DestinationOwner> {
        match self {
            CallRoute::Unavailable => None,
            CallRoute::Queue(owner) | CallRoute::Forward(owner) => Some(owner),
        }
    }

    pub fn voicemail_enabled(&self) -> bool {
        self.owner().is_some_and(|owner| owner.voicemail_enabled)
    }
}

/// Drives call sessions through their lifecycle
pub struct CallOrchestrator {
    store: Arc<CallRecordStore>,
    registry: Arc<ConnectionRegistry>,
    timers: RingTimers,
    provider: Arc<dyn ProviderControl>,
    tasks: BackgroundTasks,
    urls: CallbackUrls,
    config: EngineConfig,
    retry: RetryPolicy,
    routes: RwLock<HashMap<String, CallRoute>>,
}

impl CallOrchestrator {
    pub fn new(
        store: Arc<CallRecordStore>,
        registry: Arc<ConnectionRegistry>,
        timers: RingTimers,
        provider: Arc<dyn ProviderControl>,
        tasks: BackgroundTasks,
        urls: CallbackUrls,
        config: EngineConfig,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            store,
            registry,
            timers,
            provider,
            tasks,
            urls,
            config,
            retry,
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<CallRecordStore> {
        &self.store
    }

    /// Record the routing decision made while answering the incoming webhook
    pub fn remember_route(&self, call_id: &str, route: CallRoute) {
        self.routes.write().insert(call_id.to_string(), route);
    }

    pub fn route_for(&self, call_id: &str) -> Option<CallRoute> {
        let routes = self.routes.read();
        routes
            .get(call_id)
            .or_else(|| routes.get(&self.store.canonical_id(call_id)))
            .cloned()
    }

    /// Apply a provider event. Runs in the background after the webhook
    /// response has been returned.
    #[instrument(skip(self, event), fields(call_id = %event.call_id, event = event.label()))]
    pub async fn handle_event(self: &Arc<Self>, event: ProviderEvent) -> AppResult<()> {
        let call_id = event.call_id.as_str();
        let at = event.received_at;
        let base = CallUpdate::new(call_id, at).addresses(event.from.as_deref(), event.to.as_deref());

        match &event.kind {
            ProviderEventKind::Incoming => self.on_incoming(base).await,

            ProviderEventKind::QueueExit { result } => match result {
                // Leaving the queue by hanging up means nobody picked up
                QueueResult::Hangup => self.advance(base.transition(Transition::Cancel)).await,
                QueueResult::Bridged => self.advance(base.transition(Transition::Answer)).await,
                QueueResult::Error | QueueResult::QueueFull => {
                    self.advance(base.transition(Transition::Fail)).await
                }
                QueueResult::Redirected | QueueResult::Leave | QueueResult::Other(_) => {
                    debug!(?result, "Queue exit without lifecycle effect");
                    Ok(())
                }
            },

            ProviderEventKind::Bridged => self.advance(base.transition(Transition::Answer)).await,

            ProviderEventKind::Status {
                call_status,
                duration,
            } => {
                let failed = match call_status {
                    ProviderCallStatus::Completed | ProviderCallStatus::Canceled => false,
                    ProviderCallStatus::Busy
                    | ProviderCallStatus::NoAnswer
                    | ProviderCallStatus::Failed => true,
                    _ => {
                        debug!(?call_status, "Non-final provider status");
                        return Ok(());
                    }
                };
                self.advance(base.transition(TransitionRequest::Hangup {
                    failed,
                    provider_duration: *duration,
                }))
                .await
            }

            ProviderEventKind::Recording { recording_ref, .. } => {
                let Some(reference) = recording_ref else {
                    warn!("Recording callback without a reference");
                    return Ok(());
                };
                self.advance(base.recording(reference).expecting(Expectation::Existing))
                    .await
            }

            ProviderEventKind::VoicemailPrompt => {
                self.advance(
                    base.transition(Transition::Voicemail)
                        .expecting(Expectation::Existing),
                )
                .await
            }

            ProviderEventKind::Unavailable => {
                self.advance(base.transition(Transition::Miss).expecting(Expectation::Existing))
                    .await
            }

            ProviderEventKind::DialResult {
                dial_status,
                duration,
            } => self.on_dial_result(base, dial_status, *duration).await,

            ProviderEventKind::Connect | ProviderEventKind::QueueWait => Ok(()),
        }
    }

    async fn on_incoming(self: &Arc<Self>, base: CallUpdate) -> AppResult<()> {
        let route = self
            .route_for(&base.call_id)
            .unwrap_or(CallRoute::Unavailable);

        match route {
            CallRoute::Unavailable => {
                info!("No owner for destination; marking call failed");
                self.advance(base.transition(Transition::Fail)).await
            }
            CallRoute::Forward(owner) => {
                let applied = self
                    .store
                    .apply(base.owner(Some(&owner.owner_user_id)))
                    .await?;
                if applied.created {
                    info!(owner_user_id = %owner.owner_user_id, "Incoming call forwarded");
                    // Only the dial result settles a forwarded call
                    let orchestrator = Arc::clone(self);
                    let call_id = applied.session.call_id.clone();
                    self.timers.arm(
                        &applied.session.call_id,
                        self.config.forward_backstop(),
                        &self.tasks,
                        async move { orchestrator.on_forward_backstop(&call_id).await },
                    );
                }
                self.finish(applied).await
            }
            CallRoute::Queue(owner) => {
                let applied = self
                    .store
                    .apply(base.owner(Some(&owner.owner_user_id)))
                    .await?;

                if !applied.created {
                    debug!(
                        session = %applied.session.call_id,
                        "Incoming call already known; not ringing again"
                    );
                    return self.finish(applied).await;
                }

                let session = &applied.session;
                let timeout = self.config.ring_timeout();
                let delivered = self.registry.send_to_user(
                    &owner.owner_user_id,
                    &ServerEvent::IncomingCall {
                        call_id: session.call_id.clone(),
                        from: session.from_address.clone(),
                        to: session.to_address.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    },
                );
                info!(
                    owner_user_id = %owner.owner_user_id,
                    delivered,
                    "Incoming call ringing"
                );

                // Offline owners still wait out the ring window
                let orchestrator = Arc::clone(self);
                let call_id = session.call_id.clone();
                self.timers.arm(&session.call_id, timeout, &self.tasks, async move {
                    orchestrator.on_ring_timeout(&call_id).await
                });

                self.store.persist(applied.session).await.map(|_| ())
            }
        }
    }

    async fn on_dial_result(
        self: &Arc<Self>,
        base: CallUpdate,
        dial_status: &DialStatus,
        duration: Option<i32>,
    ) -> AppResult<()> {
        if dial_status.was_answered() {
            let answered = self
                .store
                .apply(
                    base.clone()
                        .transition(Transition::Answer)
                        .expecting(Expectation::Existing),
                )
                .await;
            match answered {
                Ok(applied) => self.after_transition(&applied),
                Err(AppError::NotFound(_)) => return Ok(()),
                Err(e) => return Err(e),
            }
            return self
                .advance(
                    base.transition(Transition::Complete {
                        provider_duration: duration,
                    })
                    .expecting(Expectation::Existing),
                )
                .await;
        }

        let voicemail = self
            .route_for(&base.call_id)
            .is_some_and(|route| route.voicemail_enabled());
        let transition = if voicemail {
            Transition::Voicemail
        } else {
            Transition::Miss
        };
        debug!(?dial_status, "Forwarded leg not answered");
        self.advance(base.transition(transition).expecting(Expectation::Existing))
            .await
    }

    /// Apply an update and persist it when something changed
    async fn advance(&self, update: CallUpdate) -> AppResult<()> {
        let applied = match self.store.apply(update).await {
            Ok(applied) => applied,
            Err(AppError::NotFound(what)) => {
                debug!("Event for unknown {}; ignored", what);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.after_transition(&applied);
        self.finish(applied).await
    }

    async fn finish(&self, applied: AppliedUpdate) -> AppResult<()> {
        let changed = applied.created
            || applied.recording_attached
            || applied.identity_filled
            || applied.status_change().is_some();
        if changed {
            self.store.persist(applied.session).await?;
        } else if applied.redelivery {
            debug!("Redelivered event absorbed");
        }
        Ok(())
    }

    /// Timer cancel and device notification for an applied status change
    fn after_transition(&self, applied: &AppliedUpdate) {
        let Some((from, to)) = applied.status_change() else {
            return;
        };
        let session = &applied.session;

        if from == CallStatus::Ringing {
            self.timers.cancel(&session.call_id);
        }

        let Some(owner) = session.owner_user_id.as_deref() else {
            return;
        };
        let call_id = session.call_id.clone();
        let event = match (from, to) {
            (CallStatus::Ringing, CallStatus::Answered)
            | (CallStatus::Ringing, CallStatus::Declined)
            | (CallStatus::Answered, CallStatus::Completed) => {
                ServerEvent::CallStatusChange { call_id, status: to }
            }
            (CallStatus::Ringing, _) => ServerEvent::IncomingCallEnded { call_id, status: to },
            _ => return,
        };
        self.registry.send_to_user(owner, &event);
    }

    /// Ring window elapsed without a decision
    #[instrument(skip(self))]
    pub async fn on_ring_timeout(&self, call_id: &str) -> AppResult<()> {
        let voicemail = self
            .route_for(call_id)
            .is_some_and(|route| route.voicemail_enabled());
        let transition = if voicemail {
            Transition::Voicemail
        } else {
            Transition::Miss
        };

        let applied = self
            .store
            .apply(
                CallUpdate::new(call_id, Utc::now())
                    .transition(transition)
                    .expecting(Expectation::Existing),
            )
            .await?;

        if applied.status_change().is_none() {
            debug!(status = %applied.session.status, "Ring timer fired after the call moved on");
            return Ok(());
        }

        info!(status = %applied.session.status, "No answer within ring window");
        self.after_transition(&applied);

        let next = if voicemail {
            WebhookKind::Voicemail
        } else {
            WebhookKind::Unavailable
        };
        self.redirect_in_background(&applied.session.call_id, self.urls.url(next));
        self.store.persist(applied.session).await.map(|_| ())
    }

    /// A forwarded call outlived any possible dial result; the provider leg
    /// is long gone, so only the record is settled
    #[instrument(skip(self))]
    pub async fn on_forward_backstop(&self, call_id: &str) -> AppResult<()> {
        let applied = match self
            .store
            .apply(
                CallUpdate::new(call_id, Utc::now())
                    .transition(Transition::Miss)
                    .expecting(Expectation::Existing),
            )
            .await
        {
            Ok(applied) => applied,
            Err(AppError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        if applied.status_change().is_none() {
            return Ok(());
        }
        warn!("No dial result for forwarded call; recorded as missed");
        self.after_transition(&applied);
        self.store.persist(applied.session).await.map(|_| ())
    }

    /// Apply the owner's accept or decline.
    ///
    /// Fails with `StaleOrUnauthorized` unless the call is ringing and owned
    /// by `user_id`. Redirect and persistence run in the background.
    #[instrument(skip(self))]
    pub async fn user_transition(
        &self,
        call_id: &str,
        user_id: &str,
        transition: Transition,
    ) -> AppResult<CallSession> {
        let applied = self
            .store
            .apply(
                CallUpdate::new(call_id, Utc::now())
                    .transition(transition)
                    .expecting(Expectation::RingingOwnedBy(user_id.to_string())),
            )
            .await?;

        if applied.status_change().is_none() {
            return Err(AppError::StaleOrUnauthorized(call_id.to_string()));
        }
        self.after_transition(&applied);

        let session = applied.session;
        let next = match transition {
            Transition::Answer => WebhookKind::Connect,
            _ if self
                .route_for(&session.call_id)
                .is_some_and(|route| route.voicemail_enabled()) =>
            {
                WebhookKind::Voicemail
            }
            _ => WebhookKind::Unavailable,
        };
        self.redirect_in_background(&session.call_id, self.urls.url(next));
        self.persist_in_background(session.clone());

        info!(status = %session.status, "User decision applied");
        Ok(session)
    }

    fn redirect_in_background(&self, call_id: &str, url: String) {
        let provider = self.provider.clone();
        let retry = self.retry;
        let owned_call_id = call_id.to_string();

        self.tasks.spawn("provider_redirect", call_id, async move {
            let call_id = &owned_call_id;
            let url = &url;
            with_backoff(&retry, "provider_redirect", || {
                let provider = provider.clone();
                async move { provider.redirect(call_id, url).await }
            })
            .await
            .map_err(|exhausted| exhausted.last_error)
        });
    }

    fn persist_in_background(&self, session: CallSession) {
        let store = self.store.clone();
        let call_id = session.call_id.clone();
        self.tasks.spawn("persist_call_session", &call_id, async move {
            store.persist(session).await.map(|_| ())
        });
    }

    /// Drop settled and abandoned sessions and their routes from memory
    pub fn evict_settled(&self) -> usize {
        let evicted = self.store.evict_settled(
            self.config.session_retention(),
            self.config.max_call_lifetime(),
            |call_id| self.timers.is_armed(call_id),
        );
        if !evicted.is_empty() {
            let mut routes = self.routes.write();
            for call_id in &evicted {
                routes.remove(call_id);
            }
        }
        evicted.len()
    }

    pub fn armed_timers(&self) -> usize {
        self.timers.armed_count()
    }
}
