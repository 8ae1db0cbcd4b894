//! Idempotent call record store
//!
//! The store is the single place where call sessions are created and
//! mutated. It keeps the live sessions in memory (one lock per call id, no
//! global lock), folds duplicate creations through the dedupe memory, and
//! writes snapshots to the durable repository with bounded retries.
//!
//! In-memory state is authoritative for real-time decisions for the
//! lifetime of the process, even when durable writes fail.

use crate::retry::{with_backoff, RetryPolicy};
use callhub_core::models::{
    CallSession, CallStatus, DedupeKey, Transition, TransitionOutcome,
};
use callhub_core::traits::{CallRecordRepository, DedupeStore};
use callhub_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

type SessionCell = Arc<Mutex<CallSession>>;

/// Which sessions an update may touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Create the session if it does not exist yet
    CreateIfMissing,
    /// Only update an existing session
    Existing,
    /// Existing session that is still ringing and owned by this user
    RingingOwnedBy(String),
}

/// The transition to request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRequest {
    Fixed(Transition),
    /// Provider ended the leg; resolved against the current status
    Hangup {
        failed: bool,
        provider_duration: Option<i32>,
    },
}

impl From<Transition> for TransitionRequest {
    fn from(transition: Transition) -> Self {
        TransitionRequest::Fixed(transition)
    }
}

/// Fields to merge into a session keyed by provider call id
#[derive(Debug, Clone)]
pub struct CallUpdate {
    pub call_id: String,
    pub owner_user_id: Option<String>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub transition: Option<TransitionRequest>,
    pub recording_ref: Option<String>,
    pub at: DateTime<Utc>,
    pub expect: Expectation,
}

impl CallUpdate {
    pub fn new(call_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            call_id: call_id.to_string(),
            owner_user_id: None,
            from_address: None,
            to_address: None,
            transition: None,
            recording_ref: None,
            at,
            expect: Expectation::CreateIfMissing,
        }
    }

    pub fn owner(mut self, owner_user_id: Option<&str>) -> Self {
        self.owner_user_id = owner_user_id.map(str::to_string);
        self
    }

    pub fn addresses(mut self, from: Option<&str>, to: Option<&str>) -> Self {
        self.from_address = from.map(str::to_string);
        self.to_address = to.map(str::to_string);
        self
    }

    pub fn transition(mut self, request: impl Into<TransitionRequest>) -> Self {
        self.transition = Some(request.into());
        self
    }

    pub fn recording(mut self, recording_ref: &str) -> Self {
        self.recording_ref = Some(recording_ref.to_string());
        self
    }

    pub fn expecting(mut self, expect: Expectation) -> Self {
        self.expect = expect;
        self
    }
}

/// What an update did
#[derive(Debug, Clone)]
pub struct AppliedUpdate {
    /// Session after the update
    pub session: CallSession,
    /// The update created the session
    pub created: bool,
    /// Transition result, if one was requested and resolved
    pub outcome: Option<TransitionOutcome>,
    pub recording_attached: bool,
    /// Owner or addresses learned after the session was created
    pub identity_filled: bool,
    /// This call id had been seen before
    pub redelivery: bool,
}

impl AppliedUpdate {
    /// `(from, to)` if the update changed the status
    pub fn status_change(&self) -> Option<(CallStatus, CallStatus)> {
        match self.outcome {
            Some(TransitionOutcome::Applied { from, to }) => Some((from, to)),
            _ => None,
        }
    }
}

/// Idempotent persistence boundary for call sessions
pub struct CallRecordStore {
    sessions: RwLock<HashMap<String, SessionCell>>,
    /// Folded call id -> call id of the session it was folded into
    aliases: RwLock<HashMap<String, String>>,
    repository: Arc<dyn CallRecordRepository>,
    dedupe: Arc<dyn DedupeStore>,
    retry: RetryPolicy,
    bucket_secs: i64,
}

impl CallRecordStore {
    pub fn new(
        repository: Arc<dyn CallRecordRepository>,
        dedupe: Arc<dyn DedupeStore>,
        retry: RetryPolicy,
        bucket_secs: i64,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
            repository,
            dedupe,
            retry,
            bucket_secs,
        }
    }

    /// Call id of the session `call_id` refers to
    pub fn canonical_id(&self, call_id: &str) -> String {
        self.aliases
            .read()
            .get(call_id)
            .cloned()
            .unwrap_or_else(|| call_id.to_string())
    }

    fn cached(&self, call_id: &str) -> Option<SessionCell> {
        self.sessions.read().get(call_id).cloned()
    }

    /// Insert unless another writer got there first; `true` when ours won
    fn insert_cell(&self, session: CallSession) -> (SessionCell, bool) {
        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(&session.call_id) {
            return (existing.clone(), false);
        }
        let call_id = session.call_id.clone();
        let cell = Arc::new(Mutex::new(session));
        sessions.insert(call_id, cell.clone());
        (cell, true)
    }

    /// Find the session for an update, hydrating or creating as allowed
    async fn locate(&self, update: &CallUpdate) -> AppResult<Option<(SessionCell, bool)>> {
        let call_id = self.canonical_id(&update.call_id);

        if let Some(cell) = self.cached(&call_id) {
            return Ok(Some((cell, false)));
        }

        match self.repository.find_by_call_id(&call_id).await {
            Ok(Some(stored)) => {
                debug!(call_id = %call_id, "Hydrated call session from repository");
                let (cell, _) = self.insert_cell(stored);
                return Ok(Some((cell, false)));
            }
            Ok(None) => {}
            Err(e) => {
                // Keep going on in-memory state
                warn!(call_id = %call_id, error = %e, "Repository lookup failed");
            }
        }

        if update.expect != Expectation::CreateIfMissing {
            return Ok(None);
        }

        if let Some((holder, cell)) = self.fold_duplicate(update).await {
            info!(
                call_id = %update.call_id,
                folded_into = %holder,
                "Folding duplicate call creation into existing session"
            );
            self.aliases.write().insert(update.call_id.clone(), holder);
            return Ok(Some((cell, false)));
        }

        let session = CallSession::new(
            call_id,
            update.owner_user_id.clone(),
            update.from_address.clone().unwrap_or_default(),
            update.to_address.clone().unwrap_or_default(),
            update.at,
        );
        let (cell, created) = self.insert_cell(session);
        Ok(Some((cell, created)))
    }

    /// Session of a recent call for the same owner and destination
    async fn fold_duplicate(&self, update: &CallUpdate) -> Option<(String, SessionCell)> {
        let (Some(owner), Some(to)) = (&update.owner_user_id, &update.to_address) else {
            return None;
        };
        let key = DedupeKey::at(owner, to, update.at, self.bucket_secs);

        // A creation just before the bucket boundary still counts
        match self.dedupe.find_bucket(&key.previous()).await {
            Ok(Some(holder)) if holder != update.call_id => {
                if let Some(cell) = self.fold_target(&holder, update).await {
                    return Some((holder, cell));
                }
            }
            Ok(_) => {}
            Err(e) => warn!(key = %key, error = %e, "Dedupe lookup failed"),
        }

        match self.dedupe.claim_bucket(&key, &update.call_id).await {
            Ok(Some(holder)) => {
                let cell = self.fold_target(&holder, update).await?;
                Some((holder, cell))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Dedupe claim failed; creating without folding");
                None
            }
        }
    }

    /// Live session of the bucket holder, if the update may fold into it.
    ///
    /// The holder may belong to another process sharing the dedupe memory;
    /// only a stored record is trusted then. A settled session or one from
    /// another caller is never a fold target.
    async fn fold_target(&self, holder: &str, update: &CallUpdate) -> Option<SessionCell> {
        if let Some(cell) = self.cached(holder) {
            let accepts = Self::accepts_fold(&cell.lock(), update);
            return accepts.then_some(cell);
        }

        match self.repository.find_by_call_id(holder).await {
            Ok(Some(stored)) if Self::accepts_fold(&stored, update) => {
                debug!(holder, "Hydrated fold target from repository");
                let (cell, _) = self.insert_cell(stored);
                Some(cell)
            }
            Ok(_) => {
                debug!(holder, call_id = %update.call_id, "Bucket holder unknown here; not folding");
                None
            }
            Err(e) => {
                warn!(holder, error = %e, "Fold target lookup failed; not folding");
                None
            }
        }
    }

    fn accepts_fold(session: &CallSession, update: &CallUpdate) -> bool {
        let same_caller = match update.from_address.as_deref() {
            Some(from) => session.from_address.is_empty() || session.from_address == from,
            None => true,
        };
        !session.status.is_terminal() && same_caller
    }

    /// Apply an update to the in-memory session
    #[instrument(skip(self, update), fields(call_id = %update.call_id))]
    pub async fn apply(&self, update: CallUpdate) -> AppResult<AppliedUpdate> {
        let redelivery = match self.dedupe.mark_seen(&update.call_id).await {
            Ok(seen) => seen,
            Err(e) => {
                warn!(error = %e, "Dedupe mark failed");
                false
            }
        };

        let Some((cell, created)) = self.locate(&update).await? else {
            return Err(match update.expect {
                Expectation::RingingOwnedBy(_) => AppError::StaleOrUnauthorized(update.call_id),
                _ => AppError::NotFound(format!("call session {}", update.call_id)),
            });
        };

        let mut session = cell.lock();

        if let Expectation::RingingOwnedBy(user_id) = &update.expect {
            if !session.is_owned_by(user_id) || !session.is_ringing() {
                debug!(
                    user_id = %user_id,
                    status = %session.status,
                    "Decision for a call that is not ringing or not owned by the user"
                );
                return Err(AppError::StaleOrUnauthorized(update.call_id));
            }
        }

        let identity_filled = session.fill_identity(
            update.owner_user_id.as_deref(),
            update.from_address.as_deref(),
            update.to_address.as_deref(),
        );

        let transition = update.transition.and_then(|request| match request {
            TransitionRequest::Fixed(transition) => Some(transition),
            TransitionRequest::Hangup {
                failed,
                provider_duration,
            } => session.hangup_transition(failed, provider_duration),
        });
        let outcome = transition.map(|t| session.apply(t, update.at));

        let recording_attached = update
            .recording_ref
            .as_deref()
            .is_some_and(|reference| session.attach_recording(reference, update.at));

        match outcome {
            Some(TransitionOutcome::Applied { from, to }) => {
                info!(call_id = %session.call_id, %from, %to, "Call status changed")
            }
            Some(TransitionOutcome::Duplicate) => {
                let duplicate = AppError::DuplicateDelivery(session.call_id.clone());
                debug!(status = %session.status, "{}", duplicate)
            }
            Some(TransitionOutcome::Rejected { current }) => {
                if let Some(t) = transition {
                    let rejected = AppError::InvalidTransition {
                        call_id: session.call_id.clone(),
                        from: current.to_string(),
                        to: t.target().to_string(),
                    };
                    debug!("{}; ignored", rejected)
                }
            }
            None => {}
        }

        Ok(AppliedUpdate {
            session: session.clone(),
            created,
            outcome,
            recording_attached,
            identity_filled,
            redelivery,
        })
    }

    /// Write a snapshot to the repository, retrying with backoff.
    ///
    /// On exhaustion the snapshot is logged for manual reconciliation.
    #[instrument(skip(self, session), fields(call_id = %session.call_id, status = %session.status))]
    pub async fn persist(&self, session: CallSession) -> AppResult<CallSession> {
        let repository = self.repository.clone();
        let result = with_backoff(&self.retry, "persist_call_session", || {
            let repository = repository.clone();
            let session = &session;
            async move { repository.upsert(session).await }
        })
        .await;

        result.map_err(|exhausted| {
            error!(
                call_id = %session.call_id,
                status = %session.status,
                owner_user_id = ?session.owner_user_id,
                answered_at = ?session.answered_at,
                ended_at = ?session.ended_at,
                duration_seconds = ?session.duration_seconds,
                handled_by = ?session.handled_by,
                recording_ref = ?session.recording_ref,
                attempts = exhausted.attempts,
                error = %exhausted.last_error,
                "Call session not persisted; manual reconciliation required"
            );
            AppError::PersistenceFailure {
                attempts: exhausted.attempts,
                message: exhausted.last_error.to_string(),
            }
        })
    }

    /// Apply an update and persist the result
    pub async fn upsert_by_provider_id(&self, update: CallUpdate) -> AppResult<CallSession> {
        let applied = self.apply(update).await?;
        self.persist(applied.session).await
    }

    /// Current state of a call, from memory or the repository
    pub async fn get(&self, call_id: &str) -> AppResult<Option<CallSession>> {
        if let Some(session) = self.snapshot(call_id) {
            return Ok(Some(session));
        }
        self.repository
            .find_by_call_id(&self.canonical_id(call_id))
            .await
    }

    /// Current in-memory state of a call
    pub fn snapshot(&self, call_id: &str) -> Option<CallSession> {
        self.cached(&self.canonical_id(call_id))
            .map(|cell| cell.lock().clone())
    }

    /// Owner's call history from the repository
    pub async fn history(
        &self,
        owner_user_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<CallSession>, i64)> {
        self.repository
            .list_by_owner(owner_user_id, limit, offset)
            .await
    }

    /// Number of sessions held in memory
    pub fn live_sessions(&self) -> usize {
        self.sessions.read().len()
    }

    /// Number of in-memory sessions still ringing or answered
    pub fn active_sessions(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|cell| !cell.lock().status.is_terminal())
            .count()
    }

    /// Drop terminal sessions not touched for `retention`, and unsettled
    /// ones created more than `max_lifetime` ago unless `pinned`.
    ///
    /// Returns the evicted call ids followed by the aliases folded into them.
    pub fn evict_settled(
        &self,
        retention: Duration,
        max_lifetime: Duration,
        pinned: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let now = Utc::now();
        let settled_cutoff = now - to_chrono(retention);
        let abandoned_cutoff = now - to_chrono(max_lifetime);

        let evicted: Vec<String> = {
            let mut sessions = self.sessions.write();
            let stale: Vec<String> = sessions
                .iter()
                .filter(|(call_id, cell)| {
                    let session = cell.lock();
                    if session.status.is_terminal() {
                        return session.updated_at <= settled_cutoff;
                    }
                    if session.created_at > abandoned_cutoff || pinned(call_id.as_str()) {
                        return false;
                    }
                    warn!(
                        call_id = %session.call_id,
                        status = %session.status,
                        "Call never settled; dropping it from memory"
                    );
                    true
                })
                .map(|(call_id, _)| call_id.clone())
                .collect();
            for call_id in &stale {
                sessions.remove(call_id);
            }
            stale
        };

        if evicted.is_empty() {
            return evicted;
        }
        debug!(count = evicted.len(), "Evicted settled call sessions");

        let mut dropped = evicted.clone();
        self.aliases.write().retain(|alias, target| {
            let stale = evicted.contains(target);
            if stale {
                dropped.push(alias.clone());
            }
            !stale
        });
        dropped
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
