//! Seam traits between the engine and its collaborators
//!
//! The engine only talks to storage, the destination directory, the dedupe
//! memory and the call-control provider through these traits.

use crate::error::AppError;
use crate::models::{CallSession, DedupeKey, DestinationOwner};
use async_trait::async_trait;

/// Durable call-session storage
#[async_trait]
pub trait CallRecordRepository: Send + Sync {
    /// Insert or merge a session keyed by `call_id`.
    ///
    /// Implementations merge with `CallSession::merge_from` so concurrent
    /// and out-of-order writes converge on one widened row.
    async fn upsert(&self, session: &CallSession) -> Result<CallSession, AppError>;

    /// Find a session by provider call id
    async fn find_by_call_id(&self, call_id: &str) -> Result<Option<CallSession>, AppError>;

    /// Owner's call history, newest first, with total count
    async fn list_by_owner(
        &self,
        owner_user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<CallSession>, i64), AppError>;
}

/// Destination-owner directory
#[async_trait]
pub trait DestinationDirectory: Send + Sync {
    /// Owner and routing configuration for a dialed address
    async fn lookup(&self, address: &str) -> Result<Option<DestinationOwner>, AppError>;
}

/// Short-lived memory of recently seen creations and call ids
#[async_trait]
pub trait DedupeStore: Send + Sync {
    /// Call id already registered for `key`, if any
    async fn find_bucket(&self, key: &DedupeKey) -> Result<Option<String>, AppError>;

    /// Register `call_id` for `key` unless another call already holds it.
    ///
    /// Returns the existing holder when the claim loses.
    async fn claim_bucket(&self, key: &DedupeKey, call_id: &str)
        -> Result<Option<String>, AppError>;

    /// Record that `call_id` was seen; returns `true` if it was already known
    async fn mark_seen(&self, call_id: &str) -> Result<bool, AppError>;

    /// Drop expired entries, returning how many were removed
    async fn sweep(&self) -> Result<usize, AppError>;
}

/// Live control of provider call legs
#[async_trait]
pub trait ProviderControl: Send + Sync {
    /// Tell the provider to continue `call_id` with the document at `url`
    async fn redirect(&self, call_id: &str, url: &str) -> Result<(), AppError>;
}
