//! In-memory collaborators
//!
//! Process-local implementations of the repository, directory and provider
//! seams. Used by the engine tests; latency and failure can be injected.

use async_trait::async_trait;
use callhub_core::models::{CallSession, DestinationOwner};
use callhub_core::traits::{CallRecordRepository, DestinationDirectory, ProviderControl};
use callhub_core::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Call-session rows held in a map, merged like the SQL repository
#[derive(Default)]
pub struct InMemoryCallRecordRepository {
    rows: Mutex<HashMap<String, CallSession>>,
    write_latency: Option<Duration>,
    failing: AtomicBool,
    upserts: AtomicUsize,
}

impl InMemoryCallRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every write by `latency`
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = Some(latency);
        self
    }

    /// Make writes fail with a transient database error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful upserts so far
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn stored(&self, call_id: &str) -> Option<CallSession> {
        self.rows.lock().get(call_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CallRecordRepository for InMemoryCallRecordRepository {
    async fn upsert(&self, session: &CallSession) -> AppResult<CallSession> {
        if let Some(latency) = self.write_latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Database("connection refused".to_string()));
        }

        let mut rows = self.rows.lock();
        let merged = match rows.get_mut(&session.call_id) {
            Some(existing) => {
                existing.merge_from(session);
                existing.clone()
            }
            None => {
                rows.insert(session.call_id.clone(), session.clone());
                session.clone()
            }
        };
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(merged)
    }

    async fn find_by_call_id(&self, call_id: &str) -> AppResult<Option<CallSession>> {
        Ok(self.stored(call_id))
    }

    async fn list_by_owner(
        &self,
        owner_user_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<CallSession>, i64)> {
        let mut owned: Vec<CallSession> = self
            .rows
            .lock()
            .values()
            .filter(|s| s.is_owned_by(owner_user_id))
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = owned.len() as i64;
        let page = owned
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }
}

/// Fixed destination table
#[derive(Default)]
pub struct StaticDirectory {
    owners: HashMap<String, DestinationOwner>,
    latency: Option<Duration>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(mut self, owner: DestinationOwner) -> Self {
        self.owners.insert(owner.address.clone(), owner);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[async_trait]
impl DestinationDirectory for StaticDirectory {
    async fn lookup(&self, address: &str) -> AppResult<Option<DestinationOwner>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.owners.get(address).cloned())
    }
}

/// Records redirects instead of calling a provider
#[derive(Default)]
pub struct CapturingProvider {
    redirects: Mutex<Vec<(String, String)>>,
}

impl CapturingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(call_id, url)` pairs in the order they were issued
    pub fn redirects(&self) -> Vec<(String, String)> {
        self.redirects.lock().clone()
    }

    pub fn redirects_for(&self, call_id: &str) -> Vec<String> {
        self.redirects
            .lock()
            .iter()
            .filter(|(id, _)| id == call_id)
            .map(|(_, url)| url.clone())
            .collect()
    }
}

#[async_trait]
impl ProviderControl for CapturingProvider {
    async fn redirect(&self, call_id: &str, url: &str) -> AppResult<()> {
        self.redirects
            .lock()
            .push((call_id.to_string(), url.to_string()));
        Ok(())
    }
}
