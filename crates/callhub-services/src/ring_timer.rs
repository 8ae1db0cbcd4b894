//! Per-call "wait for user decision" timers
//!
//! Each ringing call gets one timer. Arming again replaces (and cancels)
//! the previous one; a caller hangup or user decision cancels it. The fire
//! action runs as a supervised background job and must re-check that the
//! call is still ringing, since cancel can race with fire.

use crate::background::BackgroundTasks;
use callhub_core::AppResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct ArmedTimer {
    generation: u64,
    token: CancellationToken,
}

/// Registry of ring timers keyed by call id
#[derive(Clone, Default)]
pub struct RingTimers {
    timers: Arc<Mutex<HashMap<String, ArmedTimer>>>,
    generation: Arc<AtomicU64>,
}

impl RingTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_fire` after `after` unless cancelled first
    pub fn arm<F>(&self, call_id: &str, after: Duration, tasks: &BackgroundTasks, on_fire: F)
    where
        F: Future<Output = AppResult<()>> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        if let Some(previous) = self.timers.lock().insert(
            call_id.to_string(),
            ArmedTimer {
                generation,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        let timers = self.timers.clone();
        let tasks = tasks.clone();
        let call_id = call_id.to_string();
        debug!(call_id = %call_id, after_ms = after.as_millis() as u64, "Ring timer armed");

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(call_id = %call_id, "Ring timer cancelled");
                }
                _ = tokio::time::sleep(after) => {
                    {
                        let mut timers = timers.lock();
                        if timers.get(&call_id).is_some_and(|t| t.generation == generation) {
                            timers.remove(&call_id);
                        }
                    }
                    debug!(call_id = %call_id, "Ring timer fired");
                    tasks.spawn("ring_timeout", &call_id, on_fire);
                }
            }
        });
    }

    /// Cancel the timer for `call_id`; `true` if one was armed
    pub fn cancel(&self, call_id: &str) -> bool {
        match self.timers.lock().remove(call_id) {
            Some(timer) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every armed timer
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<ArmedTimer> = self.timers.lock().drain().map(|(_, t)| t).collect();
        for timer in &drained {
            timer.token.cancel();
        }
        drained.len()
    }

    pub fn is_armed(&self, call_id: &str) -> bool {
        self.timers.lock().contains_key(call_id)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.lock().len()
    }
}
