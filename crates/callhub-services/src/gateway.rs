//! User decisions on ringing calls
//!
//! Both the duplex channel and the synchronous response API land here.

use crate::orchestrator::CallOrchestrator;
use callhub_core::models::{ResponseAction, ResponseOutcome, Transition};
use callhub_core::{AppError, AppResult};
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct CallResponseGateway {
    orchestrator: Arc<CallOrchestrator>,
}

impl CallResponseGateway {
    pub fn new(orchestrator: Arc<CallOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Apply `action` from `user_id` to a ringing call they own.
    ///
    /// `ignore` only validates; the call keeps ringing toward its timeout.
    #[instrument(skip(self))]
    pub async fn respond(
        &self,
        call_id: &str,
        user_id: &str,
        action: ResponseAction,
    ) -> AppResult<ResponseOutcome> {
        match action {
            ResponseAction::Ignore => {
                let session = self.orchestrator.store().get(call_id).await?;
                match session {
                    Some(session) if session.is_owned_by(user_id) && session.is_ringing() => {
                        debug!("Call ignored; ring continues");
                        Ok(ResponseOutcome::Ignored)
                    }
                    _ => Err(AppError::StaleOrUnauthorized(call_id.to_string())),
                }
            }
            ResponseAction::Accept => {
                self.orchestrator
                    .user_transition(call_id, user_id, Transition::Answer)
                    .await?;
                Ok(ResponseOutcome::Accepted)
            }
            ResponseAction::Decline => {
                self.orchestrator
                    .user_transition(call_id, user_id, Transition::Decline)
                    .await?;
                Ok(ResponseOutcome::Declined)
            }
        }
    }
}
