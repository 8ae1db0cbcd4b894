//! Call DTOs

use callhub_core::models::{
    CallSession, CallStatus, HandledBy, ResponseAction, ResponseOutcome, ServerEvent,
};
use callhub_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Body of `POST /api/v1/calls/{call_id}/respond`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RespondRequest {
    #[validate(length(min = 1, max = 16))]
    pub action: String,
}

impl RespondRequest {
    pub fn action(&self) -> AppResult<ResponseAction> {
        self.action.parse().map_err(AppError::InvalidInput)
    }
}

/// Result of a user decision
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondResult {
    pub call_id: String,
    pub outcome: ResponseOutcome,
    pub message: String,
}

impl RespondResult {
    /// Map a gateway result; a stale decision is a normal outcome, not an error
    pub fn from_gateway(call_id: &str, result: AppResult<ResponseOutcome>) -> AppResult<Self> {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(AppError::StaleOrUnauthorized(_)) => ResponseOutcome::Unavailable,
            Err(e) => return Err(e),
        };
        let message = match outcome {
            ResponseOutcome::Accepted => "call accepted",
            ResponseOutcome::Declined => "call declined",
            ResponseOutcome::Ignored => "call ignored",
            ResponseOutcome::Unavailable => "call no longer available",
        };
        Ok(Self {
            call_id: call_id.to_string(),
            outcome,
            message: message.to_string(),
        })
    }

    pub fn into_event(self) -> ServerEvent {
        ServerEvent::ResponseResult {
            call_id: self.call_id,
            outcome: self.outcome,
            message: self.message,
        }
    }
}

/// Call history entry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResponse {
    pub call_id: String,
    pub from_address: String,
    pub to_address: String,
    pub status: CallStatus,
    pub is_final: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handled_by: Option<HandledBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_ref: Option<String>,
}

impl From<CallSession> for CallResponse {
    fn from(session: CallSession) -> Self {
        Self {
            is_final: session.status.is_terminal(),
            call_id: session.call_id,
            from_address: session.from_address,
            to_address: session.to_address,
            status: session.status,
            created_at: session.created_at,
            answered_at: session.answered_at,
            ended_at: session.ended_at,
            duration_seconds: session.duration_seconds,
            handled_by: session.handled_by,
            recording_ref: session.recording_ref,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_maps_to_unavailable() {
        let result = RespondResult::from_gateway(
            "CA1",
            Err(AppError::StaleOrUnauthorized("CA1".to_string())),
        )
        .unwrap();
        assert_eq!(result.outcome, ResponseOutcome::Unavailable);
        assert_eq!(result.message, "call no longer available");
    }

    #[test]
    fn test_other_errors_propagate() {
        let result =
            RespondResult::from_gateway("CA1", Err(AppError::Database("down".to_string())));
        assert!(matches!(result, Err(AppError::Database(_))));
    }

    #[test]
    fn test_respond_request_action() {
        let req = RespondRequest {
            action: "Decline".to_string(),
        };
        assert_eq!(req.action().unwrap(), ResponseAction::Decline);

        let req = RespondRequest {
            action: "hold".to_string(),
        };
        assert!(matches!(req.action(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_call_response_from_session() {
        let mut session = CallSession::new(
            "CA7",
            Some("user-1".to_string()),
            "+15550001",
            "+15550100",
            Utc::now(),
        );
        session.status = CallStatus::Missed;
        let response = CallResponse::from(session);
        assert!(response.is_final);
        assert_eq!(response.status, CallStatus::Missed);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["callId"], "CA7");
        assert!(json.get("answeredAt").is_none());
    }
}
