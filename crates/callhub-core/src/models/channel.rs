//! Duplex channel protocol between the server and user devices
//!
//! Messages are JSON objects tagged by `type`:
//!
//! ```json
//! {"type":"incoming_call","callId":"CA1","from":"+1555","to":"+1666","timeoutMs":30000}
//! {"type":"incoming_call_response","callId":"CA1","action":"decline"}
//! ```

use super::call::CallStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Server to client events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    IncomingCall {
        call_id: String,
        from: String,
        to: String,
        timeout_ms: u64,
    },

    #[serde(rename_all = "camelCase")]
    CallStatusChange { call_id: String, status: CallStatus },

    #[serde(rename_all = "camelCase")]
    IncomingCallEnded { call_id: String, status: CallStatus },

    /// Reply to an `incoming_call_response` sent over the channel
    #[serde(rename_all = "camelCase")]
    ResponseResult {
        call_id: String,
        outcome: ResponseOutcome,
        message: String,
    },

    Error { message: String },

    Pong,
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::IncomingCall { .. } => "incoming_call",
            ServerEvent::CallStatusChange { .. } => "call_status_change",
            ServerEvent::IncomingCallEnded { .. } => "incoming_call_ended",
            ServerEvent::ResponseResult { .. } => "response_result",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong => "pong",
        }
    }
}

/// Client to server messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    IncomingCallResponse {
        call_id: String,
        action: ResponseAction,
    },

    Ping,
}

/// A user's decision about a ringing call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseAction {
    Accept,
    Decline,
    Ignore,
}

impl ResponseAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseAction::Accept => "accept",
            ResponseAction::Decline => "decline",
            ResponseAction::Ignore => "ignore",
        }
    }
}

impl fmt::Display for ResponseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accept" => Ok(ResponseAction::Accept),
            "decline" => Ok(ResponseAction::Decline),
            "ignore" => Ok(ResponseAction::Ignore),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

/// What a decision achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseOutcome {
    Accepted,
    Declined,
    Ignored,
    /// The call was not ringing or not owned by the caller
    Unavailable,
}
