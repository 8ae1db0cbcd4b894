//! Provider webhook events
//!
//! Raw form payloads are parsed into a closed set of event kinds at the
//! boundary. Nothing past [`ProviderEvent::from_fields`] sees provider
//! field names.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Webhook endpoint kinds accepted under `/webhooks/voice/{kind}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookKind {
    /// New inbound call
    Incoming,
    /// Periodic callback while the caller waits in the queue
    QueueWait,
    /// Caller left the queue (bridged, hung up, timed out...)
    QueueExit,
    /// Queued caller was bridged to a device
    Bridged,
    /// Connect a redirected leg to the owner's client
    Connect,
    /// Provider call status callback
    Status,
    /// Recording completed
    Recording,
    /// Voicemail prompt requested
    Voicemail,
    /// Call could not be routed
    Unavailable,
    /// Outcome of a forwarded dial
    DialResult,
}

impl WebhookKind {
    pub const ALL: [WebhookKind; 10] = [
        WebhookKind::Incoming,
        WebhookKind::QueueWait,
        WebhookKind::QueueExit,
        WebhookKind::Bridged,
        WebhookKind::Connect,
        WebhookKind::Status,
        WebhookKind::Recording,
        WebhookKind::Voicemail,
        WebhookKind::Unavailable,
        WebhookKind::DialResult,
    ];

    /// Path segment for this kind
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookKind::Incoming => "incoming",
            WebhookKind::QueueWait => "queue-wait",
            WebhookKind::QueueExit => "queue-exit",
            WebhookKind::Bridged => "bridged",
            WebhookKind::Connect => "connect",
            WebhookKind::Status => "status",
            WebhookKind::Recording => "recording",
            WebhookKind::Voicemail => "voicemail",
            WebhookKind::Unavailable => "unavailable",
            WebhookKind::DialResult => "dial-result",
        }
    }
}

impl fmt::Display for WebhookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WebhookKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AppError::UnknownEvent(s.to_string()))
    }
}

/// Why a caller left the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueResult {
    Bridged,
    Hangup,
    Leave,
    QueueFull,
    Redirected,
    Error,
    Other(String),
}

impl QueueResult {
    pub fn parse(value: &str) -> Self {
        match value {
            "bridged" | "bridging-in-process" => QueueResult::Bridged,
            "hangup" => QueueResult::Hangup,
            "leave" => QueueResult::Leave,
            "queue-full" => QueueResult::QueueFull,
            "redirected" | "redirected-from-bridged" => QueueResult::Redirected,
            "error" | "system-error" | "system-shutdown" => QueueResult::Error,
            other => QueueResult::Other(other.to_string()),
        }
    }
}

/// Provider-side call status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCallStatus {
    Queued,
    Ringing,
    InProgress,
    Completed,
    Busy,
    NoAnswer,
    Canceled,
    Failed,
    Other(String),
}

impl ProviderCallStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "queued" => ProviderCallStatus::Queued,
            "ringing" => ProviderCallStatus::Ringing,
            "in-progress" => ProviderCallStatus::InProgress,
            "completed" => ProviderCallStatus::Completed,
            "busy" => ProviderCallStatus::Busy,
            "no-answer" => ProviderCallStatus::NoAnswer,
            "canceled" => ProviderCallStatus::Canceled,
            "failed" => ProviderCallStatus::Failed,
            other => ProviderCallStatus::Other(other.to_string()),
        }
    }

    /// The provider will send nothing further about this leg
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ProviderCallStatus::Completed
                | ProviderCallStatus::Busy
                | ProviderCallStatus::NoAnswer
                | ProviderCallStatus::Canceled
                | ProviderCallStatus::Failed
        )
    }
}

/// Outcome of a forwarded `<Dial>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialStatus {
    Completed,
    Answered,
    Busy,
    NoAnswer,
    Failed,
    Canceled,
    Other(String),
}

impl DialStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "completed" => DialStatus::Completed,
            "answered" => DialStatus::Answered,
            "busy" => DialStatus::Busy,
            "no-answer" => DialStatus::NoAnswer,
            "failed" => DialStatus::Failed,
            "canceled" => DialStatus::Canceled,
            other => DialStatus::Other(other.to_string()),
        }
    }

    /// The forwarded leg was picked up
    pub fn was_answered(&self) -> bool {
        matches!(self, DialStatus::Completed | DialStatus::Answered)
    }
}

/// Form fields posted by the provider
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookFields {
    pub call_sid: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub call_status: Option<String>,
    pub call_duration: Option<String>,
    pub queue_result: Option<String>,
    pub recording_url: Option<String>,
    pub recording_sid: Option<String>,
    pub recording_duration: Option<String>,
    pub dial_call_status: Option<String>,
    pub dial_call_duration: Option<String>,
}

/// Event-specific payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEventKind {
    Incoming,
    QueueWait,
    QueueExit { result: QueueResult },
    Bridged,
    Connect,
    Status {
        call_status: ProviderCallStatus,
        duration: Option<i32>,
    },
    Recording {
        recording_ref: Option<String>,
        duration: Option<i32>,
    },
    VoicemailPrompt,
    Unavailable,
    DialResult {
        dial_status: DialStatus,
        duration: Option<i32>,
    },
}

/// A parsed provider callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    pub call_id: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub kind: ProviderEventKind,
    pub received_at: DateTime<Utc>,
}

impl ProviderEvent {
    /// Parse the form payload of a `kind` callback
    pub fn from_fields(kind: WebhookKind, fields: WebhookFields) -> Result<Self, AppError> {
        let call_id = non_empty(fields.call_sid)
            .ok_or_else(|| AppError::MissingField("CallSid".to_string()))?;

        let kind = match kind {
            WebhookKind::Incoming => ProviderEventKind::Incoming,
            WebhookKind::QueueWait => ProviderEventKind::QueueWait,
            WebhookKind::QueueExit => {
                let result = non_empty(fields.queue_result)
                    .ok_or_else(|| AppError::MissingField("QueueResult".to_string()))?;
                ProviderEventKind::QueueExit {
                    result: QueueResult::parse(&result),
                }
            }
            WebhookKind::Bridged => ProviderEventKind::Bridged,
            WebhookKind::Connect => ProviderEventKind::Connect,
            WebhookKind::Status => {
                let status = non_empty(fields.call_status)
                    .ok_or_else(|| AppError::MissingField("CallStatus".to_string()))?;
                ProviderEventKind::Status {
                    call_status: ProviderCallStatus::parse(&status),
                    duration: parse_seconds(fields.call_duration.as_deref()),
                }
            }
            WebhookKind::Recording => ProviderEventKind::Recording {
                recording_ref: non_empty(fields.recording_sid)
                    .or_else(|| non_empty(fields.recording_url)),
                duration: parse_seconds(fields.recording_duration.as_deref()),
            },
            WebhookKind::Voicemail => ProviderEventKind::VoicemailPrompt,
            WebhookKind::Unavailable => ProviderEventKind::Unavailable,
            WebhookKind::DialResult => {
                let status = non_empty(fields.dial_call_status)
                    .ok_or_else(|| AppError::MissingField("DialCallStatus".to_string()))?;
                ProviderEventKind::DialResult {
                    dial_status: DialStatus::parse(&status),
                    duration: parse_seconds(fields.dial_call_duration.as_deref()),
                }
            }
        };

        Ok(Self {
            call_id,
            from: non_empty(fields.from),
            to: non_empty(fields.to),
            kind,
            received_at: Utc::now(),
        })
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self.kind {
            ProviderEventKind::Incoming => "incoming",
            ProviderEventKind::QueueWait => "queue-wait",
            ProviderEventKind::QueueExit { .. } => "queue-exit",
            ProviderEventKind::Bridged => "bridged",
            ProviderEventKind::Connect => "connect",
            ProviderEventKind::Status { .. } => "status",
            ProviderEventKind::Recording { .. } => "recording",
            ProviderEventKind::VoicemailPrompt => "voicemail",
            ProviderEventKind::Unavailable => "unavailable",
            ProviderEventKind::DialResult { .. } => "dial-result",
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_seconds(value: Option<&str>) -> Option<i32> {
    value
        .and_then(|v| v.trim().parse::<i32>().ok())
        .filter(|v| *v >= 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(call_sid: &str) -> WebhookFields {
        WebhookFields {
            call_sid: Some(call_sid.to_string()),
            from: Some("+15550001".to_string()),
            to: Some("+15550100".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_kind_from_path() {
        assert_eq!(
            "queue-exit".parse::<WebhookKind>().unwrap(),
            WebhookKind::QueueExit
        );
        assert_eq!(
            "dial-result".parse::<WebhookKind>().unwrap(),
            WebhookKind::DialResult
        );
        for kind in WebhookKind::ALL {
            assert_eq!(kind.as_str().parse::<WebhookKind>().unwrap(), kind);
        }
        let err = "ringback".parse::<WebhookKind>().unwrap_err();
        assert!(matches!(err, AppError::UnknownEvent(k) if k == "ringback"));
    }

    #[test]
    fn test_missing_call_sid_rejected() {
        let err = ProviderEvent::from_fields(WebhookKind::Incoming, WebhookFields::default())
            .unwrap_err();
        assert!(matches!(err, AppError::MissingField(f) if f == "CallSid"));

        let mut blank = fields("  ");
        blank.call_sid = Some("  ".to_string());
        assert!(ProviderEvent::from_fields(WebhookKind::Incoming, blank).is_err());
    }

    #[test]
    fn test_status_event() {
        let mut f = fields("CA1");
        f.call_status = Some("completed".to_string());
        f.call_duration = Some("42".to_string());

        let event = ProviderEvent::from_fields(WebhookKind::Status, f).unwrap();
        assert_eq!(event.call_id, "CA1");
        assert_eq!(
            event.kind,
            ProviderEventKind::Status {
                call_status: ProviderCallStatus::Completed,
                duration: Some(42)
            }
        );
    }

    #[test]
    fn test_queue_exit_requires_result() {
        let err = ProviderEvent::from_fields(WebhookKind::QueueExit, fields("CA1")).unwrap_err();
        assert!(matches!(err, AppError::MissingField(_)));

        let mut f = fields("CA1");
        f.queue_result = Some("hangup".to_string());
        let event = ProviderEvent::from_fields(WebhookKind::QueueExit, f).unwrap();
        assert_eq!(
            event.kind,
            ProviderEventKind::QueueExit {
                result: QueueResult::Hangup
            }
        );
    }

    #[test]
    fn test_recording_prefers_sid() {
        let mut f = fields("CA1");
        f.recording_url = Some("https://media.example/RE1".to_string());
        f.recording_sid = Some("RE1".to_string());
        f.recording_duration = Some("-3".to_string());

        let event = ProviderEvent::from_fields(WebhookKind::Recording, f).unwrap();
        assert_eq!(
            event.kind,
            ProviderEventKind::Recording {
                recording_ref: Some("RE1".to_string()),
                duration: None
            }
        );
    }

    #[test]
    fn test_provider_status_finality() {
        assert!(ProviderCallStatus::parse("no-answer").is_final());
        assert!(!ProviderCallStatus::parse("in-progress").is_final());
        assert_eq!(
            ProviderCallStatus::parse("weird"),
            ProviderCallStatus::Other("weird".to_string())
        );
        assert!(DialStatus::parse("completed").was_answered());
        assert!(!DialStatus::parse("busy").was_answered());
    }
}
