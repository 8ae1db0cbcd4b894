//! Call session model and lifecycle rules
//!
//! A `CallSession` tracks one inbound call attempt from the first webhook
//! to its final outcome. All mutation goes through [`CallSession::apply`],
//! [`CallSession::attach_recording`] and [`CallSession::merge_from`], which
//! enforce the monotonic state graph:
//!
//! ```text
//! ringing --accept/bridge--> answered --hangup--> completed
//! ringing --decline--> declined
//! ringing --timeout--> missed | voicemail
//! ringing --caller hangup--> canceled
//! ringing --provider failure--> failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an inbound call attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ringing,
    Answered,
    Declined,
    Missed,
    Canceled,
    Voicemail,
    Completed,
    Failed,
}

impl CallStatus {
    /// Terminal states never change again
    pub fn is_terminal(self) -> bool {
        !matches!(self, CallStatus::Ringing | CallStatus::Answered)
    }

    /// Whether the state graph has an edge `self -> next`
    pub fn can_transition_to(self, next: CallStatus) -> bool {
        match self {
            CallStatus::Ringing => next != CallStatus::Ringing && next != CallStatus::Completed,
            CallStatus::Answered => next == CallStatus::Completed,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::Declined => "declined",
            CallStatus::Missed => "missed",
            CallStatus::Canceled => "canceled",
            CallStatus::Voicemail => "voicemail",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ringing" => Ok(CallStatus::Ringing),
            "answered" => Ok(CallStatus::Answered),
            "declined" => Ok(CallStatus::Declined),
            "missed" => Ok(CallStatus::Missed),
            "canceled" => Ok(CallStatus::Canceled),
            "voicemail" => Ok(CallStatus::Voicemail),
            "completed" => Ok(CallStatus::Completed),
            "failed" => Ok(CallStatus::Failed),
            other => Err(format!("unknown call status '{}'", other)),
        }
    }
}

/// Who resolved the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandledBy {
    User,
    Voicemail,
    System,
}

impl HandledBy {
    pub fn as_str(self) -> &'static str {
        match self {
            HandledBy::User => "user",
            HandledBy::Voicemail => "voicemail",
            HandledBy::System => "system",
        }
    }
}

impl fmt::Display for HandledBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandledBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(HandledBy::User),
            "voicemail" => Ok(HandledBy::Voicemail),
            "system" => Ok(HandledBy::System),
            other => Err(format!("unknown handler '{}'", other)),
        }
    }
}

/// A requested lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// User accepted, queue bridged, or forwarded leg answered
    Answer,
    /// User declined from a device
    Decline,
    /// Ring window elapsed without voicemail
    Miss,
    /// Ring window elapsed (or caller reached the recorder) with voicemail
    Voicemail,
    /// Caller hung up before anyone responded
    Cancel,
    /// Provider reported a terminal failure, or the call was unroutable
    Fail,
    /// Answered call ended normally
    Complete { provider_duration: Option<i32> },
}

impl Transition {
    pub fn target(&self) -> CallStatus {
        match self {
            Transition::Answer => CallStatus::Answered,
            Transition::Decline => CallStatus::Declined,
            Transition::Miss => CallStatus::Missed,
            Transition::Voicemail => CallStatus::Voicemail,
            Transition::Cancel => CallStatus::Canceled,
            Transition::Fail => CallStatus::Failed,
            Transition::Complete { .. } => CallStatus::Completed,
        }
    }

    fn handled_by(&self) -> HandledBy {
        match self {
            Transition::Answer | Transition::Decline | Transition::Complete { .. } => {
                HandledBy::User
            }
            Transition::Voicemail => HandledBy::Voicemail,
            Transition::Miss | Transition::Cancel | Transition::Fail => HandledBy::System,
        }
    }

    fn provider_duration(&self) -> Option<i32> {
        match self {
            Transition::Complete { provider_duration } => *provider_duration,
            _ => None,
        }
    }
}

/// Result of applying a transition to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// State changed
    Applied { from: CallStatus, to: CallStatus },
    /// Session already in the requested state
    Duplicate,
    /// No edge from the current state; session unchanged
    Rejected { current: CallStatus },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

/// One inbound call attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    /// Provider-assigned call identifier
    pub call_id: String,

    /// Owner of the destination endpoint; `None` when nobody owns it
    pub owner_user_id: Option<String>,

    /// Caller address
    pub from_address: String,

    /// Destination address
    pub to_address: String,

    pub status: CallStatus,

    pub created_at: DateTime<Utc>,

    pub answered_at: Option<DateTime<Utc>>,

    pub ended_at: Option<DateTime<Utc>>,

    /// Frozen on the terminal transition
    pub duration_seconds: Option<i32>,

    pub handled_by: Option<HandledBy>,

    /// Recording reference; may arrive after the session is terminal
    pub recording_ref: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl CallSession {
    /// Create a ringing session
    pub fn new(
        call_id: impl Into<String>,
        owner_user_id: Option<String>,
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            owner_user_id,
            from_address: from_address.into(),
            to_address: to_address.into(),
            status: CallStatus::Ringing,
            created_at,
            answered_at: None,
            ended_at: None,
            duration_seconds: None,
            handled_by: None,
            recording_ref: None,
            updated_at: created_at,
        }
    }

    pub fn is_ringing(&self) -> bool {
        self.status == CallStatus::Ringing
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_user_id.as_deref() == Some(user_id)
    }

    /// Fill identity fields that were unknown at creation. Set-once.
    ///
    /// Returns `true` if any field was filled.
    pub fn fill_identity(
        &mut self,
        owner_user_id: Option<&str>,
        from_address: Option<&str>,
        to_address: Option<&str>,
    ) -> bool {
        let mut filled = false;
        if self.owner_user_id.is_none() {
            if let Some(owner) = owner_user_id {
                self.owner_user_id = Some(owner.to_string());
                filled = true;
            }
        }
        if self.from_address.is_empty() {
            if let Some(from) = from_address.filter(|from| !from.is_empty()) {
                self.from_address = from.to_string();
                filled = true;
            }
        }
        if self.to_address.is_empty() {
            if let Some(to) = to_address.filter(|to| !to.is_empty()) {
                self.to_address = to.to_string();
                filled = true;
            }
        }
        filled
    }

    /// Apply a transition at time `at`
    pub fn apply(&mut self, transition: Transition, at: DateTime<Utc>) -> TransitionOutcome {
        let target = transition.target();

        if self.status == target {
            return TransitionOutcome::Duplicate;
        }
        if !self.status.can_transition_to(target) {
            return TransitionOutcome::Rejected {
                current: self.status,
            };
        }

        let from = self.status;
        self.status = target;

        if target == CallStatus::Answered && self.answered_at.is_none() {
            self.answered_at = Some(at.max(self.created_at));
        }

        if target.is_terminal() {
            let floor = self.answered_at.unwrap_or(self.created_at);
            let ended = at.max(floor);
            self.ended_at = Some(ended);
            self.duration_seconds = Some(self.talk_seconds(ended, transition.provider_duration()));
        }

        if self.handled_by.is_none() {
            self.handled_by = Some(transition.handled_by());
        }

        self.touch(at);
        TransitionOutcome::Applied { from, to: target }
    }

    /// Seconds between answer and end, widened by the provider's figure
    fn talk_seconds(&self, ended: DateTime<Utc>, provider_duration: Option<i32>) -> i32 {
        let measured = self
            .answered_at
            .map(|answered| (ended - answered).num_seconds().max(0) as i32)
            .unwrap_or(0);

        measured
            .max(provider_duration.unwrap_or(0))
            .max(self.duration_seconds.unwrap_or(0))
    }

    /// Transition implied by the provider ending the call leg.
    ///
    /// An answered call completes. A ringing call is canceled by the caller,
    /// or failed when the provider reports a failure. Terminal sessions
    /// yield `None`.
    pub fn hangup_transition(&self, failed: bool, provider_duration: Option<i32>) -> Option<Transition> {
        match self.status {
            CallStatus::Answered => Some(Transition::Complete { provider_duration }),
            CallStatus::Ringing if failed => Some(Transition::Fail),
            CallStatus::Ringing => Some(Transition::Cancel),
            _ => None,
        }
    }

    /// Attach a recording reference without touching `status`.
    ///
    /// Returns `true` when the reference was stored. A session keeps the
    /// first reference it receives.
    pub fn attach_recording(&mut self, reference: &str, at: DateTime<Utc>) -> bool {
        if self.recording_ref.is_some() || reference.is_empty() {
            return false;
        }
        self.recording_ref = Some(reference.to_string());
        self.touch(at);
        true
    }

    /// Merge another snapshot of the same call, widening and never narrowing.
    ///
    /// The incoming status is taken only along a valid edge; the timestamps
    /// and `handled_by` that belong to that edge come with it. Recording and
    /// identity fields are set-once, duration takes the max.
    pub fn merge_from(&mut self, incoming: &CallSession) {
        self.fill_identity(
            incoming.owner_user_id.as_deref(),
            Some(incoming.from_address.as_str()),
            Some(incoming.to_address.as_str()),
        );

        let mut steps = Vec::with_capacity(2);
        if self.status == CallStatus::Ringing
            && incoming.status == CallStatus::Completed
            && incoming.answered_at.is_some()
        {
            // ringing -> completed only exists through answered
            steps.push(CallStatus::Answered);
        }
        steps.push(incoming.status);

        for step in steps {
            if self.status.can_transition_to(step) {
                self.status = step;
                if step == CallStatus::Answered && self.answered_at.is_none() {
                    self.answered_at = incoming.answered_at;
                }
                if step.is_terminal() && self.ended_at.is_none() {
                    self.ended_at = incoming.ended_at;
                }
                if self.handled_by.is_none() {
                    self.handled_by = incoming.handled_by;
                }
            }
        }

        if self.status.is_terminal() {
            if let Some(incoming_duration) = incoming.duration_seconds {
                let current = self.duration_seconds.unwrap_or(0);
                self.duration_seconds = Some(current.max(incoming_duration));
            }
        }

        if self.recording_ref.is_none() {
            self.recording_ref = incoming.recording_ref.clone();
        }

        self.created_at = self.created_at.min(incoming.created_at);
        self.touch(incoming.updated_at);
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.updated_at {
            self.updated_at = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ringing() -> CallSession {
        CallSession::new(
            "CA100",
            Some("user-1".to_string()),
            "+15550001",
            "+15550100",
            Utc::now(),
        )
    }

    #[test]
    fn test_terminal_states() {
        assert!(!CallStatus::Ringing.is_terminal());
        assert!(!CallStatus::Answered.is_terminal());
        for status in [
            CallStatus::Declined,
            CallStatus::Missed,
            CallStatus::Canceled,
            CallStatus::Voicemail,
            CallStatus::Completed,
            CallStatus::Failed,
        ] {
            assert!(status.is_terminal(), "{} should be terminal", status);
            assert!(!status.can_transition_to(CallStatus::Ringing));
            assert!(!status.can_transition_to(CallStatus::Answered));
        }
    }

    #[test]
    fn test_ringing_cannot_complete_directly() {
        assert!(!CallStatus::Ringing.can_transition_to(CallStatus::Completed));
        assert!(CallStatus::Answered.can_transition_to(CallStatus::Completed));
        assert!(!CallStatus::Answered.can_transition_to(CallStatus::Declined));
    }

    #[test]
    fn test_status_round_trip_strings() {
        assert_eq!("voicemail".parse::<CallStatus>(), Ok(CallStatus::Voicemail));
        assert_eq!(CallStatus::Canceled.to_string(), "canceled");
        assert!("busy".parse::<CallStatus>().is_err());
        assert_eq!("system".parse::<HandledBy>(), Ok(HandledBy::System));
    }

    #[test]
    fn test_answer_sets_answered_at_once() {
        let mut session = ringing();
        let t1 = session.created_at + Duration::seconds(4);

        let outcome = session.apply(Transition::Answer, t1);
        assert_eq!(
            outcome,
            TransitionOutcome::Applied {
                from: CallStatus::Ringing,
                to: CallStatus::Answered
            }
        );
        assert_eq!(session.answered_at, Some(t1));
        assert_eq!(session.handled_by, Some(HandledBy::User));

        // Redelivered bridge
        let outcome = session.apply(Transition::Answer, t1 + Duration::seconds(9));
        assert_eq!(outcome, TransitionOutcome::Duplicate);
        assert_eq!(session.answered_at, Some(t1));
    }

    #[test]
    fn test_complete_freezes_duration() {
        let mut session = ringing();
        let answered = session.created_at + Duration::seconds(5);
        session.apply(Transition::Answer, answered);

        let ended = answered + Duration::seconds(62);
        let outcome = session.apply(
            Transition::Complete {
                provider_duration: Some(60),
            },
            ended,
        );
        assert!(outcome.is_applied());
        assert_eq!(session.duration_seconds, Some(62));
        assert_eq!(session.ended_at, Some(ended));

        // A later replay carrying a larger duration is rejected as a duplicate
        let outcome = session.apply(
            Transition::Complete {
                provider_duration: Some(500),
            },
            ended + Duration::seconds(30),
        );
        assert_eq!(outcome, TransitionOutcome::Duplicate);
        assert_eq!(session.duration_seconds, Some(62));
    }

    #[test]
    fn test_provider_duration_widens() {
        let mut session = ringing();
        let answered = session.created_at;
        session.apply(Transition::Answer, answered);
        session.apply(
            Transition::Complete {
                provider_duration: Some(90),
            },
            answered + Duration::seconds(30),
        );
        assert_eq!(session.duration_seconds, Some(90));
    }

    #[test]
    fn test_terminal_never_regresses() {
        let mut session = ringing();
        let at = session.created_at + Duration::seconds(3);
        session.apply(Transition::Cancel, at);

        for transition in [
            Transition::Answer,
            Transition::Decline,
            Transition::Miss,
            Transition::Voicemail,
            Transition::Fail,
            Transition::Complete {
                provider_duration: Some(10),
            },
        ] {
            let outcome = session.apply(transition, at + Duration::seconds(1));
            assert_eq!(
                outcome,
                TransitionOutcome::Rejected {
                    current: CallStatus::Canceled
                }
            );
        }
        assert_eq!(session.status, CallStatus::Canceled);
        assert_eq!(session.handled_by, Some(HandledBy::System));
        assert_eq!(session.duration_seconds, Some(0));
    }

    #[test]
    fn test_recording_attaches_after_terminal() {
        let mut session = ringing();
        let answered = session.created_at;
        session.apply(Transition::Answer, answered);
        session.apply(
            Transition::Complete {
                provider_duration: None,
            },
            answered + Duration::seconds(20),
        );
        let before = session.clone();

        assert!(session.attach_recording("RE123", answered + Duration::seconds(30)));
        assert_eq!(session.recording_ref.as_deref(), Some("RE123"));
        assert_eq!(session.status, before.status);
        assert_eq!(session.duration_seconds, before.duration_seconds);

        assert!(!session.attach_recording("RE999", answered + Duration::seconds(40)));
        assert_eq!(session.recording_ref.as_deref(), Some("RE123"));
    }

    #[test]
    fn test_hangup_transition_depends_on_status() {
        let mut session = ringing();
        assert_eq!(session.hangup_transition(false, None), Some(Transition::Cancel));
        assert_eq!(session.hangup_transition(true, None), Some(Transition::Fail));

        session.apply(Transition::Answer, session.created_at);
        assert_eq!(
            session.hangup_transition(true, Some(12)),
            Some(Transition::Complete {
                provider_duration: Some(12)
            })
        );

        session.apply(Transition::Complete { provider_duration: None }, Utc::now());
        assert_eq!(session.hangup_transition(false, None), None);
    }

    #[test]
    fn test_fill_identity_is_set_once() {
        let mut session = CallSession::new("CA1", None, "", "", Utc::now());
        assert!(session.fill_identity(Some("user-9"), Some("+1"), Some("+2")));
        assert!(!session.fill_identity(Some("user-7"), Some("+3"), Some("+4")));
        assert_eq!(session.owner_user_id.as_deref(), Some("user-9"));
        assert_eq!(session.from_address, "+1");
        assert_eq!(session.to_address, "+2");
    }

    #[test]
    fn test_merge_widens_and_never_narrows() {
        let mut stored = ringing();
        let mut answered = stored.clone();
        answered.apply(Transition::Answer, stored.created_at + Duration::seconds(2));
        let mut completed = answered.clone();
        completed.apply(
            Transition::Complete {
                provider_duration: Some(40),
            },
            stored.created_at + Duration::seconds(42),
        );

        // Out of order: completed snapshot lands before answered snapshot
        stored.merge_from(&completed);
        assert_eq!(stored.status, CallStatus::Completed);
        assert_eq!(stored.answered_at, completed.answered_at);
        assert_eq!(stored.duration_seconds, Some(40));

        stored.merge_from(&answered);
        assert_eq!(stored.status, CallStatus::Completed);
        assert_eq!(stored.duration_seconds, Some(40));
    }

    #[test]
    fn test_merge_rejects_conflicting_terminal() {
        let mut stored = ringing();
        let mut canceled = stored.clone();
        canceled.apply(Transition::Cancel, stored.created_at + Duration::seconds(1));
        let mut answered = stored.clone();
        answered.apply(Transition::Answer, stored.created_at + Duration::seconds(1));

        stored.merge_from(&canceled);
        stored.merge_from(&answered);

        assert_eq!(stored.status, CallStatus::Canceled);
        assert!(stored.answered_at.is_none());
    }
}
