//! Destination-owner directory entries

use serde::{Deserialize, Serialize};

/// Owner and per-destination routing configuration for an inbound address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationOwner {
    /// Destination address (the number that was dialed)
    pub address: String,

    /// User that owns the destination
    pub owner_user_id: String,

    /// Number to dial when the owner has no live device
    pub forward_to: Option<String>,

    /// Whether unanswered calls go to voicemail instead of `missed`
    pub voicemail_enabled: bool,

    /// Custom voicemail greeting
    pub greeting: Option<String>,
}

impl DestinationOwner {
    pub fn new(address: impl Into<String>, owner_user_id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            owner_user_id: owner_user_id.into(),
            forward_to: None,
            voicemail_enabled: false,
            greeting: None,
        }
    }

    pub fn with_voicemail(mut self, greeting: Option<String>) -> Self {
        self.voicemail_enabled = true;
        self.greeting = greeting;
        self
    }

    pub fn with_forwarding(mut self, number: impl Into<String>) -> Self {
        self.forward_to = Some(number.into());
        self
    }

    /// Greeting to play, falling back to `default`
    pub fn greeting_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.greeting
            .as_deref()
            .filter(|g| !g.trim().is_empty())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_fallback() {
        let owner = DestinationOwner::new("+15550100", "user-1");
        assert_eq!(owner.greeting_or("default"), "default");

        let owner = owner.with_voicemail(Some("   ".to_string()));
        assert_eq!(owner.greeting_or("default"), "default");

        let owner = DestinationOwner::new("+15550100", "user-1")
            .with_voicemail(Some("Hi, leave a note".to_string()));
        assert!(owner.voicemail_enabled);
        assert_eq!(owner.greeting_or("default"), "Hi, leave a note");
    }
}
