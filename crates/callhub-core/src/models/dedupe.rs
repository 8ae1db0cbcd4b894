//! Dedupe keys used to fold near-simultaneous session creations

use chrono::{DateTime, Utc};
use std::fmt;

/// `(ownerUserId, toAddress, timeBucket)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey {
    pub owner_user_id: String,
    pub to_address: String,
    pub bucket: i64,
}

impl DedupeKey {
    pub fn new(owner_user_id: &str, to_address: &str, bucket: i64) -> Self {
        Self {
            owner_user_id: owner_user_id.to_string(),
            to_address: to_address.to_string(),
            bucket,
        }
    }

    /// Key for the bucket containing `at`
    pub fn at(owner_user_id: &str, to_address: &str, at: DateTime<Utc>, width_secs: i64) -> Self {
        Self::new(owner_user_id, to_address, time_bucket(at, width_secs))
    }

    /// Same owner and destination, one bucket earlier
    pub fn previous(&self) -> Self {
        Self {
            bucket: self.bucket - 1,
            ..self.clone()
        }
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.owner_user_id, self.to_address, self.bucket)
    }
}

/// Index of the `width_secs` wide bucket containing `at`
pub fn time_bucket(at: DateTime<Utc>, width_secs: i64) -> i64 {
    at.timestamp().div_euclid(width_secs.max(1))
}
