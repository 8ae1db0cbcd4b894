//! Cache key builders for the dedupe memory
//!
//! # Key Patterns
//!
//! - `callhub:dedupe:bucket:{owner}:{to}:{bucket}` - call id registered for a
//!   creation bucket
//! - `callhub:dedupe:seen:{call_id}` - marker for a call id seen recently
//!
//! # Example
//!
//! ```
//! use callhub_cache::keys;
//!
//! assert_eq!(keys::call_seen_key("CA1"), "callhub:dedupe:seen:CA1");
//! ```

use callhub_core::models::DedupeKey;

/// Prefix for creation-bucket entries
///
/// Format: `callhub:dedupe:bucket:{owner}:{to}:{bucket}`
pub const BUCKET_PREFIX: &str = "callhub:dedupe:bucket";

/// Prefix for seen-call markers
///
/// Format: `callhub:dedupe:seen:{call_id}`
pub const SEEN_PREFIX: &str = "callhub:dedupe:seen";

/// Default lifetime of dedupe entries (60 minutes)
pub const DEDUPE_TTL_SECS: u64 = 3600;

/// Build the key for a creation bucket
pub fn bucket_key(key: &DedupeKey) -> String {
    format!("{}:{}", BUCKET_PREFIX, key)
}

/// Build the key marking a call id as seen
pub fn call_seen_key(call_id: &str) -> String {
    format!("{}:{}", SEEN_PREFIX, call_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_key() {
        let key = DedupeKey::new("user-1", "+15550100", 170_000_000);
        assert_eq!(
            bucket_key(&key),
            "callhub:dedupe:bucket:user-1:+15550100:170000000"
        );
    }

    #[test]
    fn test_key_uniqueness() {
        let key = DedupeKey::new("CA1", "", 0);
        assert_ne!(bucket_key(&key), call_seen_key("CA1"));
    }

    #[test]
    fn test_ttl_constant() {
        assert_eq!(DEDUPE_TTL_SECS, 3600); // 60 minutes
    }
}
