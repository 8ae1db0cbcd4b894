//! JWT Claims structure

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn is_expired(&self) -> bool {
        self.exp <= Utc::now().timestamp()
    }

    /// ```
    /// use callhub_auth::Claims;
    ///
    /// let claims = Claims { sub: "user-1".to_string(), iat: 0, exp: 0 };
    /// assert_eq!(claims.user_id(), "user-1");
    /// ```
    pub fn user_id(&self) -> &str {
        &self.sub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::testing::claims_for;

    #[test]
    fn test_unexpired_claims() {
        let claims = claims_for("user-1", 3600);
        assert!(!claims.is_expired());
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn test_expired_claims() {
        let claims = claims_for("user-1", -3600);
        assert!(claims.is_expired());
    }
}
