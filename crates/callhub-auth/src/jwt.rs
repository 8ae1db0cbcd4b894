//! JWT validation service

use crate::claims::Claims;
use callhub_core::error::AppError;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, DecodingKey, Validation};
use tracing::{debug, warn};

/// Validates session tokens signed with the shared secret
#[derive(Clone)]
pub struct JwtService {
    decoding_key: DecodingKey,
}

impl JwtService {
    /// Create a new JWT service
    ///
    /// ```
    /// use callhub_auth::JwtService;
    ///
    /// let jwt_service = JwtService::new("my-secret-key");
    /// assert!(jwt_service.validate_token("not-a-jwt").is_err());
    /// ```
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Validate a JWT token and extract claims
    ///
    /// # Errors
    ///
    /// - `AppError::TokenExpired` if the token has expired
    /// - `AppError::InvalidToken` if the token is invalid
    pub fn validate_token(&self, token: &str) -> Result<Claims, AppError> {
        let validation = Validation::default();

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            if matches!(e.kind(), ErrorKind::ExpiredSignature) {
                warn!("Token expired");
                return AppError::TokenExpired;
            }

            warn!(error = %e, "Invalid token");
            AppError::InvalidToken(format!("Token validation failed: {}", e))
        })?;

        let claims = token_data.claims;

        // Validation allows leeway on exp
        if claims.is_expired() {
            warn!(user_id = %claims.sub, "Token expired (manual check)");
            return Err(AppError::TokenExpired);
        }

        debug!(user_id = %claims.sub, "Token validated successfully");

        Ok(claims)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::claims::Claims;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    /// Sign `claims` the way the session issuer does
    pub fn sign(secret: &str, claims: &Claims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    pub fn claims_for(user_id: &str, expires_in_secs: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + expires_in_secs,
        }
    }

    pub fn token_for(secret: &str, user_id: &str) -> String {
        sign(secret, &claims_for(user_id, 3600))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{claims_for, sign, token_for};
    use super::*;

    #[test]
    fn test_valid_token() {
        let service = JwtService::new("test-secret");
        let claims = service
            .validate_token(&token_for("test-secret", "user-1"))
            .unwrap();
        assert_eq!(claims.user_id(), "user-1");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = JwtService::new("secret-b");
        let token = token_for("secret-a", "user-1");
        assert!(matches!(
            verifier.validate_token(&token),
            Err(AppError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let service = JwtService::new("test-secret");
        let token = sign("test-secret", &claims_for("user-1", -3600));
        assert!(matches!(
            service.validate_token(&token),
            Err(AppError::TokenExpired)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let service = JwtService::new("test-secret");
        assert!(service.validate_token("not-a-jwt").is_err());
    }
}
