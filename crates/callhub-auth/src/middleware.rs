//! Actix-web request extractor for authenticated users

use crate::jwt::JwtService;
use crate::Claims;
use actix_web::{dev::Payload, error::ErrorUnauthorized, web, FromRequest, HttpRequest};
use callhub_core::error::AppError;
use futures::future::{ready, Ready};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Extract JWT token from request
///
/// Checks for token in the following order:
/// 1. Authorization header (Bearer token)
/// 2. Cookie named "token"
/// 3. `token` query parameter (browsers cannot set headers on a WebSocket upgrade)
fn extract_token_from_request(req: &HttpRequest) -> Option<String> {
    if let Some(auth_header) = req.headers().get("Authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    if let Some(cookie) = req.cookie("token") {
        return Some(cookie.value().to_string());
    }

    web::Query::<TokenQuery>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.into_inner().token)
        .filter(|t| !t.is_empty())
}

/// Authenticated user extractor
///
/// ```no_run
/// use actix_web::HttpResponse;
/// use callhub_auth::AuthenticatedUser;
///
/// async fn handler(user: AuthenticatedUser) -> HttpResponse {
///     HttpResponse::Ok().body(user.user_id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Id of the authenticated user
    pub user_id: String,

    /// Full claims from the JWT token
    pub claims: Claims,
}

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let jwt_service = match req.app_data::<web::Data<JwtService>>() {
            Some(service) => service,
            None => {
                warn!("JwtService not found in app data");
                return ready(Err(ErrorUnauthorized(AppError::Unauthorized(
                    "Authentication service not configured".to_string(),
                ))));
            }
        };

        let token = match extract_token_from_request(req) {
            Some(t) => t,
            None => {
                debug!("No authentication token found in request");
                return ready(Err(ErrorUnauthorized(AppError::Unauthorized(
                    "No authentication token provided".to_string(),
                ))));
            }
        };

        match jwt_service.validate_token(&token) {
            Ok(claims) => {
                debug!(user_id = %claims.sub, "User authenticated successfully");

                ready(Ok(AuthenticatedUser {
                    user_id: claims.sub.clone(),
                    claims,
                }))
            }
            Err(e) => {
                warn!(error = %e, "Token validation failed");
                ready(Err(ErrorUnauthorized(e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::testing::token_for;
    use actix_web::test::TestRequest;

    fn service() -> JwtService {
        JwtService::new("test-secret")
    }

    #[actix_web::test]
    async fn test_bearer_header() {
        let jwt = service();
        let token = token_for("test-secret", "user-1");
        let req = TestRequest::default()
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .app_data(web::Data::new(jwt))
            .to_http_request();

        let user = AuthenticatedUser::extract(&req).await.unwrap();
        assert_eq!(user.user_id, "user-1");
    }

    #[actix_web::test]
    async fn test_query_token() {
        let jwt = service();
        let token = token_for("test-secret", "user-2");
        let req = TestRequest::with_uri(&format!("/ws?token={}", token))
            .app_data(web::Data::new(jwt))
            .to_http_request();

        let user = AuthenticatedUser::extract(&req).await.unwrap();
        assert_eq!(user.user_id, "user-2");
    }

    #[actix_web::test]
    async fn test_missing_token() {
        let req = TestRequest::default()
            .app_data(web::Data::new(service()))
            .to_http_request();
        assert!(AuthenticatedUser::extract(&req).await.is_err());
    }

    #[actix_web::test]
    async fn test_invalid_token() {
        let req = TestRequest::with_uri("/ws?token=garbage")
            .app_data(web::Data::new(service()))
            .to_http_request();
        assert!(AuthenticatedUser::extract(&req).await.is_err());
    }
}
