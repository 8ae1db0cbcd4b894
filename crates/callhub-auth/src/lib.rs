//! Authentication for CallHub
//!
//! Sessions are issued elsewhere; this crate only validates the JWTs they
//! carry and turns them into an [`AuthenticatedUser`] for actix-web handlers
//! and the duplex channel upgrade.
//!
//! ```no_run
//! use actix_web::HttpResponse;
//! use callhub_auth::AuthenticatedUser;
//!
//! async fn protected_route(user: AuthenticatedUser) -> HttpResponse {
//!     HttpResponse::Ok().body(user.user_id)
//! }
//! ```

pub mod claims;
pub mod jwt;
pub mod middleware;

pub use claims::Claims;
pub use jwt::JwtService;
pub use middleware::AuthenticatedUser;
