//! Repository implementations
//!
//! Concrete implementations of the persistence and directory traits
//! defined in callhub-core, using sqlx for PostgreSQL access.

pub mod call_session_repo;
pub mod destination_repo;

pub use call_session_repo::PgCallSessionRepository;
pub use destination_repo::PgDestinationDirectory;
