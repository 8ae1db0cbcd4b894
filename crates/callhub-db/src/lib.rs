//! CallHub Database Layer
//!
//! PostgreSQL access for the call orchestration engine:
//!
//! - Connection pool management with sqlx
//! - Idempotent call-session upsert (row lock + widen-never-narrow merge)
//! - Destination-owner directory lookups
//! - Embedded migrations

pub mod pool;
pub mod repositories;

pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use callhub_core::{AppError, AppResult};
pub use sqlx::PgPool;
