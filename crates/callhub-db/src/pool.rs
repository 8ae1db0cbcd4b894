//! PostgreSQL pool and schema

use callhub_core::config::DatabaseConfig;
use callhub_core::{AppError, AppResult};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Background writes give up long before this; keep acquisition short
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Connect, verify the connection and optionally apply migrations
///
/// ```no_run
/// use callhub_core::config::DatabaseConfig;
/// use callhub_db::create_pool;
///
/// # async fn run() -> callhub_core::AppResult<()> {
/// let config = DatabaseConfig {
///     url: "postgresql://localhost/callhub".to_string(),
///     max_connections: 10,
///     run_migrations: true,
/// };
/// let pool = create_pool(&config).await?;
/// # Ok(())
/// # }
/// ```
#[instrument(skip(config), fields(max_connections = config.max_connections))]
pub async fn create_pool(config: &DatabaseConfig) -> AppResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .connect(&config.url)
        .await
        .map_err(|e| {
            warn!(error = %e, "Database connection failed");
            AppError::Pool(format!("Failed to connect to database: {}", e))
        })?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| AppError::Database(format!("Database health check failed: {}", e)))?;
    info!("Database connection verified");

    if config.run_migrations {
        run_migrations(&pool).await?;
    }

    Ok(pool)
}

/// Apply pending embedded migrations
pub async fn run_migrations(pool: &PgPool) -> AppResult<()> {
    MIGRATOR.run(pool).await.map_err(|e| {
        warn!(error = %e, "Database migration failed");
        AppError::Database(format!("Migration failed: {}", e))
    })?;
    info!("Database migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_create_pool_and_migrate() {
        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/callhub".to_string()),
            max_connections: 2,
            run_migrations: true,
        };

        let pool = create_pool(&config).await.unwrap();
        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(applied >= 1);
    }
}
