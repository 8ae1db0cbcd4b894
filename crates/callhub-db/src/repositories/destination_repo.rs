//! Destination-owner directory backed by the `destinations` table

use async_trait::async_trait;
use callhub_core::{
    models::DestinationOwner, traits::DestinationDirectory, AppError, AppResult,
};
use sqlx::PgPool;
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of DestinationDirectory
pub struct PgDestinationDirectory {
    pool: PgPool,
}

impl PgDestinationDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DestinationDirectory for PgDestinationDirectory {
    #[instrument(skip(self))]
    async fn lookup(&self, address: &str) -> AppResult<Option<DestinationOwner>> {
        debug!("Looking up destination owner for {}", address);

        let row = sqlx::query_as::<sqlx::Postgres, DestinationRow>(
            r#"
            SELECT address, owner_user_id, forward_to, voicemail_enabled, greeting
            FROM destinations
            WHERE address = $1 AND active = TRUE
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error looking up destination {}: {}", address, e);
            AppError::Database(format!("Failed to look up destination: {}", e))
        })?;

        Ok(row.map(Into::into))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DestinationRow {
    address: String,
    owner_user_id: String,
    forward_to: Option<String>,
    voicemail_enabled: bool,
    greeting: Option<String>,
}

impl From<DestinationRow> for DestinationOwner {
    fn from(row: DestinationRow) -> Self {
        Self {
            address: row.address,
            owner_user_id: row.owner_user_id,
            forward_to: row.forward_to.filter(|n| !n.trim().is_empty()),
            voicemail_enabled: row.voicemail_enabled,
            greeting: row.greeting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_conversion_drops_blank_forward() {
        let owner: DestinationOwner = DestinationRow {
            address: "+15550100".to_string(),
            owner_user_id: "user-1".to_string(),
            forward_to: Some(" ".to_string()),
            voicemail_enabled: true,
            greeting: None,
        }
        .into();

        assert_eq!(owner.forward_to, None);
        assert!(owner.voicemail_enabled);
    }
}
