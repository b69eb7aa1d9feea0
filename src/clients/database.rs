use anyhow::{Context, Error, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    clients::{ConsentStore, DeliveryLog},
    models::{
        consent::{ConsentRecord, ConsentStats},
        delivery::{ActionSummary, DeliveryLogEntry, DeliveryStatus},
    },
};

/// Creates `webhook_logs` when missing and adds the columns this service
/// writes to a table created with only the legacy column set. Legacy rows get
/// a status derived from their response code.
pub const MIGRATE_SQL: &str = "\
    CREATE TABLE IF NOT EXISTS webhook_logs (\
        id BIGSERIAL PRIMARY KEY,\
        user_id UUID,\
        webhook_type TEXT NOT NULL,\
        payload JSONB NOT NULL,\
        response_status INTEGER,\
        response_body TEXT,\
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\
    );\
    ALTER TABLE webhook_logs ADD COLUMN IF NOT EXISTS trace_id UUID;\
    ALTER TABLE webhook_logs ADD COLUMN IF NOT EXISTS status TEXT;\
    ALTER TABLE webhook_logs ADD COLUMN IF NOT EXISTS error_message TEXT;\
    UPDATE webhook_logs SET status = CASE \
        WHEN response_status BETWEEN 200 AND 299 THEN 'success' ELSE 'failed' END \
        WHERE status IS NULL;\
    CREATE INDEX IF NOT EXISTS idx_webhook_logs_created_at ON webhook_logs (created_at);";

/// `$2` is a typed `UUID` parameter; ids that are not UUIDs are stored as
/// NULL and stay readable from the payload.
pub const INSERT_LOG_SQL: &str = r#"
    INSERT INTO webhook_logs (
        trace_id,
        user_id,
        webhook_type,
        payload,
        status,
        response_status,
        response_body,
        error_message,
        created_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

/// `$1` is text and is compared against the id as text, never cast to UUID.
pub const RECENT_LOGS_SQL: &str = r#"
    SELECT trace_id, webhook_type, payload, status,
           COALESCE(user_id::text, payload->>'user_id') AS user_id,
           response_status, response_body, error_message, created_at
    FROM webhook_logs
    WHERE ($1::text IS NULL OR COALESCE(user_id::text, payload->>'user_id') = $1::text)
    ORDER BY created_at DESC
    LIMIT $2
"#;

pub const CONSENT_SQL: &str = r#"
    SELECT whatsapp_consent, marketing_consent, phone
    FROM user_profiles
    WHERE user_id::text = $1::text
    LIMIT 1
"#;

/// The value bound to the `UUID` user id column.
pub fn log_user_id(user_id: Option<&str>) -> Option<Uuid> {
    user_id.and_then(|id| Uuid::parse_str(id.trim()).ok())
}

/// Status for rows written before the `status` column existed.
pub fn legacy_status(response_status: Option<i32>) -> DeliveryStatus {
    match response_status {
        Some(200..=299) => DeliveryStatus::Success,
        _ => DeliveryStatus::Failed,
    }
}

/// PostgreSQL-backed delivery log (`webhook_logs`) and consent store
/// (`user_profiles`).
pub struct DatabaseClient {
    client: Client,
}

impl DatabaseClient {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection failed");
            }
        });

        info!("PostgreSQL connection established");

        let database = Self { client };
        database.migrate().await?;

        Ok(database)
    }

    async fn migrate(&self) -> Result<(), Error> {
        self.client
            .batch_execute(MIGRATE_SQL)
            .await
            .context("failed to migrate webhook_logs")?;

        debug!("webhook_logs schema ensured");
        Ok(())
    }
}

#[async_trait]
impl DeliveryLog for DatabaseClient {
    async fn record(&self, entry: DeliveryLogEntry) -> Result<(), Error> {
        let status_str = entry.status.to_string();
        let response_status = entry.response_status.map(i32::from);

        let user_id = log_user_id(entry.user_id.as_deref());
        if user_id.is_none() && entry.user_id.is_some() {
            debug!(
                trace_id = %entry.trace_id,
                "User id is not a UUID, storing it in the payload only"
            );
        }

        self.client
            .execute(
                INSERT_LOG_SQL,
                &[
                    &entry.trace_id,
                    &user_id,
                    &entry.action_type,
                    &entry.payload,
                    &status_str,
                    &response_status,
                    &entry.response_body,
                    &entry.error_message,
                    &entry.created_at,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    trace_id = %entry.trace_id,
                    "Failed to write delivery log to database"
                );
                anyhow!("Database write failed: {}", e)
            })?;

        debug!(
            trace_id = %entry.trace_id,
            status = %status_str,
            "Delivery log written to database"
        );

        Ok(())
    }

    async fn recent(
        &self,
        user_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<DeliveryLogEntry>, Error> {
        let rows = self
            .client
            .query(RECENT_LOGS_SQL, &[&user_id, &limit])
            .await
            .context("failed to query webhook_logs")?;

        rows.into_iter().map(row_to_entry).collect()
    }

    async fn summarize(&self, since: DateTime<Utc>) -> Result<Vec<ActionSummary>, Error> {
        let rows = self
            .client
            .query(
                r#"
                SELECT webhook_type,
                       COUNT(*) AS total,
                       COUNT(*) FILTER (WHERE status = 'success') AS successful,
                       COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                       COUNT(*) FILTER (WHERE status = 'queued') AS queued,
                       MAX(created_at) AS last_attempt_at
                FROM webhook_logs
                WHERE created_at >= $1
                GROUP BY webhook_type
                ORDER BY total DESC
                "#,
                &[&since],
            )
            .await
            .context("failed to summarize webhook_logs")?;

        rows.into_iter()
            .map(|row| -> Result<ActionSummary, Error> {
                Ok(ActionSummary {
                    action_type: row.try_get("webhook_type")?,
                    total: row.try_get("total")?,
                    successful: row.try_get("successful")?,
                    failed: row.try_get("failed")?,
                    queued: row.try_get("queued")?,
                    last_attempt_at: row.try_get("last_attempt_at")?,
                })
            })
            .collect()
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let deleted = self
            .client
            .execute("DELETE FROM webhook_logs WHERE created_at < $1", &[&cutoff])
            .await
            .context("failed to purge webhook_logs")?;

        Ok(deleted)
    }

    async fn health_check(&self) -> Result<(), Error> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}

#[async_trait]
impl ConsentStore for DatabaseClient {
    async fn get_consent(&self, user_id: &str) -> Result<Option<ConsentRecord>, Error> {
        let row = self
            .client
            .query_opt(CONSENT_SQL, &[&user_id])
            .await
            .context("failed to query user_profiles")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let primary_consent: Option<bool> = row.try_get("whatsapp_consent")?;
        let marketing_consent: Option<bool> = row.try_get("marketing_consent")?;
        let contact_address: Option<String> = row.try_get("phone")?;

        Ok(Some(ConsentRecord {
            primary_consent: primary_consent.unwrap_or(false),
            marketing_consent: marketing_consent.unwrap_or(false),
            contact_address,
        }))
    }

    async fn consent_stats(&self) -> Result<ConsentStats, Error> {
        let row = self
            .client
            .query_one(
                r#"
                SELECT COUNT(*) AS total_users,
                       COUNT(*) FILTER (WHERE whatsapp_consent) AS primary_consent,
                       COUNT(*) FILTER (WHERE marketing_consent) AS marketing_consent,
                       COUNT(*) FILTER (WHERE phone IS NOT NULL AND phone <> '') AS has_contact
                FROM user_profiles
                "#,
                &[],
            )
            .await
            .context("failed to aggregate user_profiles")?;

        Ok(ConsentStats {
            total_users: row.try_get("total_users")?,
            primary_consent: row.try_get("primary_consent")?,
            marketing_consent: row.try_get("marketing_consent")?,
            has_contact: row.try_get("has_contact")?,
        })
    }
}

fn row_to_entry(row: Row) -> Result<DeliveryLogEntry, Error> {
    let trace_id: Option<Uuid> = row.try_get("trace_id")?;
    let status: Option<String> = row.try_get("status")?;
    let response_status: Option<i32> = row.try_get("response_status")?;
    let payload: JsonValue = row.try_get("payload")?;

    let status = match status {
        Some(status) => status.parse::<DeliveryStatus>()?,
        None => legacy_status(response_status),
    };

    Ok(DeliveryLogEntry {
        trace_id: trace_id.unwrap_or_else(Uuid::nil),
        action_type: row.try_get("webhook_type")?,
        user_id: row.try_get("user_id")?,
        payload,
        status,
        response_status: response_status.and_then(|s| u16::try_from(s).ok()),
        response_body: row.try_get("response_body")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
    })
}
