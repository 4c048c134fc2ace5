use async_trait::async_trait;
use reqwest::Client;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::models::notification::{OutboxEntry, ReconciliationEvent};

/// Receives reconciliation events after their transaction has committed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &ReconciliationEvent) -> Result<()>;
}

/// Used when no delivery target is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &ReconciliationEvent) -> Result<()> {
        tracing::info!(event_type = event.event_type(), ?event, "reconciliation event");
        Ok(())
    }
}

/// Queues events in `notification_outbox`; [`NotificationService::run_once`]
/// delivers them to the webhook at least once.
#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
    client: Client,
    target_url: String,
}

const OUTBOX_COLUMNS: &str = "id, event_type, payload, target_url, http_status, response_body, \
     attempts, max_attempts, next_retry_at, status, created_at, updated_at";

impl NotificationService {
    pub fn new(pool: PgPool, target_url: String) -> Self {
        Self {
            pool,
            client: Client::new(),
            target_url,
        }
    }

    pub async fn enqueue(&self, event: &ReconciliationEvent) -> Result<OutboxEntry> {
        let payload = serde_json::to_value(event)?;
        let entry = sqlx::query_as::<_, OutboxEntry>(&format!(
            r#"
            INSERT INTO notification_outbox (event_type, payload, target_url, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING {}
            "#,
            OUTBOX_COLUMNS
        ))
        .bind(event.event_type())
        .bind(payload)
        .bind(&self.target_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(entry)
    }

    pub async fn deliver_once(&self, entry_id: Uuid) -> Result<()> {
        let entry = sqlx::query_as::<_, OutboxEntry>(&format!(
            "SELECT {} FROM notification_outbox WHERE id = $1",
            OUTBOX_COLUMNS
        ))
        .bind(entry_id)
        .fetch_one(&self.pool)
        .await?;

        let secret = crate::config::get_config().webhook_secret.clone();
        let res = self
            .client
            .post(&entry.target_url)
            .header("X-Webhook-Secret", secret)
            .header("X-Event-Type", &entry.event_type)
            .json(&entry.payload)
            .send()
            .await;
        match res {
            Ok(resp) => {
                let status = resp.status().as_u16() as i32;
                let body = resp.text().await.unwrap_or_default();
                sqlx::query(
                    r#"UPDATE notification_outbox SET http_status = $1, response_body = $2, status = CASE WHEN $1 BETWEEN 200 AND 299 THEN 'success' ELSE 'failed' END, attempts = COALESCE(attempts,0) + 1, updated_at = NOW() WHERE id = $3"#,
                )
                .bind(status)
                .bind(body)
                .bind(entry.id)
                .execute(&self.pool)
                .await?;
            }
            Err(err) => {
                tracing::warn!(entry_id = %entry.id, error = %err, "notification delivery failed");
                sqlx::query(
                    r#"UPDATE notification_outbox SET response_body = $1, status = 'failed', attempts = COALESCE(attempts,0) + 1, updated_at = NOW() WHERE id = $2"#,
                )
                .bind(err.to_string())
                .bind(entry.id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Delivers the oldest due entry. Returns false when nothing was due.
    pub async fn run_once(&self) -> Result<bool> {
        let row_opt = sqlx::query(
            r#"SELECT id FROM notification_outbox
               WHERE status IN ('pending', 'failed')
                 AND COALESCE(attempts, 0) < COALESCE(max_attempts, 5)
                 AND (next_retry_at IS NULL OR next_retry_at <= NOW())
               ORDER BY created_at ASC
               FOR UPDATE SKIP LOCKED
               LIMIT 1"#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row_opt else { return Ok(false) };
        let id: Uuid = row.try_get("id")?;

        if let Err(e) = self.deliver_once(id).await {
            tracing::warn!(entry_id = %id, error = ?e, "notification delivery errored");
        }

        let row2 = sqlx::query(
            r#"SELECT attempts, max_attempts, status FROM notification_outbox WHERE id = $1"#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        let attempts: i32 = row2.try_get::<Option<i32>, _>("attempts")?.unwrap_or(0);
        let max_attempts: i32 = row2.try_get::<Option<i32>, _>("max_attempts")?.unwrap_or(5);
        let status: Option<String> = row2.try_get("status")?;

        if status.as_deref() == Some("failed") {
            if attempts < max_attempts {
                sqlx::query(
                    r#"UPDATE notification_outbox
                       SET next_retry_at = NOW() + make_interval(secs => LEAST(3600, 30 * power(2::float, GREATEST(0, attempts-1))::int))
                       WHERE id = $1"#,
                )
                .bind(id)
                .execute(&self.pool)
                .await?;
            } else {
                tracing::error!(entry_id = %id, attempts, "notification abandoned after max attempts");
            }
        }

        Ok(true)
    }
}

#[async_trait]
impl Notifier for NotificationService {
    async fn notify(&self, event: &ReconciliationEvent) -> Result<()> {
        let entry = self.enqueue(event).await?;
        tracing::debug!(entry_id = %entry.id, event_type = %entry.event_type, "notification queued");
        Ok(())
    }
}
