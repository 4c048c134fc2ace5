use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

/// Side effects of a committed reconciliation, delivered asynchronously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReconciliationEvent {
    TemplateUpdated {
        template_id: Uuid,
        version: i64,
        breaking: bool,
    },
    SubmissionReturned {
        submission_id: Uuid,
        template_id: Uuid,
        owner_id: Uuid,
    },
}

impl ReconciliationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ReconciliationEvent::TemplateUpdated { .. } => "template_updated",
            ReconciliationEvent::SubmissionReturned { .. } => "submission_returned",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub event_type: String,
    pub payload: JsonValue,
    pub target_url: String,
    pub http_status: Option<i32>,
    pub response_body: Option<String>,
    pub attempts: Option<i32>,
    pub max_attempts: Option<i32>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}
