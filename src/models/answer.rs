use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A student's response to one question. `option_ids` is only populated for
/// choice questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub question_id: Uuid,
    pub option_ids: Vec<Uuid>,
    pub content: JsonValue,
    pub points_earned: Option<Decimal>,
    pub feedback: Option<String>,
}
