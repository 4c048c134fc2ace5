use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDefinition {
    pub id: Uuid,
    pub question_id: Uuid,
    pub stable_id: Uuid,
    pub text: String,
    pub position: i32,
    pub is_correct: bool,
    pub retired: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewOption {
    pub question_id: Uuid,
    pub stable_id: Uuid,
    pub text: String,
    pub is_correct: bool,
    pub position: i32,
}
