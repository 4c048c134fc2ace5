use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::database::store::{PersistedOption, PersistedQuestion};
use crate::models::question::{QuestionConfig, QuestionContent, QuestionType};
use crate::models::template::{TemplateStatus, TestTemplate};

/// Correlation hint linking a desired spec to a persisted row by its stable
/// id. Never a physical row id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecIdentity {
    #[default]
    New,
    Existing(Uuid),
}

impl SpecIdentity {
    pub fn stable_id(&self) -> Option<Uuid> {
        match self {
            SpecIdentity::New => None,
            SpecIdentity::Existing(id) => Some(*id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct OptionSpec {
    #[serde(default)]
    pub identity: SpecIdentity,
    #[validate(length(min = 1, max = 1000, message = "Option text must not be empty"))]
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct QuestionSpec {
    #[serde(default)]
    pub identity: SpecIdentity,
    #[validate(length(min = 1, max = 2000, message = "Label must not be empty"))]
    pub label: String,
    #[serde(default, deserialize_with = "trim_optional_string")]
    pub help_text: Option<String>,
    #[serde(default)]
    pub required: bool,
    pub config: QuestionConfig,
    pub max_points: Decimal,
    #[serde(default)]
    #[validate(nested)]
    pub options: Vec<OptionSpec>,
}

impl QuestionSpec {
    pub fn question_type(&self) -> QuestionType {
        self.config.question_type()
    }

    pub fn content(&self) -> QuestionContent {
        QuestionContent {
            label: self.label.clone(),
            help_text: self.help_text.clone(),
            required: self.required,
            config: self.config.clone(),
            max_points: self.max_points,
        }
    }

    /// Echoes a persisted question back as an `Existing` spec.
    pub fn from_persisted(question: &PersistedQuestion) -> Self {
        let def = &question.definition;
        Self {
            identity: SpecIdentity::Existing(def.stable_id),
            label: def.label.clone(),
            help_text: def.help_text.clone(),
            required: def.required,
            config: def.config.clone(),
            max_points: def.max_points,
            options: question
                .active_options()
                .map(OptionSpec::from_persisted)
                .collect(),
        }
    }
}

impl OptionSpec {
    pub fn from_persisted(option: &PersistedOption) -> Self {
        Self {
            identity: SpecIdentity::Existing(option.definition.stable_id),
            text: option.definition.text.clone(),
            is_correct: option.definition.is_correct,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ReconcileRequest {
    #[validate(nested)]
    pub questions: Vec<QuestionSpec>,
    /// Optimistic check against `TestTemplate.version`.
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub breaking: bool,
    pub submissions_returned: i64,
    pub new_total_points: Decimal,
    pub version: i64,
}

#[derive(Debug, Deserialize)]
pub struct StatusTransitionPayload {
    pub status: TemplateStatus,
}

/// What the editor sees: active questions only, in order.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateView {
    pub template: TestTemplate,
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: Uuid,
    pub stable_id: Uuid,
    pub position: i32,
    pub label: String,
    pub help_text: Option<String>,
    pub required: bool,
    pub config: QuestionConfig,
    pub max_points: Decimal,
    pub options: Vec<OptionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionView {
    pub id: Uuid,
    pub stable_id: Uuid,
    pub position: i32,
    pub text: String,
    pub is_correct: bool,
}

impl From<&PersistedQuestion> for QuestionView {
    fn from(question: &PersistedQuestion) -> Self {
        let def = &question.definition;
        Self {
            id: def.id,
            stable_id: def.stable_id,
            position: def.position,
            label: def.label.clone(),
            help_text: def.help_text.clone(),
            required: def.required,
            config: def.config.clone(),
            max_points: def.max_points,
            options: question
                .active_options()
                .map(|o| OptionView {
                    id: o.definition.id,
                    stable_id: o.definition.stable_id,
                    position: o.definition.position,
                    text: o.definition.text.clone(),
                    is_correct: o.definition.is_correct,
                })
                .collect(),
        }
    }
}

// Trims strings and turns empty ones into None
fn trim_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }))
}
