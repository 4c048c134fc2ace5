use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    ShortText,
    Essay,
    YesNo,
    SingleChoice,
    MultipleChoice,
    ScriptureReference,
    DocumentUpload,
    Reflection,
    MinistryPlan,
    TheologicalPosition,
    CaseStudy,
    SermonOutline,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::ShortText => "short_text",
            QuestionType::Essay => "essay",
            QuestionType::YesNo => "yes_no",
            QuestionType::SingleChoice => "single_choice",
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::ScriptureReference => "scripture_reference",
            QuestionType::DocumentUpload => "document_upload",
            QuestionType::Reflection => "reflection",
            QuestionType::MinistryPlan => "ministry_plan",
            QuestionType::TheologicalPosition => "theological_position",
            QuestionType::CaseStudy => "case_study",
            QuestionType::SermonOutline => "sermon_outline",
        }
    }

    /// Only choice questions own option rows.
    pub fn is_choice(&self) -> bool {
        matches!(self, QuestionType::SingleChoice | QuestionType::MultipleChoice)
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let ty = match s {
            "short_text" => QuestionType::ShortText,
            "essay" => QuestionType::Essay,
            "yes_no" => QuestionType::YesNo,
            "single_choice" => QuestionType::SingleChoice,
            "multiple_choice" => QuestionType::MultipleChoice,
            "scripture_reference" => QuestionType::ScriptureReference,
            "document_upload" => QuestionType::DocumentUpload,
            "reflection" => QuestionType::Reflection,
            "ministry_plan" => QuestionType::MinistryPlan,
            "theological_position" => QuestionType::TheologicalPosition,
            "case_study" => QuestionType::CaseStudy,
            "sermon_outline" => QuestionType::SermonOutline,
            other => {
                return Err(Error::Internal(format!("unknown question type '{}'", other)))
            }
        };
        Ok(ty)
    }
}

/// Per-type configuration. The variant *is* the question's type, so a
/// short-text question can never carry essay word bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionConfig {
    ShortText(ShortTextConfig),
    Essay(WordBounds),
    YesNo(YesNoConfig),
    SingleChoice(SingleChoiceConfig),
    MultipleChoice(MultipleChoiceConfig),
    ScriptureReference(ScriptureReferenceConfig),
    DocumentUpload(DocumentUploadConfig),
    Reflection(WordBounds),
    MinistryPlan(MinistryPlanConfig),
    TheologicalPosition(TheologicalPositionConfig),
    CaseStudy(CaseStudyConfig),
    SermonOutline(SermonOutlineConfig),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortTextConfig {
    pub placeholder: Option<String>,
    pub max_length: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordBounds {
    pub min_words: Option<u32>,
    pub max_words: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YesNoConfig {
    #[serde(default)]
    pub require_explanation: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleChoiceConfig {
    #[serde(default)]
    pub shuffle_options: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipleChoiceConfig {
    #[serde(default)]
    pub shuffle_options: bool,
    pub min_selections: Option<u32>,
    pub max_selections: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptureReferenceConfig {
    #[serde(default)]
    pub allow_multiple: bool,
    pub translation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUploadConfig {
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    pub max_file_size_mb: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinistryPlanConfig {
    #[serde(default)]
    pub sections: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TheologicalPositionConfig {
    #[serde(default)]
    pub require_scripture_support: bool,
    pub min_words: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseStudyConfig {
    pub scenario: String,
    #[serde(flatten)]
    pub bounds: WordBounds,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SermonOutlineConfig {
    pub min_points: Option<u32>,
    pub max_points: Option<u32>,
    #[serde(default)]
    pub require_scripture: bool,
}

impl QuestionConfig {
    pub fn question_type(&self) -> QuestionType {
        match self {
            QuestionConfig::ShortText(_) => QuestionType::ShortText,
            QuestionConfig::Essay(_) => QuestionType::Essay,
            QuestionConfig::YesNo(_) => QuestionType::YesNo,
            QuestionConfig::SingleChoice(_) => QuestionType::SingleChoice,
            QuestionConfig::MultipleChoice(_) => QuestionType::MultipleChoice,
            QuestionConfig::ScriptureReference(_) => QuestionType::ScriptureReference,
            QuestionConfig::DocumentUpload(_) => QuestionType::DocumentUpload,
            QuestionConfig::Reflection(_) => QuestionType::Reflection,
            QuestionConfig::MinistryPlan(_) => QuestionType::MinistryPlan,
            QuestionConfig::TheologicalPosition(_) => QuestionType::TheologicalPosition,
            QuestionConfig::CaseStudy(_) => QuestionType::CaseStudy,
            QuestionConfig::SermonOutline(_) => QuestionType::SermonOutline,
        }
    }

    /// Checks numeric thresholds that serde cannot express, returning the
    /// offending config key.
    pub fn check_bounds(&self) -> std::result::Result<(), (&'static str, String)> {
        fn ordered(
            key: &'static str,
            min: Option<u32>,
            max: Option<u32>,
        ) -> std::result::Result<(), (&'static str, String)> {
            match (min, max) {
                (Some(lo), Some(hi)) if lo > hi => {
                    Err((key, format!("minimum {} exceeds maximum {}", lo, hi)))
                }
                _ => Ok(()),
            }
        }

        match self {
            QuestionConfig::Essay(b) | QuestionConfig::Reflection(b) => {
                ordered("min_words", b.min_words, b.max_words)
            }
            QuestionConfig::CaseStudy(c) => {
                if c.scenario.trim().is_empty() {
                    return Err(("scenario", "must not be empty".to_string()));
                }
                ordered("min_words", c.bounds.min_words, c.bounds.max_words)
            }
            QuestionConfig::MultipleChoice(c) => {
                ordered("min_selections", c.min_selections, c.max_selections)
            }
            QuestionConfig::SermonOutline(c) => ordered("min_points", c.min_points, c.max_points),
            QuestionConfig::ShortText(c) if c.max_length == Some(0) => {
                Err(("max_length", "must be greater than zero".to_string()))
            }
            QuestionConfig::DocumentUpload(c) if c.max_file_size_mb == Some(0) => {
                Err(("max_file_size_mb", "must be greater than zero".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// One persisted question row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDefinition {
    pub id: Uuid,
    pub template_id: Uuid,
    /// Logical identity carried across forks; distinct from `id`.
    pub stable_id: Uuid,
    pub label: String,
    pub help_text: Option<String>,
    pub required: bool,
    pub config: QuestionConfig,
    pub max_points: Decimal,
    pub position: i32,
    /// Left the editor's sequence while still answered.
    pub retired: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl QuestionDefinition {
    pub fn question_type(&self) -> QuestionType {
        self.config.question_type()
    }
}

/// Non-referential fields a safe edit may overwrite in place.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionContent {
    pub label: String,
    pub help_text: Option<String>,
    pub required: bool,
    pub config: QuestionConfig,
    pub max_points: Decimal,
}

/// Insert payload for a fresh question row.
#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub template_id: Uuid,
    pub stable_id: Uuid,
    pub content: QuestionContent,
    pub position: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_tag_round_trips_through_type_name() {
        let config: QuestionConfig = serde_json::from_value(json!({
            "type": "essay",
            "min_words": 50,
            "max_words": 400
        }))
        .unwrap();
        assert_eq!(config.question_type(), QuestionType::Essay);
        assert_eq!(
            QuestionType::from_str(config.question_type().as_str()).unwrap(),
            QuestionType::Essay
        );
    }

    #[test]
    fn yes_no_flag_parses_and_unknown_type_names_fail() {
        let parsed = serde_json::from_value::<QuestionConfig>(json!({
            "type": "yes_no",
            "require_explanation": true
        }))
        .unwrap();
        assert_eq!(
            parsed,
            QuestionConfig::YesNo(YesNoConfig {
                require_explanation: true
            })
        );
        assert!(QuestionType::from_str("long_text").is_err());
    }

    #[test]
    fn inverted_bounds_are_reported_by_key() {
        let config = QuestionConfig::Essay(WordBounds {
            min_words: Some(500),
            max_words: Some(100),
        });
        let (key, _) = config.check_bounds().unwrap_err();
        assert_eq!(key, "min_words");

        let ok = QuestionConfig::MultipleChoice(MultipleChoiceConfig {
            shuffle_options: false,
            min_selections: Some(1),
            max_selections: Some(3),
        });
        assert!(ok.check_bounds().is_ok());
    }

    #[test]
    fn only_single_and_multiple_choice_own_options() {
        assert!(QuestionType::SingleChoice.is_choice());
        assert!(QuestionType::MultipleChoice.is_choice());
        assert!(!QuestionType::YesNo.is_choice());
        assert!(!QuestionType::SermonOutline.is_choice());
    }
}
