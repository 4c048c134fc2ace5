use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::Result;
use crate::models::option::{NewOption, OptionDefinition};
use crate::models::question::{NewQuestion, QuestionContent, QuestionDefinition};
use crate::models::submission::{Submission, SubmissionCounts};
use crate::models::template::{TemplateStatus, TestTemplate};

/// Which sibling set a position belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiblingKind {
    Question,
    Option,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedOption {
    pub definition: OptionDefinition,
    /// Answers that selected this option.
    pub answer_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedQuestion {
    pub definition: QuestionDefinition,
    pub answer_count: i64,
    /// Ordered by position.
    pub options: Vec<PersistedOption>,
}

impl PersistedQuestion {
    pub fn active_options(&self) -> impl Iterator<Item = &PersistedOption> {
        self.options.iter().filter(|o| !o.definition.retired)
    }
}

#[async_trait]
pub trait ReconcileStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;
}

/// Writes stay invisible until `commit`. Each write is checked against the
/// schema constraints and fails with `Error::Constraint`.
#[async_trait]
pub trait StoreTx: Send {
    /// Locks the template for the rest of the transaction. Fails fast with
    /// `Conflict` if another transaction holds it.
    async fn lock_template(&mut self, template_id: Uuid) -> Result<TestTemplate>;

    /// Plain read, no lock.
    async fn get_template(&mut self, template_id: Uuid) -> Result<TestTemplate>;

    async fn set_template_status(&mut self, template_id: Uuid, status: TemplateStatus)
        -> Result<()>;

    /// Persists the recomputed total and bumps the version, returning it.
    async fn save_totals(&mut self, template_id: Uuid, total_points: Decimal) -> Result<i64>;

    /// Every question of the template (retired included) ordered by position,
    /// with options and answer counts.
    async fn load_questions(&mut self, template_id: Uuid) -> Result<Vec<PersistedQuestion>>;

    async fn count_submissions(&mut self, template_id: Uuid) -> Result<SubmissionCounts>;

    async fn insert_question(&mut self, question: &NewQuestion) -> Result<Uuid>;

    async fn update_question(&mut self, question_id: Uuid, content: &QuestionContent)
        -> Result<()>;

    async fn retire_question(&mut self, question_id: Uuid) -> Result<()>;

    /// Deletes the question and its options.
    async fn delete_question(&mut self, question_id: Uuid) -> Result<()>;

    async fn delete_template_questions(&mut self, template_id: Uuid) -> Result<u64>;

    async fn insert_option(&mut self, option: &NewOption) -> Result<Uuid>;

    async fn update_option(&mut self, option_id: Uuid, text: &str, is_correct: bool)
        -> Result<()>;

    async fn retire_option(&mut self, option_id: Uuid) -> Result<()>;

    async fn delete_option(&mut self, option_id: Uuid) -> Result<()>;

    async fn set_position(&mut self, kind: SiblingKind, id: Uuid, position: i32) -> Result<()>;

    /// Points every answer on `from` at `to`.
    async fn remap_answers(&mut self, from: Uuid, to: Uuid) -> Result<u64>;

    async fn remap_answer_options(&mut self, from: Uuid, to: Uuid) -> Result<u64>;

    /// Drops answer selections of an option that has no successor.
    async fn detach_answer_options(&mut self, option_id: Uuid) -> Result<u64>;

    /// graded -> returned for every graded submission of the template, with
    /// grader identity cleared and `feedback` set.
    async fn return_graded_submissions(
        &mut self,
        template_id: Uuid,
        feedback: &str,
    ) -> Result<Vec<Submission>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
