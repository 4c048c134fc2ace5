use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use crate::database::store::{
    PersistedOption, PersistedQuestion, ReconcileStore, SiblingKind, StoreTx,
};
use crate::error::{Error, Result};
use crate::models::option::{NewOption, OptionDefinition};
use crate::models::question::{
    NewQuestion, QuestionConfig, QuestionContent, QuestionDefinition, QuestionType,
};
use crate::models::submission::{Submission, SubmissionCounts};
use crate::models::template::{TemplateStatus, TestTemplate};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReconcileStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgStoreTx { tx }))
    }
}

pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

const TEMPLATE_COLUMNS: &str =
    "id, title, status, total_points, version, created_at, updated_at";

const QUESTION_COLUMNS: &str = "q.id, q.template_id, q.stable_id, q.question_type, q.label, \
     q.help_text, q.required, q.config, q.max_points, q.position, q.retired, q.created_at, \
     q.updated_at";

const SUBMISSION_COLUMNS: &str = "id, template_id, owner_id, attempt_number, status, \
     graded_by, graded_at, feedback, created_at, updated_at";

fn template_from_row(row: &PgRow) -> Result<TestTemplate> {
    Ok(TestTemplate {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        total_points: row.try_get("total_points")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn question_from_row(row: &PgRow) -> Result<QuestionDefinition> {
    let declared: QuestionType = row.try_get::<String, _>("question_type")?.parse()?;
    let config: QuestionConfig = row.try_get::<Json<QuestionConfig>, _>("config")?.0;
    let id: Uuid = row.try_get("id")?;
    if config.question_type() != declared {
        return Err(Error::Internal(format!(
            "question {} declares type {} but stores {} config",
            id,
            declared,
            config.question_type()
        )));
    }
    Ok(QuestionDefinition {
        id,
        template_id: row.try_get("template_id")?,
        stable_id: row.try_get("stable_id")?,
        label: row.try_get("label")?,
        help_text: row.try_get("help_text")?,
        required: row.try_get("required")?,
        config,
        max_points: row.try_get("max_points")?,
        position: row.try_get("position")?,
        retired: row.try_get("retired")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn option_from_row(row: &PgRow) -> Result<OptionDefinition> {
    Ok(OptionDefinition {
        id: row.try_get("id")?,
        question_id: row.try_get("question_id")?,
        stable_id: row.try_get("stable_id")?,
        text: row.try_get("text")?,
        position: row.try_get("position")?,
        is_correct: row.try_get("is_correct")?,
        retired: row.try_get("retired")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn submission_from_row(row: &PgRow) -> Result<Submission> {
    Ok(Submission {
        id: row.try_get("id")?,
        template_id: row.try_get("template_id")?,
        owner_id: row.try_get("owner_id")?,
        attempt_number: row.try_get("attempt_number")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        graded_by: row.try_get("graded_by")?,
        graded_at: row.try_get("graded_at")?,
        feedback: row.try_get("feedback")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn expect_one(affected: u64, what: &str, id: Uuid) -> Result<()> {
    if affected == 0 {
        return Err(Error::NotFound(format!("{} {} not found", what, id)));
    }
    Ok(())
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn lock_template(&mut self, template_id: Uuid) -> Result<TestTemplate> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM test_templates WHERE id = $1 FOR UPDATE NOWAIT",
            TEMPLATE_COLUMNS
        ))
        .bind(template_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("template {} not found", template_id)))?;
        template_from_row(&row)
    }

    async fn get_template(&mut self, template_id: Uuid) -> Result<TestTemplate> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM test_templates WHERE id = $1",
            TEMPLATE_COLUMNS
        ))
        .bind(template_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("template {} not found", template_id)))?;
        template_from_row(&row)
    }

    async fn set_template_status(
        &mut self,
        template_id: Uuid,
        status: TemplateStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE test_templates SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(template_id)
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await?;
        expect_one(result.rows_affected(), "template", template_id)
    }

    async fn save_totals(&mut self, template_id: Uuid, total_points: Decimal) -> Result<i64> {
        let row = sqlx::query(
            r#"UPDATE test_templates
               SET total_points = $2, version = version + 1, updated_at = NOW()
               WHERE id = $1
               RETURNING version"#,
        )
        .bind(template_id)
        .bind(total_points)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("version")?)
    }

    async fn load_questions(&mut self, template_id: Uuid) -> Result<Vec<PersistedQuestion>> {
        let question_rows = sqlx::query(&format!(
            r#"SELECT {},
                   (SELECT COUNT(*) FROM answers a WHERE a.question_id = q.id) AS answer_count
               FROM question_definitions q
               WHERE q.template_id = $1
               ORDER BY q.position ASC"#,
            QUESTION_COLUMNS
        ))
        .bind(template_id)
        .fetch_all(&mut *self.tx)
        .await?;

        let option_rows = sqlx::query(
            r#"SELECT o.id, o.question_id, o.stable_id, o.text, o.position, o.is_correct,
                   o.retired, o.created_at, o.updated_at,
                   (SELECT COUNT(*) FROM answer_options ao WHERE ao.option_id = o.id) AS answer_count
               FROM option_definitions o
               JOIN question_definitions q ON q.id = o.question_id
               WHERE q.template_id = $1
               ORDER BY o.question_id, o.position ASC"#,
        )
        .bind(template_id)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut options_by_question: HashMap<Uuid, Vec<PersistedOption>> = HashMap::new();
        for row in &option_rows {
            let definition = option_from_row(row)?;
            let answer_count: i64 = row.try_get("answer_count")?;
            options_by_question
                .entry(definition.question_id)
                .or_default()
                .push(PersistedOption {
                    definition,
                    answer_count,
                });
        }

        question_rows
            .iter()
            .map(|row| {
                let definition = question_from_row(row)?;
                let answer_count: i64 = row.try_get("answer_count")?;
                let options = options_by_question
                    .remove(&definition.id)
                    .unwrap_or_default();
                Ok(PersistedQuestion {
                    definition,
                    answer_count,
                    options,
                })
            })
            .collect()
    }

    async fn count_submissions(&mut self, template_id: Uuid) -> Result<SubmissionCounts> {
        let row = sqlx::query(
            r#"SELECT
                   COUNT(*) FILTER (WHERE s.status = 'graded') AS graded,
                   COUNT(*) FILTER (
                       WHERE EXISTS (SELECT 1 FROM answers a WHERE a.submission_id = s.id)
                   ) AS answered
               FROM submissions s
               WHERE s.template_id = $1"#,
        )
        .bind(template_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(SubmissionCounts {
            graded: row.try_get("graded")?,
            answered: row.try_get("answered")?,
        })
    }

    async fn insert_question(&mut self, question: &NewQuestion) -> Result<Uuid> {
        let content = &question.content;
        let row = sqlx::query(
            r#"INSERT INTO question_definitions (
                   template_id, stable_id, question_type, label, help_text, required,
                   config, max_points, position
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING id"#,
        )
        .bind(question.template_id)
        .bind(question.stable_id)
        .bind(content.config.question_type().as_str())
        .bind(&content.label)
        .bind(&content.help_text)
        .bind(content.required)
        .bind(Json(&content.config))
        .bind(content.max_points)
        .bind(question.position)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn update_question(
        &mut self,
        question_id: Uuid,
        content: &QuestionContent,
    ) -> Result<()> {
        // question_type is part of the predicate: an in-place edit never
        // changes a row's type.
        let result = sqlx::query(
            r#"UPDATE question_definitions
               SET label = $2, help_text = $3, required = $4, config = $5,
                   max_points = $6, updated_at = NOW()
               WHERE id = $1 AND question_type = $7"#,
        )
        .bind(question_id)
        .bind(&content.label)
        .bind(&content.help_text)
        .bind(content.required)
        .bind(Json(&content.config))
        .bind(content.max_points)
        .bind(content.config.question_type().as_str())
        .execute(&mut *self.tx)
        .await?;
        expect_one(result.rows_affected(), "question", question_id)
    }

    async fn retire_question(&mut self, question_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE question_definitions SET retired = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(question_id)
        .execute(&mut *self.tx)
        .await?;
        expect_one(result.rows_affected(), "question", question_id)
    }

    async fn delete_question(&mut self, question_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM question_definitions WHERE id = $1")
            .bind(question_id)
            .execute(&mut *self.tx)
            .await?;
        expect_one(result.rows_affected(), "question", question_id)
    }

    async fn delete_template_questions(&mut self, template_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM question_definitions WHERE template_id = $1")
            .bind(template_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_option(&mut self, option: &NewOption) -> Result<Uuid> {
        let row = sqlx::query(
            r#"INSERT INTO option_definitions (question_id, stable_id, text, is_correct, position)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id"#,
        )
        .bind(option.question_id)
        .bind(option.stable_id)
        .bind(&option.text)
        .bind(option.is_correct)
        .bind(option.position)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn update_option(&mut self, option_id: Uuid, text: &str, is_correct: bool) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE option_definitions
               SET text = $2, is_correct = $3, updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(option_id)
        .bind(text)
        .bind(is_correct)
        .execute(&mut *self.tx)
        .await?;
        expect_one(result.rows_affected(), "option", option_id)
    }

    async fn retire_option(&mut self, option_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE option_definitions SET retired = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(option_id)
        .execute(&mut *self.tx)
        .await?;
        expect_one(result.rows_affected(), "option", option_id)
    }

    async fn delete_option(&mut self, option_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM option_definitions WHERE id = $1")
            .bind(option_id)
            .execute(&mut *self.tx)
            .await?;
        expect_one(result.rows_affected(), "option", option_id)
    }

    async fn set_position(&mut self, kind: SiblingKind, id: Uuid, position: i32) -> Result<()> {
        let sql = match kind {
            SiblingKind::Question => {
                "UPDATE question_definitions SET position = $2, updated_at = NOW() WHERE id = $1"
            }
            SiblingKind::Option => {
                "UPDATE option_definitions SET position = $2, updated_at = NOW() WHERE id = $1"
            }
        };
        let result = sqlx::query(sql)
            .bind(id)
            .bind(position)
            .execute(&mut *self.tx)
            .await?;
        expect_one(result.rows_affected(), "sibling", id)
    }

    async fn remap_answers(&mut self, from: Uuid, to: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE answers SET question_id = $2, updated_at = NOW() WHERE question_id = $1",
        )
        .bind(from)
        .bind(to)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn remap_answer_options(&mut self, from: Uuid, to: Uuid) -> Result<u64> {
        let result = sqlx::query("UPDATE answer_options SET option_id = $2 WHERE option_id = $1")
            .bind(from)
            .bind(to)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn detach_answer_options(&mut self, option_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM answer_options WHERE option_id = $1")
            .bind(option_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn return_graded_submissions(
        &mut self,
        template_id: Uuid,
        feedback: &str,
    ) -> Result<Vec<Submission>> {
        let rows = sqlx::query(&format!(
            r#"UPDATE submissions
               SET status = 'returned', graded_by = NULL, graded_at = NULL,
                   feedback = $2, updated_at = NOW()
               WHERE template_id = $1 AND status = 'graded'
               RETURNING {}"#,
            SUBMISSION_COLUMNS
        ))
        .bind(template_id)
        .bind(feedback)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(submission_from_row).collect()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
