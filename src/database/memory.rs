use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::database::store::{
    PersistedOption, PersistedQuestion, ReconcileStore, SiblingKind, StoreTx,
};
use crate::error::{Error, Result};
use crate::models::answer::Answer;
use crate::models::option::{NewOption, OptionDefinition};
use crate::models::question::{NewQuestion, QuestionContent, QuestionDefinition};
use crate::models::submission::{Submission, SubmissionCounts, SubmissionStatus};
use crate::models::template::{TemplateStatus, TestTemplate};

#[derive(Debug, Clone, Default)]
struct Tables {
    generations: HashMap<Uuid, u64>,
    templates: HashMap<Uuid, TestTemplate>,
    questions: HashMap<Uuid, QuestionDefinition>,
    options: HashMap<Uuid, OptionDefinition>,
    submissions: HashMap<Uuid, Submission>,
    answers: HashMap<Uuid, Answer>,
}

/// Rows owned by one template.
#[derive(Debug, Default)]
struct Partition {
    questions: Vec<QuestionDefinition>,
    options: Vec<OptionDefinition>,
    submissions: Vec<Submission>,
    answers: Vec<Answer>,
}

impl Tables {
    fn generation(&self, template_id: Uuid) -> u64 {
        self.generations.get(&template_id).copied().unwrap_or(0)
    }

    fn question_template(&self, question_id: Uuid) -> Result<Uuid> {
        self.questions
            .get(&question_id)
            .map(|q| q.template_id)
            .ok_or_else(|| Error::NotFound(format!("question {} not found", question_id)))
    }

    fn option_template(&self, option_id: Uuid) -> Result<Uuid> {
        let question_id = self
            .options
            .get(&option_id)
            .map(|o| o.question_id)
            .ok_or_else(|| Error::NotFound(format!("option {} not found", option_id)))?;
        self.question_template(question_id)
    }

    fn partition(&self, template_id: Uuid) -> Partition {
        let questions: Vec<QuestionDefinition> = self
            .questions
            .values()
            .filter(|q| q.template_id == template_id)
            .cloned()
            .collect();
        let submissions: Vec<Submission> = self
            .submissions
            .values()
            .filter(|s| s.template_id == template_id)
            .cloned()
            .collect();
        let question_ids: HashSet<Uuid> = questions.iter().map(|q| q.id).collect();
        let submission_ids: HashSet<Uuid> = submissions.iter().map(|s| s.id).collect();
        Partition {
            options: self
                .options
                .values()
                .filter(|o| question_ids.contains(&o.question_id))
                .cloned()
                .collect(),
            answers: self
                .answers
                .values()
                .filter(|a| submission_ids.contains(&a.submission_id))
                .cloned()
                .collect(),
            questions,
            submissions,
        }
    }

    /// Swaps this table's rows for `template_id` with the rows in `source`.
    fn replace_partition(&mut self, source: &Tables, template_id: Uuid) {
        let stale = self.partition(template_id);
        for q in &stale.questions {
            self.questions.remove(&q.id);
        }
        for o in &stale.options {
            self.options.remove(&o.id);
        }
        for s in &stale.submissions {
            self.submissions.remove(&s.id);
        }
        for a in &stale.answers {
            self.answers.remove(&a.id);
        }

        match source.templates.get(&template_id) {
            Some(template) => {
                self.templates.insert(template_id, template.clone());
            }
            None => {
                self.templates.remove(&template_id);
            }
        }
        let fresh = source.partition(template_id);
        self.questions.extend(fresh.questions.into_iter().map(|q| (q.id, q)));
        self.options.extend(fresh.options.into_iter().map(|o| (o.id, o)));
        self.submissions.extend(fresh.submissions.into_iter().map(|s| (s.id, s)));
        self.answers.extend(fresh.answers.into_iter().map(|a| (a.id, a)));
    }

    fn template(&self, template_id: Uuid) -> Result<&TestTemplate> {
        self.templates
            .get(&template_id)
            .ok_or_else(|| Error::NotFound(format!("template {} not found", template_id)))
    }

    fn template_mut(&mut self, template_id: Uuid) -> Result<&mut TestTemplate> {
        self.templates
            .get_mut(&template_id)
            .ok_or_else(|| Error::NotFound(format!("template {} not found", template_id)))
    }

    fn check_question_position(&self, template_id: Uuid, position: i32, except: Uuid) -> Result<()> {
        let taken = self
            .questions
            .values()
            .any(|q| q.template_id == template_id && q.position == position && q.id != except);
        if taken {
            return Err(Error::Constraint(format!(
                "duplicate question position {} in template {}",
                position, template_id
            )));
        }
        Ok(())
    }

    fn check_option_position(&self, question_id: Uuid, position: i32, except: Uuid) -> Result<()> {
        let taken = self
            .options
            .values()
            .any(|o| o.question_id == question_id && o.position == position && o.id != except);
        if taken {
            return Err(Error::Constraint(format!(
                "duplicate option position {} in question {}",
                position, question_id
            )));
        }
        Ok(())
    }

    fn question_answer_count(&self, question_id: Uuid) -> i64 {
        self.answers
            .values()
            .filter(|a| a.question_id == question_id)
            .count() as i64
    }

    fn option_answer_count(&self, option_id: Uuid) -> i64 {
        self.answers
            .values()
            .filter(|a| a.option_ids.contains(&option_id))
            .count() as i64
    }

    fn insert_question(&mut self, question: &NewQuestion) -> Result<Uuid> {
        self.template(question.template_id)?;
        let id = Uuid::new_v4();
        self.check_question_position(question.template_id, question.position, id)?;
        let now = Utc::now();
        let content = question.content.clone();
        self.questions.insert(
            id,
            QuestionDefinition {
                id,
                template_id: question.template_id,
                stable_id: question.stable_id,
                label: content.label,
                help_text: content.help_text,
                required: content.required,
                config: content.config,
                max_points: content.max_points,
                position: question.position,
                retired: false,
                created_at: Some(now),
                updated_at: Some(now),
            },
        );
        Ok(id)
    }

    fn insert_option(&mut self, option: &NewOption) -> Result<Uuid> {
        if !self.questions.contains_key(&option.question_id) {
            return Err(Error::Constraint(format!(
                "option references missing question {}",
                option.question_id
            )));
        }
        let id = Uuid::new_v4();
        self.check_option_position(option.question_id, option.position, id)?;
        let now = Utc::now();
        self.options.insert(
            id,
            OptionDefinition {
                id,
                question_id: option.question_id,
                stable_id: option.stable_id,
                text: option.text.clone(),
                position: option.position,
                is_correct: option.is_correct,
                retired: false,
                created_at: Some(now),
                updated_at: Some(now),
            },
        );
        Ok(id)
    }

    fn delete_option(&mut self, option_id: Uuid) -> Result<()> {
        if self.option_answer_count(option_id) > 0 {
            return Err(Error::Constraint(format!(
                "option {} is still referenced by answers",
                option_id
            )));
        }
        self.options
            .remove(&option_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("option {} not found", option_id)))
    }

    fn delete_question(&mut self, question_id: Uuid) -> Result<()> {
        if !self.questions.contains_key(&question_id) {
            return Err(Error::NotFound(format!("question {} not found", question_id)));
        }
        if self.question_answer_count(question_id) > 0 {
            return Err(Error::Constraint(format!(
                "question {} is still referenced by answers",
                question_id
            )));
        }
        let option_ids: Vec<Uuid> = self
            .options
            .values()
            .filter(|o| o.question_id == question_id)
            .map(|o| o.id)
            .collect();
        for option_id in option_ids {
            self.delete_option(option_id)?;
        }
        self.questions.remove(&question_id);
        Ok(())
    }

    fn insert_answer(&mut self, answer: Answer) -> Result<Uuid> {
        if !self.submissions.contains_key(&answer.submission_id) {
            return Err(Error::Constraint(format!(
                "answer references missing submission {}",
                answer.submission_id
            )));
        }
        if !self.questions.contains_key(&answer.question_id) {
            return Err(Error::Constraint(format!(
                "answer references missing question {}",
                answer.question_id
            )));
        }
        if let Some(missing) = answer
            .option_ids
            .iter()
            .find(|id| !self.options.contains_key(id))
        {
            return Err(Error::Constraint(format!(
                "answer references missing option {}",
                missing
            )));
        }
        let duplicate = self.answers.values().any(|a| {
            a.submission_id == answer.submission_id && a.question_id == answer.question_id
        });
        if duplicate {
            return Err(Error::Constraint(format!(
                "submission {} already answers question {}",
                answer.submission_id, answer.question_id
            )));
        }
        let id = answer.id;
        self.answers.insert(id, answer);
        Ok(id)
    }

    fn sorted_questions(&self, template_id: Uuid) -> Vec<QuestionDefinition> {
        let mut questions: Vec<QuestionDefinition> = self
            .questions
            .values()
            .filter(|q| q.template_id == template_id)
            .cloned()
            .collect();
        questions.sort_by_key(|q| q.position);
        questions
    }

    fn sorted_options(&self, question_id: Uuid) -> Vec<OptionDefinition> {
        let mut options: Vec<OptionDefinition> = self
            .options
            .values()
            .filter(|o| o.question_id == question_id)
            .cloned()
            .collect();
        options.sort_by_key(|o| o.position);
        options
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    locks: Mutex<HashSet<Uuid>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_template(&self, title: &str, status: TemplateStatus) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        guard(&self.shared.tables).templates.insert(
            id,
            TestTemplate {
                id,
                title: title.to_string(),
                status,
                total_points: Decimal::ZERO,
                version: 0,
                created_at: Some(now),
                updated_at: Some(now),
            },
        );
        id
    }

    /// Appends a question after the template's current last position and
    /// refreshes the template total.
    pub fn seed_question(
        &self,
        template_id: Uuid,
        content: QuestionContent,
    ) -> Result<QuestionDefinition> {
        let mut tables = guard(&self.shared.tables);
        let position = tables
            .sorted_questions(template_id)
            .last()
            .map(|q| q.position + 1)
            .unwrap_or(0);
        let id = tables.insert_question(&NewQuestion {
            template_id,
            stable_id: Uuid::new_v4(),
            content,
            position,
        })?;
        let total = tables
            .sorted_questions(template_id)
            .iter()
            .filter(|q| !q.retired)
            .try_fold(Decimal::ZERO, |total, q| total.checked_add(q.max_points))
            .ok_or_else(|| Error::Internal("seeded point total overflowed".to_string()))?;
        tables.template_mut(template_id)?.total_points = total;
        Ok(tables.questions[&id].clone())
    }

    pub fn seed_option(
        &self,
        question_id: Uuid,
        text: &str,
        is_correct: bool,
    ) -> Result<OptionDefinition> {
        let mut tables = guard(&self.shared.tables);
        let position = tables
            .sorted_options(question_id)
            .last()
            .map(|o| o.position + 1)
            .unwrap_or(0);
        let id = tables.insert_option(&NewOption {
            question_id,
            stable_id: Uuid::new_v4(),
            text: text.to_string(),
            is_correct,
            position,
        })?;
        Ok(tables.options[&id].clone())
    }

    pub fn seed_submission(
        &self,
        template_id: Uuid,
        owner_id: Uuid,
        status: SubmissionStatus,
    ) -> Result<Uuid> {
        let mut tables = guard(&self.shared.tables);
        tables.template(template_id)?;
        let attempt_number = tables
            .submissions
            .values()
            .filter(|s| s.template_id == template_id && s.owner_id == owner_id)
            .count() as i32
            + 1;
        let graded = status == SubmissionStatus::Graded;
        let now = Utc::now();
        let id = Uuid::new_v4();
        tables.submissions.insert(
            id,
            Submission {
                id,
                template_id,
                owner_id,
                attempt_number,
                status,
                graded_by: graded.then(Uuid::new_v4),
                graded_at: graded.then_some(now),
                feedback: None,
                created_at: Some(now),
                updated_at: Some(now),
            },
        );
        Ok(id)
    }

    pub fn seed_answer(
        &self,
        submission_id: Uuid,
        question_id: Uuid,
        option_ids: &[Uuid],
        content: JsonValue,
    ) -> Result<Uuid> {
        guard(&self.shared.tables).insert_answer(Answer {
            id: Uuid::new_v4(),
            submission_id,
            question_id,
            option_ids: option_ids.to_vec(),
            content,
            points_earned: None,
            feedback: None,
        })
    }

    pub fn template(&self, template_id: Uuid) -> Option<TestTemplate> {
        guard(&self.shared.tables).templates.get(&template_id).cloned()
    }

    /// All question rows of a template, retired included, by position.
    pub fn questions(&self, template_id: Uuid) -> Vec<QuestionDefinition> {
        guard(&self.shared.tables).sorted_questions(template_id)
    }

    pub fn options(&self, question_id: Uuid) -> Vec<OptionDefinition> {
        guard(&self.shared.tables).sorted_options(question_id)
    }

    pub fn submissions(&self, template_id: Uuid) -> Vec<Submission> {
        let tables = guard(&self.shared.tables);
        let mut submissions: Vec<Submission> = tables
            .submissions
            .values()
            .filter(|s| s.template_id == template_id)
            .cloned()
            .collect();
        submissions.sort_by_key(|s| s.created_at);
        submissions
    }

    pub fn answer(&self, answer_id: Uuid) -> Option<Answer> {
        guard(&self.shared.tables).answers.get(&answer_id).cloned()
    }

    pub fn answers(&self) -> Vec<Answer> {
        guard(&self.shared.tables).answers.values().cloned().collect()
    }

    /// Answers whose question or option references no longer resolve.
    pub fn dangling_answers(&self) -> Vec<Uuid> {
        let tables = guard(&self.shared.tables);
        tables
            .answers
            .values()
            .filter(|a| {
                !tables.questions.contains_key(&a.question_id)
                    || a.option_ids.iter().any(|o| !tables.options.contains_key(o))
            })
            .map(|a| a.id)
            .collect()
    }
}

#[async_trait]
impl ReconcileStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let working = guard(&self.shared.tables).clone();
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.shared),
            working,
            touched: HashSet::new(),
            locked: Vec::new(),
        }))
    }
}

/// Works on a private snapshot. Commit is first-committer-wins per template:
/// a template written here and committed by someone else since `begin` fails
/// with `Conflict`, like a serialization failure.
pub struct MemoryTx {
    shared: Arc<Shared>,
    working: Tables,
    touched: HashSet<Uuid>,
    locked: Vec<Uuid>,
}

impl MemoryTx {
    fn write(&mut self, template_id: Uuid) -> &mut Tables {
        self.touched.insert(template_id);
        &mut self.working
    }

    fn release_locks(&mut self) {
        if self.locked.is_empty() {
            return;
        }
        let mut locks = guard(&self.shared.locks);
        for id in self.locked.drain(..) {
            locks.remove(&id);
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        self.release_locks();
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_template(&mut self, template_id: Uuid) -> Result<TestTemplate> {
        let template = self.working.template(template_id)?.clone();
        if !self.locked.contains(&template_id) {
            let mut locks = guard(&self.shared.locks);
            if !locks.insert(template_id) {
                return Err(Error::Conflict(format!(
                    "template {} is locked by another reconciliation",
                    template_id
                )));
            }
            self.locked.push(template_id);
        }
        Ok(template)
    }

    async fn get_template(&mut self, template_id: Uuid) -> Result<TestTemplate> {
        self.working.template(template_id).cloned()
    }

    async fn set_template_status(
        &mut self,
        template_id: Uuid,
        status: TemplateStatus,
    ) -> Result<()> {
        let template = self.write(template_id).template_mut(template_id)?;
        template.status = status;
        template.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn save_totals(&mut self, template_id: Uuid, total_points: Decimal) -> Result<i64> {
        let template = self.write(template_id).template_mut(template_id)?;
        template.total_points = total_points;
        template.version += 1;
        template.updated_at = Some(Utc::now());
        Ok(template.version)
    }

    async fn load_questions(&mut self, template_id: Uuid) -> Result<Vec<PersistedQuestion>> {
        let tables = &self.working;
        tables.template(template_id)?;
        Ok(tables
            .sorted_questions(template_id)
            .into_iter()
            .map(|definition| PersistedQuestion {
                answer_count: tables.question_answer_count(definition.id),
                options: tables
                    .sorted_options(definition.id)
                    .into_iter()
                    .map(|o| PersistedOption {
                        answer_count: tables.option_answer_count(o.id),
                        definition: o,
                    })
                    .collect(),
                definition,
            })
            .collect())
    }

    async fn count_submissions(&mut self, template_id: Uuid) -> Result<SubmissionCounts> {
        let tables = &self.working;
        let mut counts = SubmissionCounts::default();
        for submission in tables.submissions.values() {
            if submission.template_id != template_id {
                continue;
            }
            if submission.status == SubmissionStatus::Graded {
                counts.graded += 1;
            }
            if tables
                .answers
                .values()
                .any(|a| a.submission_id == submission.id)
            {
                counts.answered += 1;
            }
        }
        Ok(counts)
    }

    async fn insert_question(&mut self, question: &NewQuestion) -> Result<Uuid> {
        self.write(question.template_id).insert_question(question)
    }

    async fn update_question(
        &mut self,
        question_id: Uuid,
        content: &QuestionContent,
    ) -> Result<()> {
        let template_id = self.working.question_template(question_id)?;
        let question = self
            .write(template_id)
            .questions
            .get_mut(&question_id)
            .ok_or_else(|| Error::NotFound(format!("question {} not found", question_id)))?;
        if question.question_type() != content.config.question_type() {
            return Err(Error::Constraint(format!(
                "question {} cannot change type in place",
                question_id
            )));
        }
        question.label = content.label.clone();
        question.help_text = content.help_text.clone();
        question.required = content.required;
        question.config = content.config.clone();
        question.max_points = content.max_points;
        question.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn retire_question(&mut self, question_id: Uuid) -> Result<()> {
        let template_id = self.working.question_template(question_id)?;
        let question = self
            .write(template_id)
            .questions
            .get_mut(&question_id)
            .ok_or_else(|| Error::NotFound(format!("question {} not found", question_id)))?;
        question.retired = true;
        Ok(())
    }

    async fn delete_question(&mut self, question_id: Uuid) -> Result<()> {
        let template_id = self.working.question_template(question_id)?;
        self.write(template_id).delete_question(question_id)
    }

    async fn delete_template_questions(&mut self, template_id: Uuid) -> Result<u64> {
        let ids: Vec<Uuid> = self
            .working
            .sorted_questions(template_id)
            .iter()
            .map(|q| q.id)
            .collect();
        let tables = self.write(template_id);
        for id in &ids {
            tables.delete_question(*id)?;
        }
        Ok(ids.len() as u64)
    }

    async fn insert_option(&mut self, option: &NewOption) -> Result<Uuid> {
        let template_id = self.working.question_template(option.question_id)?;
        self.write(template_id).insert_option(option)
    }

    async fn update_option(&mut self, option_id: Uuid, text: &str, is_correct: bool) -> Result<()> {
        let template_id = self.working.option_template(option_id)?;
        let option = self
            .write(template_id)
            .options
            .get_mut(&option_id)
            .ok_or_else(|| Error::NotFound(format!("option {} not found", option_id)))?;
        option.text = text.to_string();
        option.is_correct = is_correct;
        option.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn retire_option(&mut self, option_id: Uuid) -> Result<()> {
        let template_id = self.working.option_template(option_id)?;
        let option = self
            .write(template_id)
            .options
            .get_mut(&option_id)
            .ok_or_else(|| Error::NotFound(format!("option {} not found", option_id)))?;
        option.retired = true;
        Ok(())
    }

    async fn delete_option(&mut self, option_id: Uuid) -> Result<()> {
        let template_id = self.working.option_template(option_id)?;
        self.write(template_id).delete_option(option_id)
    }

    async fn set_position(&mut self, kind: SiblingKind, id: Uuid, position: i32) -> Result<()> {
        let template_id = match kind {
            SiblingKind::Question => self.working.question_template(id)?,
            SiblingKind::Option => self.working.option_template(id)?,
        };
        let tables = self.write(template_id);
        match kind {
            SiblingKind::Question => {
                tables.check_question_position(template_id, position, id)?;
                if let Some(question) = tables.questions.get_mut(&id) {
                    question.position = position;
                }
            }
            SiblingKind::Option => {
                let question_id = tables
                    .options
                    .get(&id)
                    .map(|o| o.question_id)
                    .ok_or_else(|| Error::NotFound(format!("option {} not found", id)))?;
                tables.check_option_position(question_id, position, id)?;
                if let Some(option) = tables.options.get_mut(&id) {
                    option.position = position;
                }
            }
        }
        Ok(())
    }

    async fn remap_answers(&mut self, from: Uuid, to: Uuid) -> Result<u64> {
        let template_id = self.working.question_template(to).map_err(|_| {
            Error::Constraint(format!("remap target question {} does not exist", to))
        })?;
        let tables = self.write(template_id);
        let moving: Vec<Uuid> = tables
            .answers
            .values()
            .filter(|a| a.question_id == from)
            .map(|a| a.id)
            .collect();
        for answer_id in &moving {
            let submission_id = tables.answers[answer_id].submission_id;
            let clash = tables
                .answers
                .values()
                .any(|a| a.submission_id == submission_id && a.question_id == to);
            if clash {
                return Err(Error::Constraint(format!(
                    "submission {} already answers question {}",
                    submission_id, to
                )));
            }
            if let Some(answer) = tables.answers.get_mut(answer_id) {
                answer.question_id = to;
            }
        }
        Ok(moving.len() as u64)
    }

    async fn remap_answer_options(&mut self, from: Uuid, to: Uuid) -> Result<u64> {
        let template_id = self.working.option_template(to).map_err(|_| {
            Error::Constraint(format!("remap target option {} does not exist", to))
        })?;
        let tables = self.write(template_id);
        let mut remapped = 0;
        for answer in tables.answers.values_mut() {
            for option_id in answer.option_ids.iter_mut().filter(|id| **id == from) {
                *option_id = to;
                remapped += 1;
            }
        }
        Ok(remapped)
    }

    async fn detach_answer_options(&mut self, option_id: Uuid) -> Result<u64> {
        let template_id = self.working.option_template(option_id)?;
        let mut detached = 0;
        for answer in self.write(template_id).answers.values_mut() {
            let before = answer.option_ids.len();
            answer.option_ids.retain(|id| *id != option_id);
            detached += (before - answer.option_ids.len()) as u64;
        }
        Ok(detached)
    }

    async fn return_graded_submissions(
        &mut self,
        template_id: Uuid,
        feedback: &str,
    ) -> Result<Vec<Submission>> {
        let now = Utc::now();
        let mut returned = Vec::new();
        for submission in self.write(template_id).submissions.values_mut() {
            if submission.template_id != template_id
                || submission.status != SubmissionStatus::Graded
            {
                continue;
            }
            if !submission.status.can_transition_to(SubmissionStatus::Returned) {
                return Err(Error::Constraint(format!(
                    "submission {} cannot move from {} to returned",
                    submission.id, submission.status
                )));
            }
            submission.status = SubmissionStatus::Returned;
            submission.graded_by = None;
            submission.graded_at = None;
            submission.feedback = Some(feedback.to_string());
            submission.updated_at = Some(now);
            returned.push(submission.clone());
        }
        Ok(returned)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        if !this.touched.is_empty() {
            let mut tables = guard(&this.shared.tables);
            if let Some(stale) = this
                .touched
                .iter()
                .find(|id| tables.generation(**id) != this.working.generation(**id))
            {
                return Err(Error::Conflict(format!(
                    "snapshot of template {} is stale: another transaction committed first",
                    stale
                )));
            }
            for template_id in &this.touched {
                tables.replace_partition(&this.working, *template_id);
                let next = this.working.generation(*template_id) + 1;
                tables.generations.insert(*template_id, next);
            }
        }
        this.release_locks();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.release_locks();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{QuestionConfig, ShortTextConfig};

    fn content(label: &str) -> QuestionContent {
        QuestionContent {
            label: label.to_string(),
            help_text: None,
            required: false,
            config: QuestionConfig::ShortText(ShortTextConfig::default()),
            max_points: Decimal::ONE,
        }
    }

    #[tokio::test]
    async fn second_lock_on_same_template_fails_fast() {
        let store = MemoryStore::new();
        let template_id = store.create_template("Doctrine", TemplateStatus::Published);

        let mut first = store.begin().await.unwrap();
        first.lock_template(template_id).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second.lock_template(template_id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        first.rollback().await.unwrap();
        second.lock_template(template_id).await.unwrap();
    }

    #[tokio::test]
    async fn sibling_positions_are_unique_on_every_write() {
        let store = MemoryStore::new();
        let template_id = store.create_template("Doctrine", TemplateStatus::Draft);
        let a = store.seed_question(template_id, content("A")).unwrap();
        let b = store.seed_question(template_id, content("B")).unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .set_position(SiblingKind::Question, b.id, a.position)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
        tx.set_position(SiblingKind::Question, a.id, -1).await.unwrap();
        tx.set_position(SiblingKind::Question, b.id, 0).await.unwrap();
    }

    #[tokio::test]
    async fn answered_question_cannot_be_deleted() {
        let store = MemoryStore::new();
        let template_id = store.create_template("Doctrine", TemplateStatus::Published);
        let q = store.seed_question(template_id, content("A")).unwrap();
        let submission = store
            .seed_submission(template_id, Uuid::new_v4(), SubmissionStatus::Submitted)
            .unwrap();
        store
            .seed_answer(submission, q.id, &[], serde_json::json!("grace"))
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.delete_question(q.id).await,
            Err(Error::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn rolled_back_writes_are_invisible() {
        let store = MemoryStore::new();
        let template_id = store.create_template("Doctrine", TemplateStatus::Draft);
        store.seed_question(template_id, content("A")).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.delete_template_questions(template_id).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.questions(template_id).len(), 1);
    }

    #[tokio::test]
    async fn stale_snapshot_loses_on_commit() {
        let store = MemoryStore::new();
        let template_id = store.create_template("Doctrine", TemplateStatus::Draft);

        let mut early = store.begin().await.unwrap();
        let mut late = store.begin().await.unwrap();
        late.save_totals(template_id, Decimal::TEN).await.unwrap();
        late.commit().await.unwrap();

        early.save_totals(template_id, Decimal::ONE).await.unwrap();
        assert!(matches!(early.commit().await, Err(Error::Conflict(_))));
        assert_eq!(store.template(template_id).unwrap().total_points, Decimal::TEN);
    }

    #[tokio::test]
    async fn commits_on_different_templates_do_not_conflict() {
        let store = MemoryStore::new();
        let doctrine = store.create_template("Doctrine", TemplateStatus::Draft);
        let ethics = store.create_template("Ethics", TemplateStatus::Draft);
        let kept = store.seed_question(ethics, content("Virtue")).unwrap();

        let mut early = store.begin().await.unwrap();
        early.lock_template(doctrine).await.unwrap();
        let mut late = store.begin().await.unwrap();
        late.lock_template(ethics).await.unwrap();

        late.insert_question(&NewQuestion {
            template_id: ethics,
            stable_id: Uuid::new_v4(),
            content: content("Justice"),
            position: 1,
        })
        .await
        .unwrap();
        late.save_totals(ethics, Decimal::TWO).await.unwrap();
        late.commit().await.unwrap();

        early.save_totals(doctrine, Decimal::ONE).await.unwrap();
        early.commit().await.unwrap();

        assert_eq!(store.template(doctrine).unwrap().total_points, Decimal::ONE);
        assert_eq!(store.template(ethics).unwrap().total_points, Decimal::TWO);
        let ethics_questions = store.questions(ethics);
        assert_eq!(ethics_questions.len(), 2);
        assert_eq!(ethics_questions[0].id, kept.id);
    }
}
