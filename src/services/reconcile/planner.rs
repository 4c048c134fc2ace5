use std::collections::HashMap;
use uuid::Uuid;

use crate::database::store::{PersistedOption, PersistedQuestion};
use crate::dto::reconcile_dto::{OptionSpec, QuestionSpec, SpecIdentity};
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct ReconciliationPlan<'a> {
    /// In desired order.
    pub questions: Vec<PlannedQuestion<'a>>,
    /// Persisted rows absent from the desired set, in persisted order.
    pub unmatched: Vec<UnmatchedRow>,
}

#[derive(Debug)]
pub struct PlannedQuestion<'a> {
    pub spec: &'a QuestionSpec,
    pub disposition: QuestionDisposition<'a>,
}

#[derive(Debug)]
pub enum QuestionDisposition<'a> {
    New,
    Matched(MatchedQuestion<'a>),
}

#[derive(Debug)]
pub struct MatchedQuestion<'a> {
    pub persisted: &'a PersistedQuestion,
    pub type_changed: bool,
    /// Any non-referential field differs (label, help text, required,
    /// config, max points).
    pub content_changed: bool,
    pub options: OptionPlan<'a>,
}

#[derive(Debug, Default)]
pub struct OptionPlan<'a> {
    /// In desired order.
    pub desired: Vec<PlannedOption<'a>>,
    pub unmatched: Vec<UnmatchedRow>,
}

#[derive(Debug)]
pub struct PlannedOption<'a> {
    pub spec: &'a OptionSpec,
    pub matched: Option<&'a PersistedOption>,
}

impl PlannedOption<'_> {
    pub fn text_changed(&self) -> bool {
        self.matched
            .is_some_and(|o| o.definition.text != self.spec.text)
    }

    pub fn correctness_changed(&self) -> bool {
        self.matched
            .is_some_and(|o| o.definition.is_correct != self.spec.is_correct)
    }
}

/// A persisted row the editor no longer lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmatchedRow {
    pub id: Uuid,
    pub position: i32,
    pub answer_count: i64,
    pub retired: bool,
}

impl UnmatchedRow {
    /// Has answers, so it must survive.
    pub fn is_protected(&self) -> bool {
        self.answer_count > 0
    }

    pub fn is_removable(&self) -> bool {
        !self.is_protected()
    }

    /// Protected and leaving the editor's sequence in this reconciliation.
    pub fn is_newly_orphaned(&self) -> bool {
        self.is_protected() && !self.retired
    }
}

impl<'a> ReconciliationPlan<'a> {
    pub fn matched(&self) -> impl Iterator<Item = &MatchedQuestion<'a>> {
        self.questions.iter().filter_map(|q| match &q.disposition {
            QuestionDisposition::Matched(m) => Some(m),
            QuestionDisposition::New => None,
        })
    }

    pub fn new_count(&self) -> usize {
        self.questions
            .iter()
            .filter(|q| matches!(q.disposition, QuestionDisposition::New))
            .count()
    }

    pub fn removable(&self) -> impl Iterator<Item = &UnmatchedRow> {
        self.unmatched.iter().filter(|u| u.is_removable())
    }

    /// Rows kept after the desired sequence, by persisted position.
    pub fn retained(&self) -> impl Iterator<Item = &UnmatchedRow> {
        self.unmatched.iter().filter(|u| u.is_protected())
    }

    /// True when applying the plan would change nothing: same rows, same
    /// content, same positions, nothing to delete or retire.
    pub fn is_noop(&self) -> bool {
        let desired_len = self.questions.len() as i32;
        let questions_settled = self.questions.iter().enumerate().all(|(index, q)| {
            match &q.disposition {
                QuestionDisposition::New => false,
                QuestionDisposition::Matched(m) => {
                    !m.type_changed
                        && !m.content_changed
                        && m.persisted.definition.position == index as i32
                        && m.options.is_noop()
                }
            }
        });
        questions_settled && tail_settled(&self.unmatched, desired_len)
    }
}

impl OptionPlan<'_> {
    pub fn has_structural_change(&self) -> bool {
        self.desired.iter().any(|o| o.matched.is_none())
            || self.unmatched.iter().any(|u| !u.retired)
    }

    pub fn has_text_change(&self) -> bool {
        self.desired.iter().any(|o| o.text_changed())
    }

    pub fn is_noop(&self) -> bool {
        let desired_len = self.desired.len() as i32;
        let desired_settled = self.desired.iter().enumerate().all(|(index, o)| match o.matched {
            Some(persisted) => {
                persisted.definition.position == index as i32
                    && !o.text_changed()
                    && !o.correctness_changed()
            }
            None => false,
        });
        desired_settled && tail_settled(&self.unmatched, desired_len)
    }
}

fn tail_settled(unmatched: &[UnmatchedRow], desired_len: i32) -> bool {
    unmatched.iter().enumerate().all(|(offset, row)| {
        row.is_protected() && row.retired && row.position == desired_len + offset as i32
    })
}

pub fn plan<'a>(
    persisted: &'a [PersistedQuestion],
    desired: &'a [QuestionSpec],
) -> Result<ReconciliationPlan<'a>> {
    let active: HashMap<Uuid, &PersistedQuestion> = persisted
        .iter()
        .filter(|q| !q.definition.retired)
        .map(|q| (q.definition.stable_id, q))
        .collect();

    let mut matched_ids: Vec<Uuid> = Vec::new();
    let mut questions = Vec::with_capacity(desired.len());

    for (index, spec) in desired.iter().enumerate() {
        let disposition = match spec.identity {
            SpecIdentity::New => QuestionDisposition::New,
            SpecIdentity::Existing(stable_id) => {
                let current = active.get(&stable_id).copied().ok_or_else(|| {
                    Error::Conflict(format!(
                        "questions[{}] refers to question {} which no longer exists; reload the template",
                        index, stable_id
                    ))
                })?;
                matched_ids.push(current.definition.id);
                QuestionDisposition::Matched(match_question(index, current, spec)?)
            }
        };
        questions.push(PlannedQuestion { spec, disposition });
    }

    let unmatched = persisted
        .iter()
        .filter(|q| !matched_ids.contains(&q.definition.id))
        .map(|q| UnmatchedRow {
            id: q.definition.id,
            position: q.definition.position,
            answer_count: q.answer_count,
            retired: q.definition.retired,
        })
        .collect();

    Ok(ReconciliationPlan {
        questions,
        unmatched,
    })
}

fn match_question<'a>(
    index: usize,
    persisted: &'a PersistedQuestion,
    spec: &'a QuestionSpec,
) -> Result<MatchedQuestion<'a>> {
    let def = &persisted.definition;
    let type_changed = def.question_type() != spec.question_type();
    let content_changed = def.label != spec.label
        || def.help_text != spec.help_text
        || def.required != spec.required
        || def.config != spec.config
        || def.max_points != spec.max_points;

    let active: HashMap<Uuid, &PersistedOption> = persisted
        .active_options()
        .map(|o| (o.definition.stable_id, o))
        .collect();

    let mut matched_ids: Vec<Uuid> = Vec::new();
    let mut desired = Vec::with_capacity(spec.options.len());
    for (option_index, option_spec) in spec.options.iter().enumerate() {
        let matched = match option_spec.identity {
            SpecIdentity::New => None,
            SpecIdentity::Existing(stable_id) => {
                let current = active.get(&stable_id).copied().ok_or_else(|| {
                    Error::Conflict(format!(
                        "questions[{}].options[{}] refers to option {} which no longer exists; reload the template",
                        index, option_index, stable_id
                    ))
                })?;
                matched_ids.push(current.definition.id);
                Some(current)
            }
        };
        desired.push(PlannedOption {
            spec: option_spec,
            matched,
        });
    }

    let unmatched = persisted
        .options
        .iter()
        .filter(|o| !matched_ids.contains(&o.definition.id))
        .map(|o| UnmatchedRow {
            id: o.definition.id,
            position: o.definition.position,
            answer_count: o.answer_count,
            retired: o.definition.retired,
        })
        .collect();

    Ok(MatchedQuestion {
        persisted,
        type_changed,
        content_changed,
        options: OptionPlan { desired, unmatched },
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::models::option::OptionDefinition;
    use crate::models::question::{
        QuestionConfig, QuestionDefinition, ShortTextConfig, SingleChoiceConfig,
    };
    use rust_decimal::Decimal;

    pub fn persisted_question(
        position: i32,
        config: QuestionConfig,
        answer_count: i64,
        options: &[(&str, i64)],
    ) -> PersistedQuestion {
        let id = Uuid::new_v4();
        PersistedQuestion {
            definition: QuestionDefinition {
                id,
                template_id: Uuid::nil(),
                stable_id: Uuid::new_v4(),
                label: format!("Question {}", position),
                help_text: None,
                required: true,
                config,
                max_points: Decimal::from(5),
                position,
                retired: false,
                created_at: None,
                updated_at: None,
            },
            answer_count,
            options: options
                .iter()
                .enumerate()
                .map(|(i, (text, answers))| PersistedOption {
                    definition: OptionDefinition {
                        id: Uuid::new_v4(),
                        question_id: id,
                        stable_id: Uuid::new_v4(),
                        text: text.to_string(),
                        position: i as i32,
                        is_correct: i == 0,
                        retired: false,
                        created_at: None,
                        updated_at: None,
                    },
                    answer_count: *answers,
                })
                .collect(),
        }
    }

    pub fn short_text(position: i32, answer_count: i64) -> PersistedQuestion {
        persisted_question(
            position,
            QuestionConfig::ShortText(ShortTextConfig::default()),
            answer_count,
            &[],
        )
    }

    pub fn single_choice(position: i32, answer_count: i64, options: &[(&str, i64)]) -> PersistedQuestion {
        persisted_question(
            position,
            QuestionConfig::SingleChoice(SingleChoiceConfig::default()),
            answer_count,
            options,
        )
    }

    pub fn new_essay(label: &str) -> QuestionSpec {
        QuestionSpec {
            identity: SpecIdentity::New,
            label: label.to_string(),
            help_text: None,
            required: false,
            config: QuestionConfig::Essay(Default::default()),
            max_points: Decimal::from(10),
            options: Vec::new(),
        }
    }
}
