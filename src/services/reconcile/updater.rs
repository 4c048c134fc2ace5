use uuid::Uuid;

use super::ordering::{self, Placement};
use super::planner::{
    MatchedQuestion, OptionPlan, PlannedQuestion, QuestionDisposition, ReconciliationPlan,
    UnmatchedRow,
};
use crate::database::store::{SiblingKind, StoreTx};
use crate::dto::reconcile_dto::QuestionSpec;
use crate::error::Result;
use crate::models::option::NewOption;
use crate::models::question::NewQuestion;

/// Row ids created for one spec, options in spec order.
#[derive(Debug)]
pub(super) struct InsertedQuestion {
    pub id: Uuid,
    pub options: Vec<Uuid>,
}

/// Inserts a question and its options, keeping any stable ids the
/// `QuestionSpec` carries.
pub(super) async fn insert_question(
    tx: &mut dyn StoreTx,
    template_id: Uuid,
    spec: &QuestionSpec,
    position: i32,
) -> Result<InsertedQuestion> {
    let id = tx
        .insert_question(&NewQuestion {
            template_id,
            stable_id: spec.identity.stable_id().unwrap_or_else(Uuid::new_v4),
            content: spec.content(),
            position,
        })
        .await?;

    let mut options = Vec::with_capacity(spec.options.len());
    for (index, option) in spec.options.iter().enumerate() {
        let option_id = tx
            .insert_option(&NewOption {
                question_id: id,
                stable_id: option.identity.stable_id().unwrap_or_else(Uuid::new_v4),
                text: option.text.clone(),
                is_correct: option.is_correct,
                position: index as i32,
            })
            .await?;
        options.push(option_id);
    }
    Ok(InsertedQuestion { id, options })
}

/// Nothing references the current rows, so they are replaced wholesale.
pub async fn overwrite(
    tx: &mut dyn StoreTx,
    template_id: Uuid,
    plan: &ReconciliationPlan<'_>,
) -> Result<()> {
    let removed = tx.delete_template_questions(template_id).await?;
    for (index, planned) in plan.questions.iter().enumerate() {
        insert_question(tx, template_id, planned.spec, index as i32).await?;
    }
    tracing::debug!(
        %template_id,
        removed,
        inserted = plan.questions.len(),
        "question set overwritten"
    );
    Ok(())
}

pub async fn apply(
    tx: &mut dyn StoreTx,
    template_id: Uuid,
    plan: &ReconciliationPlan<'_>,
) -> Result<()> {
    // Rows leaving the sequence first, so they stop holding final slots.
    let mut retained: Vec<UnmatchedRow> = plan.retained().copied().collect();
    for row in plan.removable() {
        tx.delete_question(row.id).await?;
    }
    for row in plan.unmatched.iter().filter(|u| u.is_newly_orphaned()) {
        tx.retire_question(row.id).await?;
    }

    // A type change replaces the row; an answered old row stays behind retired.
    for planned in &plan.questions {
        if let QuestionDisposition::Matched(m) = &planned.disposition {
            if !m.type_changed {
                continue;
            }
            let old = &m.persisted.definition;
            if m.persisted.answer_count > 0 {
                tx.retire_question(old.id).await?;
                retained.push(UnmatchedRow {
                    id: old.id,
                    position: old.position,
                    answer_count: m.persisted.answer_count,
                    retired: true,
                });
            } else {
                tx.delete_question(old.id).await?;
            }
        }
    }
    retained.sort_by_key(|row| row.position);

    let sequence: Vec<Placement> = plan
        .questions
        .iter()
        .map(|planned| match kept(planned) {
            Some(m) => Placement::Keep(m.persisted.definition.id),
            None => Placement::Insert,
        })
        .chain(retained.iter().map(|row| Placement::Keep(row.id)))
        .collect();
    let live: Vec<(Uuid, i32)> = plan
        .matched()
        .filter(|m| !m.type_changed)
        .map(|m| (m.persisted.definition.id, m.persisted.definition.position))
        .chain(retained.iter().map(|row| (row.id, row.position)))
        .collect();
    ordering::assign(tx, SiblingKind::Question, &live, &sequence).await?;

    for (index, planned) in plan.questions.iter().enumerate() {
        match kept(planned) {
            None => {
                insert_question(tx, template_id, planned.spec, index as i32).await?;
            }
            Some(m) => {
                if m.content_changed {
                    tx.update_question(m.persisted.definition.id, &planned.spec.content())
                        .await?;
                }
                apply_options(tx, m.persisted.definition.id, &m.options).await?;
            }
        }
    }
    Ok(())
}

/// The matched row this spec keeps in place, if any.
fn kept<'p, 'a>(planned: &'p PlannedQuestion<'a>) -> Option<&'p MatchedQuestion<'a>> {
    match &planned.disposition {
        QuestionDisposition::Matched(m) if !m.type_changed => Some(m),
        _ => None,
    }
}

async fn apply_options(
    tx: &mut dyn StoreTx,
    question_id: Uuid,
    plan: &OptionPlan<'_>,
) -> Result<()> {
    if plan.is_noop() {
        return Ok(());
    }

    for row in plan.unmatched.iter() {
        if row.is_removable() {
            tx.delete_option(row.id).await?;
        } else if !row.retired {
            tx.retire_option(row.id).await?;
        }
    }

    let retained: Vec<&UnmatchedRow> = plan.unmatched.iter().filter(|u| u.is_protected()).collect();
    let sequence: Vec<Placement> = plan
        .desired
        .iter()
        .map(|o| match o.matched {
            Some(persisted) => Placement::Keep(persisted.definition.id),
            None => Placement::Insert,
        })
        .chain(retained.iter().map(|row| Placement::Keep(row.id)))
        .collect();
    let live: Vec<(Uuid, i32)> = plan
        .desired
        .iter()
        .filter_map(|o| o.matched)
        .map(|p| (p.definition.id, p.definition.position))
        .chain(retained.iter().map(|row| (row.id, row.position)))
        .collect();
    ordering::assign(tx, SiblingKind::Option, &live, &sequence).await?;

    for (index, option) in plan.desired.iter().enumerate() {
        match option.matched {
            None => {
                tx.insert_option(&NewOption {
                    question_id,
                    stable_id: Uuid::new_v4(),
                    text: option.spec.text.clone(),
                    is_correct: option.spec.is_correct,
                    position: index as i32,
                })
                .await?;
            }
            Some(persisted) if option.text_changed() || option.correctness_changed() => {
                tx.update_option(persisted.definition.id, &option.spec.text, option.spec.is_correct)
                    .await?;
            }
            Some(_) => {}
        }
    }
    Ok(())
}
