use std::collections::HashMap;
use uuid::Uuid;

use super::ordering::{self, Placement};
use super::planner::{QuestionDisposition, ReconciliationPlan};
use super::updater::insert_question;
use crate::database::store::{PersistedOption, SiblingKind, StoreTx};
use crate::error::Result;
use crate::models::option::NewOption;
use crate::models::submission::Submission;

pub const RETURNED_FEEDBACK: &str =
    "This test was changed after grading. Please review your answers and resubmit.";

#[derive(Debug, Default)]
pub struct ForkOutcome {
    pub returned: Vec<Submission>,
    pub answers_remapped: u64,
}

pub async fn apply(
    tx: &mut dyn StoreTx,
    template_id: Uuid,
    plan: &ReconciliationPlan<'_>,
) -> Result<ForkOutcome> {
    let returned = tx
        .return_graded_submissions(template_id, RETURNED_FEEDBACK)
        .await?;

    // Every persisted row is live until the final delete; only protected
    // orphans keep a slot, after the new generation.
    let retained: Vec<Uuid> = plan.retained().map(|row| row.id).collect();
    let live: Vec<(Uuid, i32)> = plan
        .matched()
        .map(|m| (m.persisted.definition.id, m.persisted.definition.position))
        .chain(plan.unmatched.iter().map(|row| (row.id, row.position)))
        .collect();
    let sequence: Vec<Placement> = std::iter::repeat(Placement::Insert)
        .take(plan.questions.len())
        .chain(retained.iter().map(|id| Placement::Keep(*id)))
        .collect();
    ordering::assign(tx, SiblingKind::Question, &live, &sequence).await?;

    let mut question_map: Vec<(Uuid, Uuid)> = Vec::new();
    let mut option_map: Vec<(Uuid, Uuid)> = Vec::new();
    let mut orphaned_options: Vec<Uuid> = Vec::new();

    for (index, planned) in plan.questions.iter().enumerate() {
        let inserted = insert_question(tx, template_id, planned.spec, index as i32).await?;
        let QuestionDisposition::Matched(m) = &planned.disposition else {
            continue;
        };
        question_map.push((m.persisted.definition.id, inserted.id));

        let successors: HashMap<Uuid, Uuid> = m
            .options
            .desired
            .iter()
            .zip(&inserted.options)
            .filter_map(|(o, new_id)| o.matched.map(|p| (p.definition.id, *new_id)))
            .collect();
        option_map.extend(successors.iter().map(|(old, new)| (*old, *new)));

        // Selected options with no successor: carried over retired when the
        // new row still takes options, otherwise the selection is dropped.
        let unmapped = m
            .persisted
            .options
            .iter()
            .filter(|o| o.answer_count > 0 && !successors.contains_key(&o.definition.id));
        if planned.spec.question_type().is_choice() {
            let mut position = inserted.options.len() as i32;
            for old in unmapped {
                let carried = carry_retired_option(tx, inserted.id, old, position).await?;
                option_map.push((old.definition.id, carried));
                position += 1;
            }
        } else {
            orphaned_options.extend(unmapped.map(|o| o.definition.id));
        }
    }

    let mut answers_remapped = 0;
    for (old, new) in &question_map {
        answers_remapped += tx.remap_answers(*old, *new).await?;
    }
    for (old, new) in &option_map {
        tx.remap_answer_options(*old, *new).await?;
    }
    for option_id in &orphaned_options {
        tx.detach_answer_options(*option_id).await?;
    }

    // Remapped above, so nothing references these any more.
    for (old, _) in &question_map {
        tx.delete_question(*old).await?;
    }
    for row in plan.removable() {
        tx.delete_question(row.id).await?;
    }
    for row in plan.unmatched.iter().filter(|u| u.is_newly_orphaned()) {
        tx.retire_question(row.id).await?;
    }

    tracing::debug!(
        %template_id,
        forked = plan.questions.len(),
        answers_remapped,
        retained = retained.len(),
        "question set forked"
    );

    Ok(ForkOutcome {
        returned,
        answers_remapped,
    })
}

async fn carry_retired_option(
    tx: &mut dyn StoreTx,
    question_id: Uuid,
    old: &PersistedOption,
    position: i32,
) -> Result<Uuid> {
    let id = tx
        .insert_option(&NewOption {
            question_id,
            stable_id: old.definition.stable_id,
            text: old.definition.text.clone(),
            is_correct: old.definition.is_correct,
            position,
        })
        .await?;
    tx.retire_option(id).await?;
    Ok(id)
}
