use std::fmt;
use uuid::Uuid;

use super::planner::{QuestionDisposition, ReconciliationPlan};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakingReason {
    /// An answered question leaves the editor's sequence.
    AnsweredQuestionRemoved(Uuid),
    QuestionAdded { index: usize },
    TypeChanged { question_id: Uuid },
    /// Options of an answered question were added, removed, or reworded.
    AnsweredOptionsChanged { question_id: Uuid },
}

impl fmt::Display for BreakingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakingReason::AnsweredQuestionRemoved(id) => {
                write!(f, "answered question {} removed", id)
            }
            BreakingReason::QuestionAdded { index } => write!(f, "question added at {}", index),
            BreakingReason::TypeChanged { question_id } => {
                write!(f, "type of question {} changed", question_id)
            }
            BreakingReason::AnsweredOptionsChanged { question_id } => {
                write!(f, "options of answered question {} changed", question_id)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakingVerdict {
    pub reasons: Vec<BreakingReason>,
}

impl BreakingVerdict {
    pub fn is_breaking(&self) -> bool {
        !self.reasons.is_empty()
    }
}

/// Nothing is breaking while no submission has been graded.
pub fn detect(plan: &ReconciliationPlan<'_>, graded_submissions: i64) -> BreakingVerdict {
    if graded_submissions == 0 {
        return BreakingVerdict::default();
    }

    let mut reasons = Vec::new();

    reasons.extend(
        plan.unmatched
            .iter()
            .filter(|u| u.is_newly_orphaned())
            .map(|u| BreakingReason::AnsweredQuestionRemoved(u.id)),
    );

    for (index, planned) in plan.questions.iter().enumerate() {
        match &planned.disposition {
            QuestionDisposition::New => reasons.push(BreakingReason::QuestionAdded { index }),
            QuestionDisposition::Matched(m) => {
                let question_id = m.persisted.definition.id;
                if m.type_changed {
                    reasons.push(BreakingReason::TypeChanged { question_id });
                } else if m.persisted.answer_count > 0
                    && (m.options.has_structural_change() || m.options.has_text_change())
                {
                    reasons.push(BreakingReason::AnsweredOptionsChanged { question_id });
                }
            }
        }
    }

    BreakingVerdict { reasons }
}

#[cfg(test)]
mod tests {
    use super::super::planner::fixtures::*;
    use super::super::planner::plan;
    use super::*;
    use crate::dto::reconcile_dto::{OptionSpec, QuestionSpec};
    use rust_decimal::Decimal;

    #[test]
    fn no_graded_work_means_never_breaking() {
        let persisted = vec![short_text(0, 3)];
        let desired = vec![new_essay("Fresh")];
        let plan = plan(&persisted, &desired).unwrap();
        assert!(!detect(&plan, 0).is_breaking());
    }

    #[test]
    fn label_and_points_edits_are_safe() {
        let persisted = vec![short_text(0, 3)];
        let mut spec = QuestionSpec::from_persisted(&persisted[0]);
        spec.label = "Reworded".to_string();
        spec.max_points = Decimal::from(9);
        spec.required = false;
        let desired = vec![spec];
        let plan = plan(&persisted, &desired).unwrap();
        assert!(!detect(&plan, 4).is_breaking());
    }

    #[test]
    fn added_question_is_breaking() {
        let persisted = vec![short_text(0, 1)];
        let desired = vec![QuestionSpec::from_persisted(&persisted[0]), new_essay("Extra")];
        let plan = plan(&persisted, &desired).unwrap();
        let verdict = detect(&plan, 1);
        assert_eq!(verdict.reasons, vec![BreakingReason::QuestionAdded { index: 1 }]);
    }

    #[test]
    fn removing_answered_question_is_breaking_but_unanswered_is_not() {
        let persisted = vec![short_text(0, 0), short_text(1, 2)];

        let desired = vec![QuestionSpec::from_persisted(&persisted[1])];
        let plan_a = plan(&persisted, &desired).unwrap();
        assert!(!detect(&plan_a, 1).is_breaking());

        let desired = vec![QuestionSpec::from_persisted(&persisted[0])];
        let plan_b = plan(&persisted, &desired).unwrap();
        assert_eq!(
            detect(&plan_b, 1).reasons,
            vec![BreakingReason::AnsweredQuestionRemoved(persisted[1].definition.id)]
        );
    }

    #[test]
    fn type_change_is_breaking() {
        let persisted = vec![short_text(0, 0)];
        let mut spec = QuestionSpec::from_persisted(&persisted[0]);
        spec.config = new_essay("x").config;
        let desired = vec![spec];
        let plan = plan(&persisted, &desired).unwrap();
        assert!(detect(&plan, 1).is_breaking());
    }

    #[test]
    fn option_edits_break_only_answered_questions() {
        let answered = vec![single_choice(0, 2, &[("X", 2), ("Y", 0)])];
        let mut spec = QuestionSpec::from_persisted(&answered[0]);
        spec.options.push(OptionSpec {
            identity: Default::default(),
            text: "Z".to_string(),
            is_correct: false,
        });
        let desired = vec![spec];
        let plan_a = plan(&answered, &desired).unwrap();
        assert!(detect(&plan_a, 1).is_breaking());

        let unanswered = vec![single_choice(0, 0, &[("X", 0), ("Y", 0)])];
        let mut spec = QuestionSpec::from_persisted(&unanswered[0]);
        spec.options[1].text = "Y (revised)".to_string();
        let desired = vec![spec];
        let plan_b = plan(&unanswered, &desired).unwrap();
        assert!(!detect(&plan_b, 1).is_breaking());
    }

    #[test]
    fn correctness_flip_alone_is_safe() {
        let persisted = vec![single_choice(0, 2, &[("X", 1), ("Y", 1)])];
        let mut spec = QuestionSpec::from_persisted(&persisted[0]);
        spec.options[0].is_correct = false;
        spec.options[1].is_correct = true;
        let desired = vec![spec];
        let plan = plan(&persisted, &desired).unwrap();
        assert!(!detect(&plan, 2).is_breaking());
    }
}
