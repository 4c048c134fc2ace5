use rust_decimal::Decimal;
use std::collections::HashSet;
use validator::Validate;

use crate::dto::reconcile_dto::{QuestionSpec, ReconcileRequest, SpecIdentity};
use crate::error::{Error, Result};
use crate::models::question::QuestionType;

// NUMERIC(10, 2)
const MAX_POINTS_LIMIT: i64 = 100_000_000;
const MAX_POINTS_SCALE: u32 = 2;

pub fn validate_request(request: &ReconcileRequest) -> Result<()> {
    request.validate()?;

    let mut seen = HashSet::new();
    for (index, spec) in request.questions.iter().enumerate() {
        let field = format!("questions[{}]", index);
        if let SpecIdentity::Existing(stable_id) = spec.identity {
            if !seen.insert(stable_id) {
                return Err(Error::invalid_spec(
                    format!("{}.identity", field),
                    format!("stable id {} appears more than once", stable_id),
                ));
            }
        }
        validate_question(&field, spec)?;
    }
    Ok(())
}

fn validate_question(field: &str, spec: &QuestionSpec) -> Result<()> {
    if spec.label.trim().is_empty() {
        return Err(Error::invalid_spec(
            format!("{}.label", field),
            "must not be blank",
        ));
    }
    if spec.max_points.is_sign_negative() {
        return Err(Error::invalid_spec(
            format!("{}.max_points", field),
            "must not be negative",
        ));
    }
    if spec.max_points >= Decimal::from(MAX_POINTS_LIMIT)
        || spec.max_points.normalize().scale() > MAX_POINTS_SCALE
    {
        return Err(Error::invalid_spec(
            format!("{}.max_points", field),
            format!(
                "must be below {} with at most {} decimal places",
                MAX_POINTS_LIMIT, MAX_POINTS_SCALE
            ),
        ));
    }
    if let Err((key, message)) = spec.config.check_bounds() {
        return Err(Error::invalid_spec(
            format!("{}.config.{}", field, key),
            message,
        ));
    }

    let options_field = format!("{}.options", field);
    let question_type = spec.question_type();
    if !question_type.is_choice() {
        if !spec.options.is_empty() {
            return Err(Error::invalid_spec(
                options_field,
                format!("{} questions do not take options", question_type),
            ));
        }
        return Ok(());
    }

    if spec.options.is_empty() {
        return Err(Error::invalid_spec(
            options_field,
            format!("{} questions need at least one option", question_type),
        ));
    }

    let correct = spec.options.iter().filter(|o| o.is_correct).count();
    match question_type {
        QuestionType::SingleChoice if correct > 1 => {
            return Err(Error::invalid_spec(
                options_field,
                "single choice allows at most one correct option",
            ));
        }
        QuestionType::MultipleChoice if correct == 0 => {
            return Err(Error::invalid_spec(
                options_field,
                "multiple choice needs at least one correct option",
            ));
        }
        _ => {}
    }

    let mut seen = HashSet::new();
    for (index, option) in spec.options.iter().enumerate() {
        let option_field = format!("{}[{}]", options_field, index);
        if option.text.trim().is_empty() {
            return Err(Error::invalid_spec(
                format!("{}.text", option_field),
                "must not be blank",
            ));
        }
        if let SpecIdentity::Existing(stable_id) = option.identity {
            if spec.identity == SpecIdentity::New {
                return Err(Error::invalid_spec(
                    format!("{}.identity", option_field),
                    "a new question cannot reference existing options",
                ));
            }
            if !seen.insert(stable_id) {
                return Err(Error::invalid_spec(
                    format!("{}.identity", option_field),
                    format!("stable id {} appears more than once", stable_id),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::reconcile_dto::OptionSpec;
    use crate::models::question::{QuestionConfig, SingleChoiceConfig, WordBounds};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn option(text: &str, is_correct: bool) -> OptionSpec {
        OptionSpec {
            identity: SpecIdentity::New,
            text: text.to_string(),
            is_correct,
        }
    }

    fn choice(options: Vec<OptionSpec>) -> QuestionSpec {
        QuestionSpec {
            identity: SpecIdentity::New,
            label: "Which covenant?".to_string(),
            help_text: None,
            required: true,
            config: QuestionConfig::SingleChoice(SingleChoiceConfig::default()),
            max_points: Decimal::from(2),
            options,
        }
    }

    fn request(questions: Vec<QuestionSpec>) -> ReconcileRequest {
        ReconcileRequest {
            questions,
            expected_version: None,
        }
    }

    fn field_of(result: Result<()>) -> String {
        match result {
            Err(Error::InvalidSpec { field, .. }) => field,
            other => panic!("expected InvalidSpec, got {:?}", other),
        }
    }

    #[test]
    fn choice_without_options_names_the_field() {
        let req = request(vec![choice(vec![option("A", true)]), choice(vec![])]);
        assert_eq!(field_of(validate_request(&req)), "questions[1].options");
    }

    #[test]
    fn non_choice_with_options_is_rejected() {
        let mut spec = choice(vec![option("A", false)]);
        spec.config = QuestionConfig::Essay(WordBounds::default());
        assert_eq!(field_of(validate_request(&request(vec![spec]))), "questions[0].options");
    }

    #[test]
    fn single_choice_with_two_correct_answers_is_rejected() {
        let spec = choice(vec![option("A", true), option("B", true)]);
        assert!(validate_request(&request(vec![spec])).is_err());
    }

    #[test]
    fn duplicate_stable_ids_are_rejected() {
        let stable = Uuid::new_v4();
        let mut first = choice(vec![option("A", true)]);
        first.identity = SpecIdentity::Existing(stable);
        let second = first.clone();
        assert_eq!(
            field_of(validate_request(&request(vec![first, second]))),
            "questions[1].identity"
        );
    }

    #[test]
    fn new_question_cannot_claim_existing_options() {
        let mut spec = choice(vec![option("A", true)]);
        spec.options[0].identity = SpecIdentity::Existing(Uuid::new_v4());
        assert_eq!(
            field_of(validate_request(&request(vec![spec]))),
            "questions[0].options[0].identity"
        );
    }

    #[test]
    fn negative_points_and_inverted_bounds_are_rejected() {
        let mut spec = choice(vec![option("A", true)]);
        spec.max_points = Decimal::from(-1);
        assert_eq!(field_of(validate_request(&request(vec![spec]))), "questions[0].max_points");

        let mut essay = choice(vec![]);
        essay.config = QuestionConfig::Essay(WordBounds {
            min_words: Some(10),
            max_words: Some(5),
        });
        assert_eq!(
            field_of(validate_request(&request(vec![essay]))),
            "questions[0].config.min_words"
        );
    }

    #[test]
    fn oversized_or_overly_precise_points_are_rejected() {
        let mut essay = choice(vec![]);
        essay.config = QuestionConfig::Essay(WordBounds::default());

        let mut huge = essay.clone();
        huge.max_points = Decimal::MAX;
        let req = request(vec![essay.clone(), huge]);
        assert_eq!(field_of(validate_request(&req)), "questions[1].max_points");

        let mut at_limit = essay.clone();
        at_limit.max_points = Decimal::from(MAX_POINTS_LIMIT);
        assert_eq!(field_of(validate_request(&request(vec![at_limit]))), "questions[0].max_points");

        let mut fine_grained = essay.clone();
        fine_grained.max_points = Decimal::new(1_005, 3);
        assert_eq!(
            field_of(validate_request(&request(vec![fine_grained]))),
            "questions[0].max_points"
        );

        let mut largest = essay;
        largest.max_points = Decimal::new(9_999_999_999, 2);
        assert!(validate_request(&request(vec![largest])).is_ok());
    }

    #[test]
    fn well_formed_request_passes() {
        let mut essay = choice(vec![]);
        essay.config = QuestionConfig::Essay(WordBounds::default());
        let req = request(vec![choice(vec![option("A", true), option("B", false)]), essay]);
        assert!(validate_request(&req).is_ok());
    }
}
