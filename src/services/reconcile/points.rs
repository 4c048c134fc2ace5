use rust_decimal::Decimal;
use uuid::Uuid;

use crate::database::store::StoreTx;
use crate::error::{Error, Result};

/// Recomputes the template total from its active questions and persists it.
/// Returns the total and the bumped version.
pub async fn recalculate(tx: &mut dyn StoreTx, template_id: Uuid) -> Result<(Decimal, i64)> {
    let questions = tx.load_questions(template_id).await?;
    let total = questions
        .iter()
        .filter(|q| !q.definition.retired)
        .try_fold(Decimal::ZERO, |total, q| total.checked_add(q.definition.max_points))
        .ok_or_else(|| {
            Error::Internal(format!("point total of template {} overflowed", template_id))
        })?;
    let version = tx.save_totals(template_id, total).await?;
    tracing::debug!(%template_id, %total, version, "template total recalculated");
    Ok((total, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::ReconcileStore;
    use crate::database::MemoryStore;
    use crate::models::question::{NewQuestion, QuestionConfig, QuestionContent, WordBounds};
    use crate::models::template::TemplateStatus;

    fn essay(points: Decimal) -> QuestionContent {
        QuestionContent {
            label: "Trace the argument".to_string(),
            help_text: None,
            required: false,
            config: QuestionConfig::Essay(WordBounds::default()),
            max_points: points,
        }
    }

    #[tokio::test]
    async fn total_skips_retired_rows_and_bumps_version() {
        let store = MemoryStore::new();
        let template_id = store.create_template("Romans", TemplateStatus::Draft);
        store.seed_question(template_id, essay(Decimal::new(250, 2))).unwrap();
        let retired = store.seed_question(template_id, essay(Decimal::from(7))).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.retire_question(retired.id).await.unwrap();
        let (total, version) = recalculate(tx.as_mut(), template_id).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(total, Decimal::new(250, 2));
        assert_eq!(version, 1);
        assert_eq!(store.template(template_id).unwrap().total_points, total);
    }

    #[tokio::test]
    async fn overflowing_total_is_an_error() {
        let store = MemoryStore::new();
        let template_id = store.create_template("Romans", TemplateStatus::Draft);

        let mut tx = store.begin().await.unwrap();
        for position in 0..2 {
            tx.insert_question(&NewQuestion {
                template_id,
                stable_id: Uuid::new_v4(),
                content: essay(Decimal::MAX),
                position,
            })
            .await
            .unwrap();
        }
        let err = recalculate(tx.as_mut(), template_id).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
