use std::sync::Arc;
use uuid::Uuid;

use crate::database::store::ReconcileStore;
use crate::dto::reconcile_dto::{QuestionView, TemplateView};
use crate::error::{Error, Result};
use crate::models::template::{TemplateStatus, TestTemplate};

#[derive(Clone)]
pub struct TemplateService {
    store: Arc<dyn ReconcileStore>,
}

impl TemplateService {
    pub fn new(store: Arc<dyn ReconcileStore>) -> Self {
        Self { store }
    }

    /// Active questions only, in order, with the stable ids an editor echoes
    /// back on the next reconciliation.
    pub async fn editor_view(&self, template_id: Uuid) -> Result<TemplateView> {
        let mut tx = self.store.begin().await?;
        let template = tx.get_template(template_id).await?;
        let questions = tx.load_questions(template_id).await?;
        tx.rollback().await?;

        Ok(TemplateView {
            template,
            questions: questions
                .iter()
                .filter(|q| !q.definition.retired)
                .map(QuestionView::from)
                .collect(),
        })
    }

    pub async fn transition_status(
        &self,
        template_id: Uuid,
        next: TemplateStatus,
    ) -> Result<TestTemplate> {
        let mut tx = self.store.begin().await?;
        let template = tx.lock_template(template_id).await?;
        if !template.status.can_transition_to(next) {
            tx.rollback().await?;
            return Err(Error::BadRequest(format!(
                "cannot move template from {} to {}",
                template.status, next
            )));
        }
        tx.set_template_status(template_id, next).await?;
        let updated = tx.get_template(template_id).await?;
        tx.commit().await?;

        tracing::info!(%template_id, from = %template.status, to = %next, "template status changed");
        Ok(updated)
    }
}
