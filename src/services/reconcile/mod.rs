pub mod detector;
pub mod forker;
pub mod ordering;
pub mod planner;
pub mod points;
pub mod updater;
pub mod validation;

use std::sync::Arc;
use uuid::Uuid;

use crate::database::store::{ReconcileStore, StoreTx};
use crate::dto::reconcile_dto::{ReconcileRequest, ReconciliationResult};
use crate::error::{Error, Result};
use crate::models::notification::ReconciliationEvent;
use crate::models::template::TemplateStatus;
use crate::services::notification_service::Notifier;

#[derive(Clone)]
pub struct ReconciliationService {
    store: Arc<dyn ReconcileStore>,
    notifier: Arc<dyn Notifier>,
}

impl ReconciliationService {
    pub fn new(store: Arc<dyn ReconcileStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn reconcile(
        &self,
        template_id: Uuid,
        request: ReconcileRequest,
    ) -> Result<ReconciliationResult> {
        validation::validate_request(&request)?;

        let mut tx = self.store.begin().await?;
        let outcome = apply(tx.as_mut(), template_id, &request).await;
        let applied = match outcome {
            Ok(applied) => applied,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(%template_id, error = ?rollback_err, "rollback failed");
                }
                tracing::debug!(%template_id, error = %e, "reconciliation aborted");
                return Err(e);
            }
        };
        tx.commit().await?;

        tracing::info!(
            %template_id,
            breaking = applied.result.breaking,
            submissions_returned = applied.result.submissions_returned,
            total_points = %applied.result.new_total_points,
            version = applied.result.version,
            "reconciliation committed"
        );

        for event in &applied.events {
            if let Err(e) = self.notifier.notify(event).await {
                tracing::warn!(
                    %template_id,
                    event_type = event.event_type(),
                    error = ?e,
                    "post-commit notification failed"
                );
            }
        }

        Ok(applied.result)
    }
}

struct Applied {
    result: ReconciliationResult,
    events: Vec<ReconciliationEvent>,
}

async fn apply(
    tx: &mut dyn StoreTx,
    template_id: Uuid,
    request: &ReconcileRequest,
) -> Result<Applied> {
    let template = tx.lock_template(template_id).await?;
    if let Some(expected) = request.expected_version {
        if expected != template.version {
            return Err(Error::Conflict(format!(
                "template {} is at version {}, not {}; reload and retry",
                template_id, template.version, expected
            )));
        }
    }
    if template.status == TemplateStatus::Archived {
        return Err(Error::BadRequest(format!(
            "template {} is archived; move it back to draft before editing",
            template_id
        )));
    }

    let persisted = tx.load_questions(template_id).await?;
    let counts = tx.count_submissions(template_id).await?;
    let plan = planner::plan(&persisted, &request.questions)?;
    let verdict = detector::detect(&plan, counts.graded);

    tracing::debug!(
        %template_id,
        desired = plan.questions.len(),
        new = plan.new_count(),
        unmatched = plan.unmatched.len(),
        graded = counts.graded,
        answered = counts.answered,
        reasons = ?verdict.reasons,
        "reconciliation planned"
    );

    if verdict.is_breaking() {
        let outcome = forker::apply(tx, template_id, &plan).await?;
        let (total, version) = points::recalculate(tx, template_id).await?;

        let mut events = vec![ReconciliationEvent::TemplateUpdated {
            template_id,
            version,
            breaking: true,
        }];
        events.extend(outcome.returned.iter().map(|s| {
            ReconciliationEvent::SubmissionReturned {
                submission_id: s.id,
                template_id,
                owner_id: s.owner_id,
            }
        }));
        tracing::info!(%template_id, path = "fork", answers_remapped = outcome.answers_remapped, "applied breaking edit");

        return Ok(Applied {
            result: ReconciliationResult {
                breaking: true,
                submissions_returned: outcome.returned.len() as i64,
                new_total_points: total,
                version,
            },
            events,
        });
    }

    if plan.is_noop() {
        tracing::info!(%template_id, path = "noop", "question set unchanged");
        return Ok(Applied {
            result: ReconciliationResult {
                breaking: false,
                submissions_returned: 0,
                new_total_points: template.total_points,
                version: template.version,
            },
            events: Vec::new(),
        });
    }

    if counts.answered == 0 {
        updater::overwrite(tx, template_id, &plan).await?;
        tracing::info!(%template_id, path = "overwrite", "applied edit");
    } else {
        updater::apply(tx, template_id, &plan).await?;
        tracing::info!(%template_id, path = "in_place", "applied edit");
    }
    let (total, version) = points::recalculate(tx, template_id).await?;

    Ok(Applied {
        result: ReconciliationResult {
            breaking: false,
            submissions_returned: 0,
            new_total_points: total,
            version,
        },
        events: vec![ReconciliationEvent::TemplateUpdated {
            template_id,
            version,
            breaking: false,
        }],
    })
}
