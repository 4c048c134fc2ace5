use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;

use crate::{
    dto::reconcile_dto::{ReconcileRequest, StatusTransitionPayload},
    error::Result,
    middleware::auth::Claims,
    AppState,
};

pub async fn get_questions(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let view = state.template_service.editor_view(template_id).await?;
    Ok(Json(view))
}

#[axum::debug_handler]
pub async fn reconcile_questions(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ReconcileRequest>,
) -> Result<impl IntoResponse> {
    tracing::info!(
        %template_id,
        editor = %claims.sub,
        questions = payload.questions.len(),
        "reconcile requested"
    );
    let result = state
        .reconciliation_service
        .reconcile(template_id, payload)
        .await?;
    Ok(Json(result))
}

#[axum::debug_handler]
pub async fn update_status(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Json(payload): Json<StatusTransitionPayload>,
) -> Result<impl IntoResponse> {
    let template = state
        .template_service
        .transition_status(template_id, payload.status)
        .await?;
    Ok(Json(template))
}
