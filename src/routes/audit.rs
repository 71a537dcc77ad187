//! Audit Routes

use crate::error::ApiResult;
use crate::models::SuccessResponse;
use crate::state::SharedState;
use crate::tribunal::audit::AuditEntry;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub proposal_id: Option<Uuid>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditResponse {
    pub entries: Vec<AuditEntry>,
}

/// Lifecycle events, most recent first
pub async fn list_audit(
    State(state): State<SharedState>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<SuccessResponse<AuditResponse>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let entries = state.audit.entries(query.proposal_id, limit).await;

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} audit entries", entries.len()),
        AuditResponse { entries },
    )))
}
