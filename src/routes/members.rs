//! Member Routes
//!
//! Registration of callers and the current review roster.

use crate::error::{ApiResult, AppError};
use crate::identity::Identity;
use crate::members::Member;
use crate::models::{MessageResponse, SuccessResponse};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberResponse {
    pub member: Member,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberListResponse {
    pub members: Vec<Member>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterResponse {
    pub reviewer_level: u8,
    pub reviewers: Vec<Member>,
}

/// Register the calling identity, or refresh its name and level
pub async fn register_member(
    State(state): State<SharedState>,
    identity: Identity,
) -> ApiResult<(StatusCode, Json<SuccessResponse<MemberResponse>>)> {
    let member = state
        .members
        .upsert(identity.id, identity.name, identity.level)
        .await;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data("Member registered", MemberResponse { member })),
    ))
}

pub async fn list_members(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<MemberListResponse>>> {
    let members = state.members.list().await;
    Ok(Json(SuccessResponse::with_data(
        format!("Found {} members", members.len()),
        MemberListResponse { members },
    )))
}

pub async fn get_member(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<MemberResponse>>> {
    let member = state
        .members
        .find_by_id(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Member {} not found", id)))?;
    Ok(Json(SuccessResponse::with_data("Member retrieved", MemberResponse { member })))
}

/// Members currently eligible to vote
pub async fn get_roster(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<RosterResponse>>> {
    let reviewers = state.members.reviewers().await;
    Ok(Json(SuccessResponse::with_data(
        format!("{} eligible reviewers", reviewers.len()),
        RosterResponse {
            reviewer_level: state.members.reviewer_level().value(),
            reviewers,
        },
    )))
}

/// Remove a member; allowed for the member themselves or a reviewer
pub async fn remove_member(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    identity: Identity,
) -> ApiResult<Json<MessageResponse>> {
    if identity.id != id && identity.level < state.members.reviewer_level() {
        return Err(AppError::Permission(
            "Only the member or a reviewer can remove a member".to_string(),
        ));
    }

    let member = state.members.remove(id).await?;
    Ok(Json(MessageResponse::new(format!("Member {} removed", member.name))))
}
