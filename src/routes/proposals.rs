//! Proposal Routes
//!
//! API endpoints for authoring, submitting and voting on lessons.

use crate::error::{ApiResult, AppError};
use crate::identity::{Identity, Level};
use crate::models::{MessageResponse, SuccessResponse};
use crate::state::SharedState;
use crate::tribunal::blocks::{Block, BlockKind, BlockMetadata, MoveDirection};
use crate::tribunal::consensus::{VoteOutcome, VoteTally};
use crate::tribunal::proposal::{
    Category, Decision, MetadataPatch, Proposal, ProposalFilter, ProposalStatus, ProposalSummary,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProposalRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 5000, message = "Description must be at most 5000 characters"))]
    pub description: String,
    pub category: Category,
    #[validate(range(min = 1, max = 6, message = "Target level must be between 1 and 6"))]
    pub target_level: u8,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMetadataRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: Option<String>,
    #[validate(length(max = 5000, message = "Description must be at most 5000 characters"))]
    pub description: Option<String>,
    pub category: Option<Category>,
    #[validate(range(min = 1, max = 6, message = "Target level must be between 1 and 6"))]
    pub target_level: Option<u8>,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceContentRequest {
    pub blocks: Vec<Block>,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertBlockRequest {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: BlockMetadata,
    pub at_index: Option<usize>,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBlockRequest {
    pub content: Option<String>,
    pub metadata: Option<BlockMetadata>,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveBlockRequest {
    pub direction: MoveDirection,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderBlockRequest {
    /// Block to land in front of; `None` moves to the end
    pub before_id: Option<Uuid>,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetypeBlockRequest {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionQuery {
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub decision: Decision,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalResponse {
    pub proposal: Proposal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalListResponse {
    pub proposals: Vec<ProposalSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockResponse {
    pub block: Block,
    pub proposal: Proposal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyResponse {
    pub tally: VoteTally,
}

fn proposal_response(message: impl Into<String>, proposal: Proposal) -> Json<SuccessResponse<ProposalResponse>> {
    Json(SuccessResponse::with_data(message, ProposalResponse { proposal }))
}

// =============================================================================
// PROPOSAL ROUTES
// =============================================================================

/// Create a new draft proposal
pub async fn create_proposal(
    State(state): State<SharedState>,
    identity: Identity,
    Json(req): Json<CreateProposalRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<ProposalResponse>>)> {
    req.validate()?;
    let proposal = state
        .proposals
        .create(&identity, req.title, req.description, req.category, Level::new(req.target_level)?)
        .await?;

    Ok((StatusCode::CREATED, proposal_response("Proposal created", proposal)))
}

/// List proposals
pub async fn list_proposals(
    State(state): State<SharedState>,
    Query(filter): Query<ProposalFilter>,
) -> ApiResult<Json<SuccessResponse<ProposalListResponse>>> {
    let proposals: Vec<ProposalSummary> = state
        .proposals
        .list(&filter)
        .await
        .iter()
        .map(ProposalSummary::from)
        .collect();

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} proposals", proposals.len()),
        ProposalListResponse { proposals },
    )))
}

/// Get a proposal by ID
pub async fn get_proposal(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<ProposalResponse>>> {
    let proposal = state.proposals.get(id).await?;
    Ok(proposal_response("Proposal retrieved", proposal))
}

/// Delete a draft or pending proposal
pub async fn delete_proposal(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    identity: Identity,
) -> ApiResult<Json<MessageResponse>> {
    state.proposals.delete(id, identity.id).await?;
    Ok(Json(MessageResponse::new(format!("Proposal {} deleted", id))))
}

/// Update title, description, category or target level
pub async fn update_metadata(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    identity: Identity,
    Json(req): Json<UpdateMetadataRequest>,
) -> ApiResult<Json<SuccessResponse<ProposalResponse>>> {
    req.validate()?;
    let patch = MetadataPatch {
        title: req.title,
        description: req.description,
        category: req.category,
        target_level: req.target_level.map(Level::new).transpose()?,
    };
    let proposal = state
        .proposals
        .update_metadata(id, identity.id, patch, req.expected_version)
        .await?;
    Ok(proposal_response("Proposal updated", proposal))
}

/// Replace the whole block list
pub async fn replace_content(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    identity: Identity,
    Json(req): Json<ReplaceContentRequest>,
) -> ApiResult<Json<SuccessResponse<ProposalResponse>>> {
    let proposal = state
        .proposals
        .update_content(id, identity.id, req.blocks, req.expected_version)
        .await?;
    Ok(proposal_response("Content replaced", proposal))
}

/// Submit proposal for review
pub async fn submit_proposal(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    identity: Identity,
) -> ApiResult<Json<SuccessResponse<ProposalResponse>>> {
    let proposal = state.proposals.submit(id, identity.id).await?;
    Ok(proposal_response("Proposal submitted for review", proposal))
}

/// Pull a pending proposal back to draft
pub async fn withdraw_proposal(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    identity: Identity,
) -> ApiResult<Json<SuccessResponse<ProposalResponse>>> {
    let proposal = state.proposals.withdraw(id, identity.id).await?;
    Ok(proposal_response("Proposal withdrawn", proposal))
}

/// Start a new draft from a rejected proposal
pub async fn revise_proposal(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    identity: Identity,
) -> ApiResult<(StatusCode, Json<SuccessResponse<ProposalResponse>>)> {
    let proposal = state.proposals.revise(id, &identity).await?;
    Ok((StatusCode::CREATED, proposal_response("Revision draft created", proposal)))
}

// =============================================================================
// BLOCK ROUTES
// =============================================================================

pub async fn insert_block(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    identity: Identity,
    Json(req): Json<InsertBlockRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<BlockResponse>>)> {
    let (proposal, block) = state
        .proposals
        .edit_blocks(id, identity.id, req.expected_version, |doc| {
            Ok(doc.insert(req.kind, req.content, req.metadata, req.at_index))
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data("Block inserted", BlockResponse { block, proposal })),
    ))
}

pub async fn get_block(
    State(state): State<SharedState>,
    Path((id, block_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<SuccessResponse<Block>>> {
    let proposal = state.proposals.get(id).await?;
    let block = proposal
        .content
        .get(block_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("Block {} not found", block_id)))?;
    Ok(Json(SuccessResponse::with_data("Block retrieved", block)))
}

pub async fn update_block(
    State(state): State<SharedState>,
    Path((id, block_id)): Path<(Uuid, Uuid)>,
    identity: Identity,
    Json(req): Json<UpdateBlockRequest>,
) -> ApiResult<Json<SuccessResponse<BlockResponse>>> {
    if req.content.is_none() && req.metadata.is_none() {
        return Err(AppError::BadRequest(
            "Nothing to update: provide content or metadata".to_string(),
        ));
    }
    let (proposal, block) = state
        .proposals
        .edit_blocks(id, identity.id, req.expected_version, |doc| {
            doc.update(block_id, req.content, req.metadata).cloned()
        })
        .await?;
    Ok(Json(SuccessResponse::with_data("Block updated", BlockResponse { block, proposal })))
}

pub async fn remove_block(
    State(state): State<SharedState>,
    Path((id, block_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<VersionQuery>,
    identity: Identity,
) -> ApiResult<Json<SuccessResponse<BlockResponse>>> {
    let (proposal, block) = state
        .proposals
        .edit_blocks(id, identity.id, query.expected_version, |doc| doc.remove(block_id))
        .await?;
    Ok(Json(SuccessResponse::with_data("Block removed", BlockResponse { block, proposal })))
}

pub async fn move_block(
    State(state): State<SharedState>,
    Path((id, block_id)): Path<(Uuid, Uuid)>,
    identity: Identity,
    Json(req): Json<MoveBlockRequest>,
) -> ApiResult<Json<SuccessResponse<ProposalResponse>>> {
    let (proposal, _) = state
        .proposals
        .edit_blocks(id, identity.id, req.expected_version, |doc| {
            doc.move_block(block_id, req.direction)
        })
        .await?;
    Ok(proposal_response("Block moved", proposal))
}

pub async fn reorder_block(
    State(state): State<SharedState>,
    Path((id, block_id)): Path<(Uuid, Uuid)>,
    identity: Identity,
    Json(req): Json<ReorderBlockRequest>,
) -> ApiResult<Json<SuccessResponse<ProposalResponse>>> {
    let (proposal, _) = state
        .proposals
        .edit_blocks(id, identity.id, req.expected_version, |doc| {
            doc.reorder(block_id, req.before_id)
        })
        .await?;
    Ok(proposal_response("Block reordered", proposal))
}

pub async fn retype_block(
    State(state): State<SharedState>,
    Path((id, block_id)): Path<(Uuid, Uuid)>,
    identity: Identity,
    Json(req): Json<RetypeBlockRequest>,
) -> ApiResult<Json<SuccessResponse<BlockResponse>>> {
    let (proposal, block) = state
        .proposals
        .edit_blocks(id, identity.id, req.expected_version, |doc| {
            doc.retype(block_id, req.kind).cloned()
        })
        .await?;
    Ok(Json(SuccessResponse::with_data("Block retyped", BlockResponse { block, proposal })))
}

// =============================================================================
// VOTING ROUTES
// =============================================================================

/// Approve or reject a pending proposal
pub async fn cast_vote(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    identity: Identity,
    Json(req): Json<VoteRequest>,
) -> ApiResult<Json<SuccessResponse<VoteOutcome>>> {
    let outcome = state
        .consensus
        .cast_vote(id, &identity, req.decision, req.reason)
        .await?;

    let message = match outcome.proposal.status {
        ProposalStatus::Approved => "Vote recorded, proposal approved",
        ProposalStatus::Rejected => "Vote recorded, proposal rejected",
        _ => "Vote recorded",
    };
    Ok(Json(SuccessResponse::with_data(message, outcome)))
}

/// Voting progress against the current roster
pub async fn get_tally(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<TallyResponse>>> {
    let tally = state.consensus.tally(id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("{}/{} approvals", tally.approvals, tally.roster_size),
        TallyResponse { tally },
    )))
}
