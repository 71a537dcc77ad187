//! Proposal data model and lifecycle
//!
//! `draft -> pending -> {approved, rejected}`. Approved and rejected are
//! terminal: content, votes and status never change again. Every transition
//! here validates first and mutates second, so a failed call leaves the
//! proposal untouched.

use crate::error::AppError;
use crate::identity::{Identity, Level};
use crate::tribunal::blocks::BlockDocument;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Proposal status in the governance workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    /// Being edited by its author
    #[default]
    Draft,
    /// Submitted, collecting votes
    Pending,
    /// Unanimously approved, content frozen
    Approved,
    /// Vetoed by a reviewer
    Rejected,
}

impl ProposalStatus {
    pub fn can_edit(self) -> bool {
        matches!(self, ProposalStatus::Draft | ProposalStatus::Pending)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProposalStatus::Draft => "draft",
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Theoretical,
    Practical,
}

/// Author snapshot taken at creation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: Uuid,
    pub name: String,
    pub level: Level,
}

impl From<&Identity> for Author {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            name: identity.name.clone(),
            level: identity.level,
        }
    }
}

/// Recorded decisions. A voter appears in at most one of the two sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Votes {
    pub approvals: BTreeSet<Uuid>,
    pub rejections: BTreeSet<Uuid>,
}

impl Votes {
    pub fn is_empty(&self) -> bool {
        self.approvals.is_empty() && self.rejections.is_empty()
    }

    /// Drop any earlier decision by `voter`
    pub fn clear_voter(&mut self, voter: Uuid) {
        self.approvals.remove(&voter);
        self.rejections.remove(&voter);
    }

    pub fn decision_of(&self, voter: Uuid) -> Option<Decision> {
        if self.approvals.contains(&voter) {
            Some(Decision::Approve)
        } else if self.rejections.contains(&voter) {
            Some(Decision::Reject)
        } else {
            None
        }
    }
}

/// A reviewer's decision on a pending proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

/// Metadata fields an author may change while the proposal is editable
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub target_level: Option<Level>,
}

/// A community lesson awaiting unanimous review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub target_level: Level,
    pub author: Author,
    pub status: ProposalStatus,
    pub content: BlockDocument,
    pub votes: Votes,
    /// Bumped on every committed change
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// SHA-256 of the content as frozen at approval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_checksum: Option<String>,
    /// The rejected proposal this draft was revised from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_of: Option<Uuid>,
}

impl Proposal {
    /// Create a new, empty draft
    pub fn new(
        author: &Identity,
        title: String,
        description: String,
        category: Category,
        target_level: Level,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title,
            description,
            category,
            target_level,
            author: Author::from(author),
            status: ProposalStatus::Draft,
            content: BlockDocument::new(),
            votes: Votes::default(),
            version: 0,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            approved_at: None,
            rejected_at: None,
            rejection_reason: None,
            content_checksum: None,
            revision_of: None,
        }
    }

    pub fn is_author(&self, caller: Uuid) -> bool {
        self.author.id == caller
    }

    fn ensure_author(&self, caller: Uuid, action: &str) -> Result<(), AppError> {
        if self.is_author(caller) {
            Ok(())
        } else {
            Err(AppError::Permission(format!(
                "Only the author may {} proposal {}",
                action, self.id
            )))
        }
    }

    /// Author-only, and only while draft or pending
    pub fn ensure_editable_by(&self, caller: Uuid) -> Result<(), AppError> {
        if !self.status.can_edit() {
            return Err(AppError::State(format!(
                "Proposal {} is {} and can no longer be edited",
                self.id, self.status
            )));
        }
        self.ensure_author(caller, "edit")
    }

    /// Reject a stale optimistic version token
    pub fn ensure_version(&self, expected: Option<u64>) -> Result<(), AppError> {
        match expected {
            Some(v) if v != self.version => Err(AppError::Conflict(format!(
                "Proposal {} is at version {}, request was based on version {}",
                self.id, self.version, v
            ))),
            _ => Ok(()),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Replace the whole content
    pub fn update_content(&mut self, caller: Uuid, content: BlockDocument) -> Result<(), AppError> {
        self.ensure_editable_by(caller)?;
        self.content = content;
        self.touch();
        Ok(())
    }

    /// Apply an in-place edit to the content
    pub fn edit_content<T>(
        &mut self,
        caller: Uuid,
        edit: impl FnOnce(&mut BlockDocument) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        self.ensure_editable_by(caller)?;
        let mut content = self.content.clone();
        let out = edit(&mut content)?;
        self.content = content;
        self.touch();
        Ok(out)
    }

    pub fn update_metadata(&mut self, caller: Uuid, patch: MetadataPatch) -> Result<(), AppError> {
        self.ensure_editable_by(caller)?;
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(level) = patch.target_level {
            self.target_level = level;
        }
        self.touch();
        Ok(())
    }

    /// `draft -> pending`
    pub fn submit(&mut self, caller: Uuid) -> Result<(), AppError> {
        self.ensure_author(caller, "submit")?;
        if self.status != ProposalStatus::Draft {
            return Err(AppError::State(format!(
                "Cannot submit proposal with status {}",
                self.status
            )));
        }

        let mut missing = Vec::new();
        if self.title.trim().is_empty() {
            missing.push("title");
        }
        if self.description.trim().is_empty() {
            missing.push("description");
        }
        if self.content.is_empty() {
            missing.push("at least one content block");
        }
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "Cannot submit proposal without {}",
                missing.join(", ")
            )));
        }

        let now = Utc::now();
        self.status = ProposalStatus::Pending;
        self.submitted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `pending -> draft`; consensus starts fresh on the next submit
    pub fn withdraw(&mut self, caller: Uuid) -> Result<(), AppError> {
        self.ensure_author(caller, "withdraw")?;
        if self.status != ProposalStatus::Pending {
            return Err(AppError::State(format!(
                "Cannot withdraw proposal with status {}",
                self.status
            )));
        }
        self.status = ProposalStatus::Draft;
        self.votes = Votes::default();
        self.submitted_at = None;
        self.touch();
        Ok(())
    }

    pub fn ensure_deletable_by(&self, caller: Uuid) -> Result<(), AppError> {
        if !self.status.can_edit() {
            return Err(AppError::State(format!(
                "Cannot delete proposal with status {}",
                self.status
            )));
        }
        self.ensure_author(caller, "delete")
    }

    /// Start a new draft from a rejected proposal
    pub fn revise(&self, caller: &Identity) -> Result<Proposal, AppError> {
        self.ensure_author(caller.id, "revise")?;
        if self.status != ProposalStatus::Rejected {
            return Err(AppError::State(format!(
                "Only rejected proposals can be revised, {} is {}",
                self.id, self.status
            )));
        }
        let mut draft = Proposal::new(
            caller,
            self.title.clone(),
            self.description.clone(),
            self.category,
            self.target_level,
        );
        draft.content = self.content.with_fresh_ids();
        draft.revision_of = Some(self.id);
        Ok(draft)
    }

    /// Record a rejection and move to the terminal `rejected` state
    pub(crate) fn mark_rejected(&mut self, voter: Uuid, reason: String, at: DateTime<Utc>) {
        self.votes.rejections.insert(voter);
        self.status = ProposalStatus::Rejected;
        self.rejected_at = Some(at);
        self.rejection_reason = Some(reason);
        self.updated_at = at;
    }

    /// Move to the terminal `approved` state, keeping only the approvals of
    /// the roster that resolved it, and freeze the content
    pub(crate) fn mark_approved(&mut self, roster: &BTreeSet<Uuid>, checksum: String, at: DateTime<Utc>) {
        self.votes.approvals = roster.clone();
        self.votes.rejections.clear();
        self.status = ProposalStatus::Approved;
        self.approved_at = Some(at);
        self.content_checksum = Some(checksum);
        self.updated_at = at;
    }

    /// SHA-256 over the serialized block list, in order
    pub fn compute_checksum(&self) -> Result<String, AppError> {
        let bytes = serde_json::to_vec(self.content.blocks())
            .map_err(|e| AppError::Internal(format!("Cannot serialize content: {}", e)))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Lightweight listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSummary {
    pub id: Uuid,
    pub title: String,
    pub status: ProposalStatus,
    pub category: Category,
    pub target_level: Level,
    pub author_name: String,
    pub block_count: usize,
    pub word_count: usize,
    pub approval_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Proposal> for ProposalSummary {
    fn from(p: &Proposal) -> Self {
        Self {
            id: p.id,
            title: p.title.clone(),
            status: p.status,
            category: p.category,
            target_level: p.target_level,
            author_name: p.author.name.clone(),
            block_count: p.content.len(),
            word_count: p.content.word_count(),
            approval_count: p.votes.approvals.len(),
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// Listing filter
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalFilter {
    pub status: Option<ProposalStatus>,
    pub author_id: Option<Uuid>,
    pub category: Option<Category>,
    pub target_level: Option<Level>,
}

impl ProposalFilter {
    pub fn matches(&self, p: &Proposal) -> bool {
        self.status.map_or(true, |s| p.status == s)
            && self.author_id.map_or(true, |a| p.author.id == a)
            && self.category.map_or(true, |c| p.category == c)
            && self.target_level.map_or(true, |l| p.target_level == l)
    }
}
