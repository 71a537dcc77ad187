//! Proposal storage
//!
//! Owns every proposal record. Each proposal lives in its own async mutex
//! slot; all writers for one id go through that slot, so mutations of a
//! single proposal are serialized while different proposals proceed in
//! parallel. A mutation works on a copy, commits it to the repository and
//! only then publishes it, which keeps failed operations side-effect free.

use crate::error::{proposal_not_found, AppError};
use crate::identity::{Identity, Level};
use crate::tribunal::audit::{AuditAction, AuditEntry, AuditLog};
use crate::tribunal::blocks::{Block, BlockDocument};
use crate::tribunal::proposal::{Category, MetadataPatch, Proposal, ProposalFilter};
use crate::tribunal::repository::ProposalRepository;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

type Slot = Arc<Mutex<Proposal>>;

/// Thread-safe proposal store backed by a repository
pub struct ProposalStore {
    repo: Arc<dyn ProposalRepository>,
    slots: RwLock<HashMap<Uuid, Slot>>,
    audit: Arc<AuditLog>,
}

/// Exclusive access to one proposal until dropped or committed
pub struct ProposalGuard<'a> {
    store: &'a ProposalStore,
    guard: OwnedMutexGuard<Proposal>,
}

impl ProposalGuard<'_> {
    pub fn current(&self) -> &Proposal {
        &self.guard
    }

    /// Persist `next` and make it the visible state
    pub async fn commit(mut self, mut next: Proposal) -> Result<Proposal, AppError> {
        if next.id != self.guard.id {
            return Err(AppError::Internal(format!(
                "commit for {} issued through guard of {}",
                next.id, self.guard.id
            )));
        }
        next.version = self.guard.version + 1;
        self.store.repo.commit(&next).await?;
        *self.guard = next.clone();
        debug!("Committed proposal {} at version {}", next.id, next.version);
        Ok(next)
    }

    /// Remove the proposal from the repository and the store
    async fn delete(self) -> Result<Proposal, AppError> {
        let id = self.guard.id;
        self.store.repo.remove(id).await?;
        self.store.slots.write().await.remove(&id);
        Ok(self.guard.clone())
    }
}

impl ProposalStore {
    pub fn new(repo: Arc<dyn ProposalRepository>, audit: Arc<AuditLog>) -> Self {
        Self {
            repo,
            slots: RwLock::new(HashMap::new()),
            audit,
        }
    }

    /// Build a store primed with everything the repository holds
    pub async fn load(repo: Arc<dyn ProposalRepository>, audit: Arc<AuditLog>) -> Result<Self, AppError> {
        let proposals = repo.load().await?;
        let store = Self::new(repo, audit);
        {
            let mut slots = store.slots.write().await;
            for p in proposals {
                slots.insert(p.id, Arc::new(Mutex::new(p)));
            }
            info!("Proposal store primed with {} records", slots.len());
        }
        Ok(store)
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Acquire the slot of `id` for exclusive use
    pub async fn lock(&self, id: Uuid) -> Result<ProposalGuard<'_>, AppError> {
        let slot = {
            let slots = self.slots.read().await;
            slots.get(&id).cloned().ok_or_else(|| proposal_not_found(id))?
        };
        let guard = slot.clone().lock_owned().await;

        // deleted while we were waiting
        let still_live = self
            .slots
            .read()
            .await
            .get(&id)
            .is_some_and(|live| Arc::ptr_eq(live, &slot));
        if !still_live {
            return Err(proposal_not_found(id));
        }

        Ok(ProposalGuard { store: self, guard })
    }

    /// Apply `f` to a copy of the proposal and commit it if `f` succeeds
    pub async fn mutate<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Proposal) -> Result<T, AppError>,
    ) -> Result<(Proposal, T), AppError> {
        let guard = self.lock(id).await?;
        let mut next = guard.current().clone();
        let out = f(&mut next)?;
        let committed = guard.commit(next).await?;
        Ok((committed, out))
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub async fn get(&self, id: Uuid) -> Result<Proposal, AppError> {
        let slot = {
            let slots = self.slots.read().await;
            slots.get(&id).cloned().ok_or_else(|| proposal_not_found(id))?
        };
        let proposal = slot.lock().await;
        Ok(proposal.clone())
    }

    pub async fn list(&self, filter: &ProposalFilter) -> Vec<Proposal> {
        let slots: Vec<Slot> = self.slots.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            let p = slot.lock().await;
            if filter.matches(&p) {
                out.push(p.clone());
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub async fn count(&self) -> usize {
        self.slots.read().await.len()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Create a new empty draft
    pub async fn create(
        &self,
        author: &Identity,
        title: String,
        description: String,
        category: Category,
        target_level: Level,
    ) -> Result<Proposal, AppError> {
        let proposal = Proposal::new(author, title, description, category, target_level);
        self.insert(proposal).await
    }

    async fn insert(&self, proposal: Proposal) -> Result<Proposal, AppError> {
        self.repo.commit(&proposal).await?;
        self.slots
            .write()
            .await
            .insert(proposal.id, Arc::new(Mutex::new(proposal.clone())));

        self.audit
            .record(
                AuditEntry::proposal(AuditAction::ProposalCreated, proposal.id, proposal.author.id)
                    .with_details(serde_json::json!({
                        "title": proposal.title,
                        "revisionOf": proposal.revision_of,
                    })),
            )
            .await;
        info!("Created proposal '{}' (id: {})", proposal.title, proposal.id);
        Ok(proposal)
    }

    /// Replace the full block list
    pub async fn update_content(
        &self,
        id: Uuid,
        caller: Uuid,
        blocks: Vec<Block>,
        expected_version: Option<u64>,
    ) -> Result<Proposal, AppError> {
        let content = BlockDocument::from_blocks(blocks)?;
        let (proposal, _) = self
            .mutate(id, |p| {
                p.ensure_version(expected_version)?;
                p.update_content(caller, content)
            })
            .await?;
        self.record_update(&proposal, caller, "content").await;
        Ok(proposal)
    }

    /// Run a block-level edit (insert, move, retype...) against the content
    pub async fn edit_blocks<T>(
        &self,
        id: Uuid,
        caller: Uuid,
        expected_version: Option<u64>,
        edit: impl FnOnce(&mut BlockDocument) -> Result<T, AppError>,
    ) -> Result<(Proposal, T), AppError> {
        let (proposal, out) = self
            .mutate(id, |p| {
                p.ensure_version(expected_version)?;
                p.edit_content(caller, edit)
            })
            .await?;
        self.record_update(&proposal, caller, "blocks").await;
        Ok((proposal, out))
    }

    pub async fn update_metadata(
        &self,
        id: Uuid,
        caller: Uuid,
        patch: MetadataPatch,
        expected_version: Option<u64>,
    ) -> Result<Proposal, AppError> {
        let (proposal, _) = self
            .mutate(id, |p| {
                p.ensure_version(expected_version)?;
                p.update_metadata(caller, patch)
            })
            .await?;
        self.record_update(&proposal, caller, "metadata").await;
        Ok(proposal)
    }

    async fn record_update(&self, proposal: &Proposal, caller: Uuid, part: &str) {
        self.audit
            .record(
                AuditEntry::proposal(AuditAction::ProposalUpdated, proposal.id, caller)
                    .with_details(serde_json::json!({ "part": part, "version": proposal.version })),
            )
            .await;
    }

    /// `draft -> pending`
    pub async fn submit(&self, id: Uuid, caller: Uuid) -> Result<Proposal, AppError> {
        let (proposal, _) = self.mutate(id, |p| p.submit(caller)).await?;
        self.audit
            .record(AuditEntry::proposal(AuditAction::ProposalSubmitted, id, caller))
            .await;
        info!("Proposal {} submitted for review", id);
        Ok(proposal)
    }

    /// `pending -> draft`, clearing all votes
    pub async fn withdraw(&self, id: Uuid, caller: Uuid) -> Result<Proposal, AppError> {
        let (proposal, had_votes) = self
            .mutate(id, |p| {
                let had_votes = !p.votes.is_empty();
                p.withdraw(caller)?;
                Ok(had_votes)
            })
            .await?;
        self.audit
            .record(
                AuditEntry::proposal(AuditAction::ProposalWithdrawn, id, caller)
                    .with_details(serde_json::json!({ "votesDiscarded": had_votes })),
            )
            .await;
        info!("Proposal {} withdrawn to draft", id);
        Ok(proposal)
    }

    /// Delete a draft or pending proposal (author only)
    pub async fn delete(&self, id: Uuid, caller: Uuid) -> Result<(), AppError> {
        let guard = self.lock(id).await?;
        guard.current().ensure_deletable_by(caller)?;
        let removed = guard.delete().await?;
        self.audit
            .record(
                AuditEntry::proposal(AuditAction::ProposalDeleted, id, caller)
                    .with_details(serde_json::json!({ "title": removed.title })),
            )
            .await;
        info!("Deleted proposal '{}' (id: {})", removed.title, id);
        Ok(())
    }

    /// New draft seeded from a rejected proposal
    pub async fn revise(&self, id: Uuid, caller: &Identity) -> Result<Proposal, AppError> {
        let draft = {
            let guard = self.lock(id).await?;
            guard.current().revise(caller)?
        };
        let draft = self.insert(draft).await?;
        self.audit
            .record(
                AuditEntry::proposal(AuditAction::ProposalRevised, id, caller.id)
                    .with_details(serde_json::json!({ "draftId": draft.id })),
            )
            .await;
        Ok(draft)
    }
}
