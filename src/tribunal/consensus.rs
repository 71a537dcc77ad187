//! Consensus engine
//!
//! Applies reviewer votes to pending proposals. A single reject vetoes the
//! proposal immediately; approval needs every member of the roster as it
//! stands at the moment of the approve event. The whole
//! check-and-transition runs while holding the proposal's slot in the store,
//! so two concurrent votes on one proposal can never both miss (or both
//! claim) the resolution.

use crate::error::AppError;
use crate::identity::Identity;
use crate::tribunal::audit::{AuditAction, AuditEntry};
use crate::tribunal::deploy::DeploymentNotifier;
use crate::tribunal::proposal::{Decision, Proposal, ProposalStatus, Votes};
use crate::tribunal::roster::{voter_ids, RosterProvider};
use crate::tribunal::store::ProposalStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Engine knobs
#[derive(Debug, Clone, Copy)]
pub struct ConsensusPolicy {
    /// Whether a proposal's author may vote on it
    pub allow_self_vote: bool,
}

impl Default for ConsensusPolicy {
    fn default() -> Self {
        Self { allow_self_vote: true }
    }
}

/// Where a proposal stands after a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    pub resolution: Resolution,
    pub proposal: Proposal,
}

/// Progress of a pending proposal against the current roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTally {
    pub proposal_id: Uuid,
    pub status: ProposalStatus,
    pub roster_size: usize,
    /// Approvals from voters who are currently on the roster
    pub approvals: usize,
    /// Approvals from voters who have since left the roster
    pub stale_approvals: usize,
    pub rejections: usize,
    /// Roster members who have not approved yet
    pub outstanding: Vec<Uuid>,
    pub unanimous: bool,
}

/// Roster the proposal is judged against
pub fn effective_roster(proposal: &Proposal, eligible: BTreeSet<Uuid>, policy: ConsensusPolicy) -> BTreeSet<Uuid> {
    let mut roster = eligible;
    if !policy.allow_self_vote {
        roster.remove(&proposal.author.id);
    }
    roster
}

/// Every roster member approved and nobody rejected. An empty roster never
/// reaches unanimity.
pub fn is_unanimous(votes: &Votes, roster: &BTreeSet<Uuid>) -> bool {
    !roster.is_empty() && votes.rejections.is_empty() && roster.is_subset(&votes.approvals)
}

/// Apply one vote to `proposal` against `roster`.
///
/// All checks run before anything is mutated, so an error leaves the
/// proposal exactly as it was.
pub fn apply_vote(
    proposal: &mut Proposal,
    voter: Uuid,
    decision: Decision,
    reason: Option<&str>,
    roster: &BTreeSet<Uuid>,
    at: DateTime<Utc>,
) -> Result<Resolution, AppError> {
    if proposal.status != ProposalStatus::Pending {
        return Err(AppError::State(format!(
            "Proposal {} is {}; only pending proposals accept votes",
            proposal.id, proposal.status
        )));
    }
    if !roster.contains(&voter) {
        return Err(AppError::Permission(format!(
            "{} is not an eligible reviewer for proposal {}",
            voter, proposal.id
        )));
    }
    let rejection = match decision {
        Decision::Reject => {
            let reason = reason.map(str::trim).unwrap_or_default();
            if reason.is_empty() {
                return Err(AppError::Validation(
                    "A rejection must include a reason".to_string(),
                ));
            }
            Some(reason.to_string())
        }
        Decision::Approve => None,
    };

    let checksum = match decision {
        Decision::Approve => Some(proposal.compute_checksum()?),
        Decision::Reject => None,
    };

    proposal.votes.clear_voter(voter);

    if let Some(reason) = rejection {
        proposal.mark_rejected(voter, reason, at);
        return Ok(Resolution::Rejected);
    }

    proposal.votes.approvals.insert(voter);
    proposal.updated_at = at;
    match checksum {
        Some(checksum) if is_unanimous(&proposal.votes, roster) => {
            proposal.mark_approved(roster, checksum, at);
            Ok(Resolution::Approved)
        }
        _ => Ok(Resolution::Pending),
    }
}

pub struct ConsensusEngine {
    store: Arc<ProposalStore>,
    roster: Arc<dyn RosterProvider>,
    notifier: Arc<dyn DeploymentNotifier>,
    policy: ConsensusPolicy,
}

impl ConsensusEngine {
    pub fn new(
        store: Arc<ProposalStore>,
        roster: Arc<dyn RosterProvider>,
        notifier: Arc<dyn DeploymentNotifier>,
        policy: ConsensusPolicy,
    ) -> Self {
        Self { store, roster, notifier, policy }
    }

    async fn current_roster(&self, proposal: &Proposal) -> Result<BTreeSet<Uuid>, AppError> {
        let voters = self.roster.eligible_voters().await?;
        debug!(
            proposal_id = %proposal.id,
            lowest_level = ?voters.iter().map(|v| v.level).min(),
            "Roster has {} eligible voters",
            voters.len()
        );
        Ok(effective_roster(proposal, voter_ids(&voters), self.policy))
    }

    /// Cast, replace or switch `voter`'s decision on a pending proposal
    pub async fn cast_vote(
        &self,
        proposal_id: Uuid,
        voter: &Identity,
        decision: Decision,
        reason: Option<String>,
    ) -> Result<VoteOutcome, AppError> {
        let guard = self.store.lock(proposal_id).await?;
        if guard.current().status != ProposalStatus::Pending {
            return Err(AppError::State(format!(
                "Proposal {} is {}; only pending proposals accept votes",
                proposal_id,
                guard.current().status
            )));
        }

        let roster = self.current_roster(guard.current()).await?;
        let previous = guard.current().votes.decision_of(voter.id);
        let mut next = guard.current().clone();
        let resolution = apply_vote(&mut next, voter.id, decision, reason.as_deref(), &roster, Utc::now())?;
        let proposal = guard.commit(next).await?;

        info!(
            proposal_id = %proposal_id,
            voter = %voter.id,
            ?previous,
            ?decision,
            ?resolution,
            "Vote recorded ({}/{} approvals)",
            proposal.votes.approvals.intersection(&roster).count(),
            roster.len()
        );
        self.store
            .audit()
            .record(
                AuditEntry::proposal(AuditAction::VoteCast, proposal_id, voter.id)
                    .with_details(serde_json::json!({ "decision": decision, "reason": reason })),
            )
            .await;

        match resolution {
            Resolution::Approved => {
                self.store
                    .audit()
                    .record(
                        AuditEntry::proposal(AuditAction::ProposalApproved, proposal_id, voter.id)
                            .with_details(serde_json::json!({
                                "approvals": proposal.votes.approvals,
                                "checksum": proposal.content_checksum,
                            })),
                    )
                    .await;
                info!("Proposal '{}' ({}) unanimously approved", proposal.title, proposal_id);
                if let Err(e) = self.notifier.on_approved(&proposal) {
                    warn!("Deployment hand-off for proposal {} failed: {:#}", proposal_id, e);
                }
            }
            Resolution::Rejected => {
                self.store
                    .audit()
                    .record(
                        AuditEntry::proposal(AuditAction::ProposalRejected, proposal_id, voter.id)
                            .with_details(serde_json::json!({ "reason": proposal.rejection_reason })),
                    )
                    .await;
                info!("Proposal '{}' ({}) rejected", proposal.title, proposal_id);
            }
            Resolution::Pending => {}
        }

        Ok(VoteOutcome { resolution, proposal })
    }

    /// Voting progress measured against the live roster
    pub async fn tally(&self, proposal_id: Uuid) -> Result<VoteTally, AppError> {
        let proposal = self.store.get(proposal_id).await?;
        let roster = self.current_roster(&proposal).await?;
        let approvals = &proposal.votes.approvals;

        Ok(VoteTally {
            proposal_id,
            status: proposal.status,
            roster_size: roster.len(),
            approvals: approvals.intersection(&roster).count(),
            stale_approvals: approvals.difference(&roster).count(),
            rejections: proposal.votes.rejections.len(),
            outstanding: roster.difference(approvals).copied().collect(),
            unanimous: is_unanimous(&proposal.votes, &roster),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Level;
    use crate::tribunal::audit::AuditLog;
    use crate::tribunal::blocks::{BlockKind, BlockMetadata};
    use crate::tribunal::deploy::RecordingNotifier;
    use crate::tribunal::proposal::Category;
    use crate::tribunal::repository::MemoryRepository;
    use crate::tribunal::roster::FixedRoster;
    use pretty_assertions::assert_eq;

    struct Fixture {
        store: Arc<ProposalStore>,
        roster: Arc<FixedRoster>,
        notifier: Arc<RecordingNotifier>,
        engine: Arc<ConsensusEngine>,
        author: Identity,
    }

    fn reviewer(name: &str) -> Identity {
        Identity::new(Uuid::new_v4(), name, Level::MAESTRO)
    }

    fn fixture_with(reviewers: &[&Identity], policy: ConsensusPolicy, notifier: RecordingNotifier) -> Fixture {
        let store = Arc::new(ProposalStore::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(AuditLog::new()),
        ));
        let ids: Vec<Uuid> = reviewers.iter().map(|r| r.id).collect();
        let roster = Arc::new(FixedRoster::with(&ids));
        let notifier = Arc::new(notifier);
        let engine = Arc::new(ConsensusEngine::new(
            store.clone(),
            roster.clone(),
            notifier.clone(),
            policy,
        ));
        Fixture {
            store,
            roster,
            notifier,
            engine,
            author: Identity::new(Uuid::new_v4(), "Author", Level::new(5).unwrap()),
        }
    }

    fn fixture(reviewers: &[&Identity]) -> Fixture {
        fixture_with(reviewers, ConsensusPolicy::default(), RecordingNotifier::default())
    }

    async fn pending(f: &Fixture) -> Uuid {
        let p = f
            .store
            .create(&f.author, "Chords".into(), "Triads in root position".into(), Category::Theoretical, Level::new(3).unwrap())
            .await
            .unwrap();
        f.store
            .edit_blocks(p.id, f.author.id, None, |doc| {
                Ok(doc.insert(BlockKind::Text, "A triad stacks two thirds.", BlockMetadata::new(), None))
            })
            .await
            .unwrap();
        f.store.submit(p.id, f.author.id).await.unwrap();
        p.id
    }

    async fn approve(f: &Fixture, id: Uuid, who: &Identity) -> Result<VoteOutcome, AppError> {
        f.engine.cast_vote(id, who, Decision::Approve, None).await
    }

    async fn reject(f: &Fixture, id: Uuid, who: &Identity, reason: &str) -> Result<VoteOutcome, AppError> {
        f.engine.cast_vote(id, who, Decision::Reject, Some(reason.to_string())).await
    }

    #[tokio::test]
    async fn test_unanimous_approval_after_last_vote() {
        let (a, b, c) = (reviewer("A"), reviewer("B"), reviewer("C"));
        let f = fixture(&[&a, &b, &c]);
        let id = pending(&f).await;

        assert_eq!(approve(&f, id, &a).await.unwrap().resolution, Resolution::Pending);
        assert_eq!(approve(&f, id, &b).await.unwrap().resolution, Resolution::Pending);
        let outcome = approve(&f, id, &c).await.unwrap();
        assert_eq!(outcome.resolution, Resolution::Approved);

        let p = f.store.get(id).await.unwrap();
        assert_eq!(p.status, ProposalStatus::Approved);
        assert!(p.approved_at.is_some());
        assert_eq!(p.votes.approvals, BTreeSet::from([a.id, b.id, c.id]));
        assert!(p.votes.rejections.is_empty());
        assert_eq!(p.content_checksum, Some(p.compute_checksum().unwrap()));
        assert_eq!(*f.notifier.delivered.lock().unwrap(), vec![id]);

        // content is frozen
        let err = f
            .store
            .edit_blocks(id, f.author.id, None, |doc| {
                Ok(doc.insert(BlockKind::Text, "late", BlockMetadata::new(), None))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::State(_)));
    }

    #[tokio::test]
    async fn test_reject_is_immediate_veto() {
        let (a, b, c) = (reviewer("A"), reviewer("B"), reviewer("C"));
        let f = fixture(&[&a, &b, &c]);
        let id = pending(&f).await;

        approve(&f, id, &a).await.unwrap();
        let outcome = reject(&f, id, &b, "incomplete").await.unwrap();
        assert_eq!(outcome.resolution, Resolution::Rejected);

        let p = f.store.get(id).await.unwrap();
        assert_eq!(p.status, ProposalStatus::Rejected);
        assert_eq!(p.rejection_reason.as_deref(), Some("incomplete"));
        assert!(p.rejected_at.is_some());

        let err = approve(&f, id, &c).await.unwrap_err();
        assert!(matches!(err, AppError::State(_)));
        assert!(f.notifier.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_veto_with_all_but_one_approved() {
        let reviewers: Vec<Identity> = (0..5).map(|i| reviewer(&format!("R{}", i))).collect();
        let refs: Vec<&Identity> = reviewers.iter().collect();
        let f = fixture(&refs);
        let id = pending(&f).await;

        for r in &reviewers[..4] {
            approve(&f, id, r).await.unwrap();
        }
        let outcome = reject(&f, id, &reviewers[4], "audio examples missing").await.unwrap();
        assert_eq!(outcome.resolution, Resolution::Rejected);
    }

    #[tokio::test]
    async fn test_no_double_resolution() {
        let a = reviewer("A");
        let f = fixture(&[&a]);
        let id = pending(&f).await;
        approve(&f, id, &a).await.unwrap();
        let before = f.store.get(id).await.unwrap();

        assert!(matches!(approve(&f, id, &a).await, Err(AppError::State(_))));
        assert!(matches!(reject(&f, id, &a, "changed my mind").await, Err(AppError::State(_))));
        assert_eq!(f.store.get(id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_roster_growth_requires_new_voter() {
        let (a, b, c) = (reviewer("A"), reviewer("B"), reviewer("C"));
        let f = fixture(&[&a, &b]);
        let id = pending(&f).await;

        approve(&f, id, &a).await.unwrap();
        f.roster.add(c.id);
        assert_eq!(approve(&f, id, &b).await.unwrap().resolution, Resolution::Pending);

        let tally = f.engine.tally(id).await.unwrap();
        assert_eq!(tally.outstanding, vec![c.id]);
        assert!(!tally.unanimous);

        assert_eq!(approve(&f, id, &c).await.unwrap().resolution, Resolution::Approved);
    }

    #[tokio::test]
    async fn test_stale_approval_does_not_count() {
        let (a, b, c) = (reviewer("A"), reviewer("B"), reviewer("C"));
        let f = fixture(&[&a, &b]);
        let id = pending(&f).await;

        approve(&f, id, &a).await.unwrap();
        f.roster.drop_voter(a.id);
        f.roster.add(c.id);

        let tally = f.engine.tally(id).await.unwrap();
        assert_eq!(tally.approvals, 0);
        assert_eq!(tally.stale_approvals, 1);

        assert_eq!(approve(&f, id, &b).await.unwrap().resolution, Resolution::Pending);
        let outcome = approve(&f, id, &c).await.unwrap();
        assert_eq!(outcome.resolution, Resolution::Approved);
        // approvals equal the roster that resolved it
        assert_eq!(outcome.proposal.votes.approvals, BTreeSet::from([b.id, c.id]));
    }

    #[tokio::test]
    async fn test_roster_shrink_can_complete_unanimity() {
        let (a, b) = (reviewer("A"), reviewer("B"));
        let f = fixture(&[&a, &b]);
        let id = pending(&f).await;

        f.roster.drop_voter(b.id);
        assert_eq!(approve(&f, id, &a).await.unwrap().resolution, Resolution::Approved);
    }

    #[tokio::test]
    async fn test_empty_roster_never_approves() {
        let f = fixture(&[]);
        let id = pending(&f).await;
        let outsider = reviewer("X");
        assert!(matches!(approve(&f, id, &outsider).await, Err(AppError::Permission(_))));
        assert_eq!(f.store.get(id).await.unwrap().status, ProposalStatus::Pending);
        assert!(!f.engine.tally(id).await.unwrap().unanimous);
    }

    #[tokio::test]
    async fn test_revote_switches_membership() {
        let (a, b) = (reviewer("A"), reviewer("B"));
        let f = fixture(&[&a, &b]);
        let id = pending(&f).await;

        approve(&f, id, &a).await.unwrap();
        approve(&f, id, &a).await.unwrap();
        let p = f.store.get(id).await.unwrap();
        assert_eq!(p.votes.approvals.len(), 1);
        assert_eq!(p.status, ProposalStatus::Pending);

        reject(&f, id, &a, "needs exercises").await.unwrap();
        let p = f.store.get(id).await.unwrap();
        assert!(!p.votes.approvals.contains(&a.id));
        assert!(p.votes.rejections.contains(&a.id));
        assert_eq!(p.votes.decision_of(a.id), Some(Decision::Reject));
    }

    #[tokio::test]
    async fn test_vote_preconditions() {
        let a = reviewer("A");
        let f = fixture(&[&a]);
        let draft = f
            .store
            .create(&f.author, "t".into(), "d".into(), Category::Practical, Level::MIN)
            .await
            .unwrap();
        assert!(matches!(approve(&f, draft.id, &a).await, Err(AppError::State(_))));

        let id = pending(&f).await;
        assert!(matches!(approve(&f, id, &reviewer("Z")).await, Err(AppError::Permission(_))));
        assert!(matches!(reject(&f, id, &a, "   ").await, Err(AppError::Validation(_))));
        assert!(matches!(
            f.engine.cast_vote(id, &a, Decision::Reject, None).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(approve(&f, Uuid::new_v4(), &a).await, Err(AppError::NotFound(_))));

        let p = f.store.get(id).await.unwrap();
        assert!(p.votes.is_empty());
        assert_eq!(p.status, ProposalStatus::Pending);
    }

    #[tokio::test]
    async fn test_self_vote_policy() {
        let a = reviewer("A");
        let f = fixture_with(&[&a], ConsensusPolicy { allow_self_vote: false }, RecordingNotifier::default());
        f.roster.add(f.author.id);
        let id = pending(&f).await;

        let err = approve(&f, id, &f.author).await.unwrap_err();
        assert!(matches!(err, AppError::Permission(_)));
        // the author is not needed for unanimity either
        assert_eq!(approve(&f, id, &a).await.unwrap().resolution, Resolution::Approved);
    }

    #[tokio::test]
    async fn test_self_vote_allowed_by_default() {
        let a = reviewer("A");
        let f = fixture(&[&a]);
        f.roster.add(f.author.id);
        let id = pending(&f).await;
        let author = f.author.clone();
        assert_eq!(approve(&f, id, &author).await.unwrap().resolution, Resolution::Pending);
        assert_eq!(approve(&f, id, &a).await.unwrap().resolution, Resolution::Approved);
    }

    #[tokio::test]
    async fn test_notifier_failure_keeps_approval() {
        let a = reviewer("A");
        let f = fixture_with(
            &[&a],
            ConsensusPolicy::default(),
            RecordingNotifier { fail: true, ..Default::default() },
        );
        let id = pending(&f).await;
        let outcome = approve(&f, id, &a).await.unwrap();
        assert_eq!(outcome.resolution, Resolution::Approved);
        assert_eq!(f.store.get(id).await.unwrap().status, ProposalStatus::Approved);
        assert_eq!(f.notifier.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_withdraw_resets_consensus() {
        let (a, b) = (reviewer("A"), reviewer("B"));
        let f = fixture(&[&a, &b]);
        let id = pending(&f).await;
        approve(&f, id, &a).await.unwrap();

        f.store.withdraw(id, f.author.id).await.unwrap();
        f.store.submit(id, f.author.id).await.unwrap();
        assert_eq!(approve(&f, id, &b).await.unwrap().resolution, Resolution::Pending);
        assert_eq!(f.engine.tally(id).await.unwrap().outstanding, vec![a.id]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_final_approvals_resolve_once() {
        let reviewers: Vec<Identity> = (0..16).map(|i| reviewer(&format!("R{}", i))).collect();
        let refs: Vec<&Identity> = reviewers.iter().collect();
        let f = fixture(&refs);
        let id = pending(&f).await;

        let mut handles = Vec::new();
        for r in reviewers.clone() {
            let engine = f.engine.clone();
            handles.push(tokio::spawn(async move {
                engine.cast_vote(id, &r, Decision::Approve, None).await
            }));
        }
        let mut approved = 0;
        for h in handles {
            if h.await.unwrap().unwrap().resolution == Resolution::Approved {
                approved += 1;
            }
        }

        assert_eq!(approved, 1);
        assert_eq!(f.store.get(id).await.unwrap().status, ProposalStatus::Approved);
        assert_eq!(f.notifier.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reject_and_final_approve_agree() {
        let (a, b, c) = (reviewer("A"), reviewer("B"), reviewer("C"));
        let f = fixture(&[&a, &b, &c]);
        let id = pending(&f).await;
        approve(&f, id, &a).await.unwrap();

        let (e1, e2) = (f.engine.clone(), f.engine.clone());
        let (b2, c2) = (b.clone(), c.clone());
        let approve_task = tokio::spawn(async move { e1.cast_vote(id, &b2, Decision::Approve, None).await });
        let reject_task = tokio::spawn(async move {
            e2.cast_vote(id, &c2, Decision::Reject, Some("wrong voicing".into())).await
        });
        let approve_res = approve_task.await.unwrap();
        let reject_res = reject_task.await.unwrap();

        let p = f.store.get(id).await.unwrap();
        // C never approved, so the only reachable terminal state is rejected
        assert_eq!(p.status, ProposalStatus::Rejected);
        assert!(reject_res.is_ok());
        match approve_res {
            Ok(outcome) => assert_eq!(outcome.resolution, Resolution::Pending),
            Err(e) => assert!(matches!(e, AppError::State(_))),
        }
    }

    #[test]
    fn test_apply_vote_is_all_or_nothing() {
        let author = Identity::new(Uuid::new_v4(), "Au", Level::MIN);
        let mut p = Proposal::new(&author, "t".into(), "d".into(), Category::Practical, Level::MIN);
        p.status = ProposalStatus::Pending;
        p.votes.approvals.insert(Uuid::new_v4());
        let before = p.clone();
        let roster = BTreeSet::from([Uuid::new_v4()]);

        let outsider = Uuid::new_v4();
        assert!(apply_vote(&mut p, outsider, Decision::Approve, None, &roster, Utc::now()).is_err());
        assert_eq!(p, before);
    }
}
