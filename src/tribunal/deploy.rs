//! Deployment hand-off
//!
//! Approved proposals are passed on once, after the approval is committed.
//! The hand-off is best effort: its failures are logged by the engine and
//! never undo an approval.

use crate::tribunal::proposal::Proposal;
use tracing::info;

pub trait DeploymentNotifier: Send + Sync {
    fn on_approved(&self, proposal: &Proposal) -> anyhow::Result<()>;
}

/// Logs the hand-off; the consuming views pick approved lessons up from storage
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl DeploymentNotifier for TracingNotifier {
    fn on_approved(&self, proposal: &Proposal) -> anyhow::Result<()> {
        info!(
            proposal_id = %proposal.id,
            target_level = %proposal.target_level,
            checksum = proposal.content_checksum.as_deref().unwrap_or(""),
            "Lesson '{}' approved and ready for deployment",
            proposal.title
        );
        Ok(())
    }
}

/// Records every hand-off, optionally failing
#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
    pub delivered: std::sync::Mutex<Vec<uuid::Uuid>>,
    pub fail: bool,
}

#[cfg(test)]
impl DeploymentNotifier for RecordingNotifier {
    fn on_approved(&self, proposal: &Proposal) -> anyhow::Result<()> {
        self.delivered.lock().unwrap().push(proposal.id);
        if self.fail {
            anyhow::bail!("deployment target unavailable");
        }
        Ok(())
    }
}
