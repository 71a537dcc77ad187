//! Audit log
//!
//! Append-only record of proposal lifecycle events, kept in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ProposalCreated,
    ProposalUpdated,
    ProposalSubmitted,
    ProposalWithdrawn,
    ProposalDeleted,
    ProposalRevised,
    VoteCast,
    ProposalApproved,
    ProposalRejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<Uuid>,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn proposal(action: AuditAction, proposal_id: Uuid, user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: Some(user_id),
            action,
            resource_type: "proposal".to_string(),
            resource_id: Some(proposal_id),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Default)]
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, entry: AuditEntry) {
        let mut log = self.entries.write().await;
        log.push(entry);
    }

    /// Most recent first
    pub async fn entries(&self, resource_id: Option<Uuid>, limit: usize) -> Vec<AuditEntry> {
        let log = self.entries.read().await;
        log.iter()
            .rev()
            .filter(|e| resource_id.map_or(true, |id| e.resource_id == Some(id)))
            .take(limit)
            .cloned()
            .collect()
    }
}
