//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::config::TribunalConfig;
use crate::error::AppError;
use crate::members::MemberStore;
use crate::tribunal::{
    AuditLog, ConsensusEngine, ConsensusPolicy, JsonFileRepository, MemoryRepository,
    ProposalRepository, ProposalStore, TracingNotifier,
};
use std::sync::Arc;
use tracing::info;

/// Application state shared across all handlers
pub struct AppState {
    /// Member registry, also the voting roster
    pub members: Arc<MemberStore>,

    /// Proposal records (has internal per-proposal locking)
    pub proposals: Arc<ProposalStore>,

    /// Vote processing
    pub consensus: ConsensusEngine,

    /// Lifecycle audit trail
    pub audit: Arc<AuditLog>,
}

impl AppState {
    /// Wire the stores and the engine from configuration
    pub async fn new(config: &TribunalConfig) -> Result<Self, AppError> {
        let repo: Arc<dyn ProposalRepository> = match &config.data_dir {
            Some(dir) => {
                info!("Persisting proposals under {}", dir.display());
                Arc::new(JsonFileRepository::open(dir).await?)
            }
            None => {
                info!("No TRIBUNAL_DATA_DIR set, proposals are kept in memory");
                Arc::new(MemoryRepository::new())
            }
        };
        Self::with_repository(repo, config).await
    }

    pub async fn with_repository(
        repo: Arc<dyn ProposalRepository>,
        config: &TribunalConfig,
    ) -> Result<Self, AppError> {
        let audit = Arc::new(AuditLog::new());
        let proposals = Arc::new(ProposalStore::load(repo, audit.clone()).await?);
        let members = Arc::new(MemberStore::new(config.reviewer_level));
        let consensus = ConsensusEngine::new(
            proposals.clone(),
            members.clone(),
            Arc::new(TracingNotifier),
            ConsensusPolicy {
                allow_self_vote: config.allow_self_vote,
            },
        );

        Ok(Self {
            members,
            proposals,
            consensus,
            audit,
        })
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
