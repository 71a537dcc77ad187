//! Tribunal - content governance
//!
//! Senior members author structured lessons; a lesson is published only
//! after every eligible reviewer approves it. Any single rejection vetoes it.

pub mod audit;
pub mod blocks;
pub mod consensus;
pub mod deploy;
pub mod proposal;
pub mod repository;
pub mod roster;
pub mod store;

pub use audit::AuditLog;
pub use consensus::{ConsensusEngine, ConsensusPolicy};
pub use deploy::TracingNotifier;
pub use repository::{JsonFileRepository, MemoryRepository, ProposalRepository};
pub use store::ProposalStore;
