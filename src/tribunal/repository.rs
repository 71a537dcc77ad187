//! Proposal persistence
//!
//! The store only needs `load`, `commit` and `remove`, and `commit` must be
//! atomic per proposal id. Backends:
//! - `MemoryRepository`: process-local map, for tests and ephemeral runs
//! - `JsonFileRepository`: one `<id>.json` per proposal in a directory

use crate::error::AppError;
use crate::tribunal::proposal::Proposal;
use std::collections::HashMap;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, error};
use uuid::Uuid;

pub type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send + 'a>>;

/// Opaque proposal persistence.
///
/// Methods return `Pin<Box<dyn Future>>` so the store can hold an
/// `Arc<dyn ProposalRepository>`.
pub trait ProposalRepository: Send + Sync {
    /// Every stored proposal
    fn load(&self) -> RepoFuture<'_, Vec<Proposal>>;

    /// Insert or replace one proposal, atomically
    fn commit<'a>(&'a self, proposal: &'a Proposal) -> RepoFuture<'a, ()>;

    /// Drop a proposal; removing an unknown id is not an error
    fn remove(&self, id: Uuid) -> RepoFuture<'_, ()>;
}

// =============================================================================
// MEMORY
// =============================================================================

#[derive(Default)]
pub struct MemoryRepository {
    records: Mutex<HashMap<Uuid, Proposal>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Proposal>>, AppError> {
        self.records
            .lock()
            .map_err(|_| AppError::Internal("proposal repository lock poisoned".to_string()))
    }
}

impl ProposalRepository for MemoryRepository {
    fn load(&self) -> RepoFuture<'_, Vec<Proposal>> {
        Box::pin(async move { Ok(self.records()?.values().cloned().collect()) })
    }

    fn commit<'a>(&'a self, proposal: &'a Proposal) -> RepoFuture<'a, ()> {
        Box::pin(async move {
            self.records()?.insert(proposal.id, proposal.clone());
            Ok(())
        })
    }

    fn remove(&self, id: Uuid) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            self.records()?.remove(&id);
            Ok(())
        })
    }
}

// =============================================================================
// JSON FILES
// =============================================================================

/// Directory of `<id>.json` records.
///
/// A commit writes a synced temp file in the same directory and renames it
/// over the record, so a reader never sees a half-written proposal. A record
/// that fails to parse stops `load` instead of being dropped.
pub struct JsonFileRepository {
    dir: PathBuf,
}

impl JsonFileRepository {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

impl ProposalRepository for JsonFileRepository {
    fn load(&self) -> RepoFuture<'_, Vec<Proposal>> {
        Box::pin(async move {
            let mut proposals = Vec::new();
            let mut entries = tokio::fs::read_dir(&self.dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let bytes = tokio::fs::read(&path).await?;
                let proposal = serde_json::from_slice::<Proposal>(&bytes).map_err(|e| {
                    error!("Unreadable proposal record {}: {}", path.display(), e);
                    AppError::Storage(format!(
                        "Unreadable proposal record {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                proposals.push(proposal);
            }
            debug!("Loaded {} proposals from {}", proposals.len(), self.dir.display());
            Ok(proposals)
        })
    }

    fn commit<'a>(&'a self, proposal: &'a Proposal) -> RepoFuture<'a, ()> {
        Box::pin(async move {
            let bytes = serde_json::to_vec_pretty(proposal)?;
            let dir = self.dir.clone();
            let path = self.record_path(proposal.id);
            tokio::task::spawn_blocking(move || write_record(&dir, &path, &bytes))
                .await
                .map_err(|e| AppError::Internal(format!("Record writer task failed: {}", e)))??;
            Ok(())
        })
    }

    fn remove(&self, id: Uuid) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.record_path(id)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// Temp file + fsync + rename, then a best-effort sync of the directory
fn write_record(dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    #[cfg(unix)]
    if let Err(e) = std::fs::File::open(dir).and_then(|d| d.sync_all()) {
        debug!("Directory sync of {} failed: {}", dir.display(), e);
    }
    Ok(())
}
