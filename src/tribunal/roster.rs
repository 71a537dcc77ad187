//! Roster provider
//!
//! Single source of "who counts as a voter". The consensus engine and the
//! tally report both read it fresh on every evaluation; nothing caches it.

use crate::error::AppError;
use crate::identity::Level;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// An eligible voter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voter {
    pub voter_id: Uuid,
    pub level: Level,
}

pub type RosterFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Voter>, AppError>> + Send + 'a>>;

pub trait RosterProvider: Send + Sync {
    /// The set of accounts currently eligible to vote
    fn eligible_voters(&self) -> RosterFuture<'_>;
}

/// Voter ids of a roster
pub fn voter_ids(voters: &[Voter]) -> BTreeSet<Uuid> {
    voters.iter().map(|v| v.voter_id).collect()
}

/// Roster whose membership the test drives directly
#[cfg(test)]
#[derive(Default)]
pub struct FixedRoster {
    voters: std::sync::Mutex<Vec<Voter>>,
}

#[cfg(test)]
impl FixedRoster {
    pub fn with(ids: &[Uuid]) -> Self {
        let roster = Self::default();
        for id in ids {
            roster.add(*id);
        }
        roster
    }

    pub fn add(&self, id: Uuid) {
        self.voters.lock().unwrap().push(Voter { voter_id: id, level: Level::MAESTRO });
    }

    pub fn drop_voter(&self, id: Uuid) {
        self.voters.lock().unwrap().retain(|v| v.voter_id != id);
    }
}

#[cfg(test)]
impl RosterProvider for FixedRoster {
    fn eligible_voters(&self) -> RosterFuture<'_> {
        let voters = self.voters.lock().unwrap().clone();
        Box::pin(async move { Ok(voters) })
    }
}
