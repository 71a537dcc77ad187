//! Member registry
//!
//! Tracks platform members and their levels. Members at or above the
//! reviewer level form the voting roster.

use crate::error::AppError;
use crate::identity::Level;
use crate::tribunal::roster::{RosterFuture, RosterProvider, Voter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Member model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: Uuid,
    pub name: String,
    pub level: Level,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory member store
pub struct MemberStore {
    members: Arc<RwLock<HashMap<Uuid, Member>>>,
    reviewer_level: Level,
}

impl MemberStore {
    pub fn new(reviewer_level: Level) -> Self {
        Self {
            members: Arc::new(RwLock::new(HashMap::new())),
            reviewer_level,
        }
    }

    pub fn reviewer_level(&self) -> Level {
        self.reviewer_level
    }

    /// Register a member or update their name and level
    pub async fn upsert(&self, id: Uuid, name: String, level: Level) -> Member {
        let mut members = self.members.write().await;
        let now = Utc::now();
        let member = members
            .entry(id)
            .and_modify(|m| {
                m.name = name.clone();
                m.level = level;
                m.updated_at = now;
            })
            .or_insert_with(|| Member {
                id,
                name: name.clone(),
                level,
                created_at: now,
                updated_at: now,
            })
            .clone();
        info!("Member {} ({}) now at level {}", member.name, id, level);
        member
    }

    pub async fn find_by_id(&self, id: Uuid) -> Option<Member> {
        let members = self.members.read().await;
        members.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<Member> {
        let members = self.members.read().await;
        let mut list: Vec<Member> = members.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Members currently eligible to review
    pub async fn reviewers(&self) -> Vec<Member> {
        self.list()
            .await
            .into_iter()
            .filter(|m| m.level >= self.reviewer_level)
            .collect()
    }

    pub async fn remove(&self, id: Uuid) -> Result<Member, AppError> {
        let mut members = self.members.write().await;
        members
            .remove(&id)
            .ok_or_else(|| AppError::NotFound(format!("Member {} not found", id)))
    }
}

impl RosterProvider for MemberStore {
    fn eligible_voters(&self) -> RosterFuture<'_> {
        Box::pin(async move {
            Ok(self
                .reviewers()
                .await
                .into_iter()
                .map(|m| Voter { voter_id: m.id, level: m.level })
                .collect())
        })
    }
}
