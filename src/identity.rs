//! Caller identity
//!
//! Identity issuance lives outside this service. Whatever sits in front of it
//! (gateway, session layer) forwards the caller as `x-user-*` headers, and the
//! values are trusted as-is.

use crate::error::AppError;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_LEVEL_HEADER: &str = "x-user-level";

/// Member level on the platform (1..=6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Level(u8);

impl Level {
    pub const MIN: Level = Level(1);
    /// Highest level; reviewers sit here by default
    pub const MAESTRO: Level = Level(6);

    pub fn new(value: u8) -> Result<Self, AppError> {
        if (Self::MIN.0..=Self::MAESTRO.0).contains(&value) {
            Ok(Level(value))
        } else {
            Err(AppError::Validation(format!(
                "Level must be between {} and {}, got {}",
                Self::MIN.0,
                Self::MAESTRO.0,
                value
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Level {
    type Error = AppError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Level::new(value)
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> Self {
        level.0
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The calling user, as supplied by the identity context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: Uuid,
    pub name: String,
    pub level: Level,
}

impl Identity {
    pub fn new(id: Uuid, name: impl Into<String>, level: Level) -> Self {
        Self { id, name: name.into(), level }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthorized(format!("Missing {} header", name)))
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, USER_ID_HEADER)?
            .parse::<Uuid>()
            .map_err(|_| AppError::Unauthorized("Invalid user id".to_string()))?;
        let name = header(parts, USER_NAME_HEADER)?.to_string();
        let level = header(parts, USER_LEVEL_HEADER)?
            .parse::<u8>()
            .map_err(|_| AppError::Unauthorized("Invalid user level".to_string()))
            .and_then(|l| {
                Level::new(l).map_err(|_| AppError::Unauthorized("Invalid user level".to_string()))
            })?;

        Ok(Identity::new(id, name, level))
    }
}
