//! Sync status, snapshots and pagination wire types.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

use crate::error::KeyError;

/// Explicit timestamp unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or_default(),
        )
    }
}

// ============================================================================
// Sync status
// ============================================================================

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Pending,
    Saving,
    Saved,
    Error,
    Offline,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Saving => "saving",
            Self::Saved => "saved",
            Self::Error => "error",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: SyncStatus,
    pub to: SyncStatus,
    pub at: Instant,
}

/// Point-in-time view of one sync job, published on every change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub status: SyncStatus,
    pub retry_count: u32,
    pub last_synced: Option<UnixTimeMs>,
    pub rate_limited_until: Option<Instant>,
    pub has_pending_changes: bool,
    pub retry_scheduled: bool,
}

impl SyncSnapshot {
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited_until
            .is_some_and(|until| until > Instant::now())
    }

    /// Error with no retry left: the user has to act.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.status, SyncStatus::Error) && !self.retry_scheduled
    }

    /// Text a save indicator shows for this snapshot.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self.status {
            SyncStatus::Idle => "",
            SyncStatus::Pending if self.is_rate_limited() => "Waiting to save…",
            SyncStatus::Pending => "Unsaved changes",
            SyncStatus::Saving => "Saving…",
            SyncStatus::Saved => "Saved",
            SyncStatus::Error if self.retry_scheduled => "Save failed: retrying",
            SyncStatus::Error => "Save failed",
            SyncStatus::Offline => "Offline: saved locally",
        }
    }
}

// ============================================================================
// Pagination types
// ============================================================================

/// Validated query identity for the pagination cache.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey(String);

impl QueryKey {
    const MAX_LENGTH: usize = 256;

    pub fn new(key: impl Into<String>) -> Result<Self, KeyError> {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            return Err(KeyError::Empty);
        }
        if key.len() > Self::MAX_LENGTH {
            return Err(KeyError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        if key.chars().any(char::is_control) {
            return Err(KeyError::ControlCharacters);
        }
        Ok(Self(key))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    pub limit: usize,
    pub offset: usize,
}

/// One page as returned by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total_count: usize,
    pub has_more: bool,
}
