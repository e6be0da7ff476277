//! Single-slot journal for switches the host's store could not take yet.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::TokenData;
use crate::utils::fs;
use crate::{Error, Result};

pub const PENDING_SWITCH_FILE: &str = "pending_switch.json";

/// A switch that was committed logically but not yet written to the host's store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSwitchIntent {
    pub account_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Token expiry, Unix epoch milliseconds.
    pub expiry_timestamp: i64,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

impl PendingSwitchIntent {
    pub fn new(account_id: impl Into<String>, token: &TokenData, created_at: i64) -> Self {
        Self {
            account_id: account_id.into(),
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expiry_timestamp: token.expiry_timestamp,
            created_at,
        }
    }

    /// Older than `ttl` at `now_ms`.
    pub fn is_stale(&self, now_ms: i64, ttl: Duration) -> bool {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.created_at) > ttl_ms
    }
}

/// Persists at most one [`PendingSwitchIntent`]; each save replaces the last.
#[derive(Debug, Clone)]
pub struct PendingIntentStore {
    path: PathBuf,
}

impl PendingIntentStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(PENDING_SWITCH_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The journaled intent, if any. A corrupt file is removed and reported as absent.
    pub async fn load(&self) -> Result<Option<PendingSwitchIntent>> {
        match fs::read_json(&self.path).await {
            Err(Error::Serialization(e)) => {
                warn!(path = %self.path.display(), error = %e, "Discarding unreadable pending switch");
                fs::remove_if_exists(&self.path).await?;
                Ok(None)
            }
            other => other,
        }
    }

    pub async fn save(&self, intent: &PendingSwitchIntent) -> Result<()> {
        fs::write_json_atomic(&self.path, intent).await?;
        debug!(account_id = %intent.account_id, "Journaled pending switch");
        Ok(())
    }

    /// Remove the journaled intent. Returns whether one existed.
    pub async fn clear(&self) -> Result<bool> {
        fs::remove_if_exists(&self.path).await
    }
}
