//! Access to the host application's SQLite state database.
//!
//! [`StateDbWriter`] does the actual backup and patching. The switch flow
//! talks to it through [`CredentialInjector`], so tests can substitute a
//! store that is locked or absent.

mod error;
mod writer;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

pub use error::StoreError;
pub use writer::{
    AGENT_STATE_KEY, ONBOARDING_KEY, STATE_DB_FILE, StateDbWriter, backup_path_for,
    default_store_path, locate_store,
};

/// Name of the host's telemetry/settings file, a sibling of the state database.
pub const STORAGE_JSON_FILE: &str = "storage.json";

/// `storage.json` next to the given state database.
pub fn storage_json_path(state_db: &Path) -> PathBuf {
    state_db.with_file_name(STORAGE_JSON_FILE)
}

/// Credential sink used by the switch flow.
#[async_trait]
pub trait CredentialInjector: Send + Sync {
    /// Whether injection can be attempted at all right now.
    async fn is_available(&self) -> bool;

    /// Back up the store, then replace its credential field.
    ///
    /// A failed backup aborts before anything is modified.
    async fn backup_and_inject(
        &self,
        access_token: &str,
        refresh_token: &str,
        expiry_ms: i64,
    ) -> Result<(), StoreError>;
}

/// [`CredentialInjector`] over the host's real state database.
///
/// Holds no writer when the database was not found; such an injector is
/// never available and the switch flow falls back to journaling.
#[derive(Debug, Clone, Default)]
pub struct StateDbInjector {
    writer: Option<StateDbWriter>,
}

impl StateDbInjector {
    pub fn new(writer: StateDbWriter) -> Self {
        Self {
            writer: Some(writer),
        }
    }

    /// Locate the database (explicit path first) and build an injector for it.
    pub fn locate(explicit: Option<&Path>, busy_timeout: Duration) -> Self {
        match locate_store(explicit) {
            Ok(path) => {
                debug!(path = %path.display(), "Using state database");
                Self::new(StateDbWriter::new(path, busy_timeout))
            }
            Err(e) => {
                info!(error = %e, "Host state database not located");
                Self::default()
            }
        }
    }

    pub fn writer(&self) -> Option<&StateDbWriter> {
        self.writer.as_ref()
    }
}

#[async_trait]
impl CredentialInjector for StateDbInjector {
    async fn is_available(&self) -> bool {
        match &self.writer {
            Some(writer) => writer.has_backend_available().await,
            None => false,
        }
    }

    async fn backup_and_inject(
        &self,
        access_token: &str,
        refresh_token: &str,
        expiry_ms: i64,
    ) -> Result<(), StoreError> {
        let writer = self.writer.as_ref().ok_or(StoreError::NotFound)?;
        writer.backup().await?;
        writer.inject(access_token, refresh_token, expiry_ms).await
    }
}
