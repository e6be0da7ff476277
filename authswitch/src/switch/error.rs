//! Switch error types.

use thiserror::Error;

use super::phase::SwitchPhase;
use crate::credentials::CredentialError;
use crate::state_db::StoreError;

/// Hard failures of a switch. A locked store is not one of them.
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("Invalid switch phase transition from {from} to {to}")]
    InvalidTransition { from: SwitchPhase, to: SwitchPhase },

    #[error("Account {0} is disabled")]
    AccountDisabled(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    App(#[from] crate::Error),
}

impl SwitchError {
    /// Check if the user has to sign in to the account again.
    pub fn requires_relogin(&self) -> bool {
        matches!(self, Self::Credential(e) if e.requires_relogin())
    }

    /// Check if retrying the switch later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Credential(e) if e.is_transient())
    }
}
