//! Switch state machine.

use serde::{Deserialize, Serialize};

use super::error::SwitchError;

/// Phases of a switch or of startup recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwitchPhase {
    /// No switch or recovery in progress.
    #[default]
    Idle,
    /// Making sure the target account's access token is not about to expire.
    TokenRefreshing,
    /// Applying the device profile and patching the host's store.
    ApplyingDirect,
    /// The host's store carries the new credentials.
    Injected,
    /// The store could not be patched; a pending intent was journaled.
    FallbackPending,
    /// Looking for a journaled intent left by an earlier process.
    StartupRecovery,
    /// Re-attempting a journaled intent.
    Replaying,
    /// A journaled intent was discarded.
    Expired,
}

impl SwitchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::TokenRefreshing => "TOKEN_REFRESHING",
            Self::ApplyingDirect => "APPLYING_DIRECT",
            Self::Injected => "INJECTED",
            Self::FallbackPending => "FALLBACK_PENDING",
            Self::StartupRecovery => "STARTUP_RECOVERY",
            Self::Replaying => "REPLAYING",
            Self::Expired => "EXPIRED",
        }
    }

    /// Check if this phase ends a switch or recovery.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Injected | Self::FallbackPending | Self::Expired)
    }

    /// Validate a phase transition.
    pub fn can_transition_to(&self, target: SwitchPhase) -> bool {
        use SwitchPhase::*;

        match (self, target) {
            (Idle, TokenRefreshing | StartupRecovery) => true,

            (TokenRefreshing, ApplyingDirect) => true,
            (ApplyingDirect, Injected | FallbackPending) => true,

            (StartupRecovery, Replaying | Expired) => true,
            (Replaying, Injected | Expired) => true,

            // Terminal phases settle back to Idle; so does any aborted phase.
            (from, Idle) if *from != Idle => true,

            _ => false,
        }
    }

    /// Attempt to transition to a new phase.
    pub fn transition_to(&self, target: SwitchPhase) -> Result<SwitchPhase, SwitchError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(SwitchError::InvalidTransition {
                from: *self,
                to: target,
            })
        }
    }
}

impl std::fmt::Display for SwitchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
