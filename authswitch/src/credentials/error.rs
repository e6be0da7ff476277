//! Credential error types.

use thiserror::Error;

/// Errors that can occur while refreshing OAuth tokens.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The refresh token was revoked or expired - re-login required.
    #[error("Refresh token rejected (invalid_grant) - re-login required")]
    InvalidGrant,

    /// Missing refresh token - re-login required.
    #[error("Missing refresh token - re-login required")]
    MissingRefreshToken,

    /// OAuth client settings are incomplete.
    #[error("Missing OAuth configuration: {0}")]
    MissingConfig(&'static str),

    /// Refresh failed.
    #[error("Refresh failed: {0}")]
    RefreshFailed(String),

    /// Network error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Parse error.
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl CredentialError {
    /// Check if this error requires manual re-login.
    pub fn requires_relogin(&self) -> bool {
        matches!(self, Self::InvalidGrant | Self::MissingRefreshToken)
    }

    /// Check if this error is transient and may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
