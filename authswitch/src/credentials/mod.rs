//! OAuth token freshness.
//!
//! [`ensure_fresh`] decides whether a token needs refreshing; the actual
//! exchange is behind [`TokenRefresher`] so the switch flow can run against
//! a fake in tests.

mod error;
mod oauth;

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::domain::TokenData;
use crate::utils::time;

pub use error::CredentialError;
pub use oauth::OAuthTokenRefresher;

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Return the refreshed token set. Implementations keep the old refresh
    /// token unless the server issues a new one.
    async fn refresh(&self, token: &TokenData) -> Result<TokenData, CredentialError>;
}

/// Build the refreshed token set from a token endpoint response.
///
/// Everything except the access token and expiry carries over.
pub fn refreshed_token(
    token: &TokenData,
    access_token: String,
    expires_in_secs: i64,
    now_ms: i64,
) -> TokenData {
    TokenData {
        access_token,
        expiry_timestamp: now_ms.saturating_add(expires_in_secs.saturating_mul(1000)),
        ..token.clone()
    }
}

/// Refresh `token` if it expires within `skew`.
///
/// Returns `None` when the token is still fresh.
pub async fn ensure_fresh(
    token: &TokenData,
    refresher: &dyn TokenRefresher,
    skew: Duration,
) -> Result<Option<TokenData>, CredentialError> {
    ensure_fresh_at(token, refresher, skew, time::now_ms()).await
}

pub async fn ensure_fresh_at(
    token: &TokenData,
    refresher: &dyn TokenRefresher,
    skew: Duration,
    now_ms: i64,
) -> Result<Option<TokenData>, CredentialError> {
    let skew_ms = i64::try_from(skew.as_millis()).unwrap_or(i64::MAX);
    if !token.expires_within(now_ms, skew_ms) {
        return Ok(None);
    }

    info!(
        expires_in_ms = token.expiry_timestamp - now_ms,
        "Access token near expiry, refreshing"
    );
    refresher.refresh(token).await.map(Some)
}
