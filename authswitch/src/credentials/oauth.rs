//! Google OAuth refresh-token grant.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{CredentialError, TokenRefresher, refreshed_token};
use crate::config::OAuthConfig;
use crate::domain::TokenData;
use crate::utils::time;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// [`TokenRefresher`] that posts a `grant_type=refresh_token` form to the token endpoint.
pub struct OAuthTokenRefresher {
    config: OAuthConfig,
    client: OnceLock<Client>,
}

impl OAuthTokenRefresher {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            client: OnceLock::new(),
        }
    }

    pub fn with_client(config: OAuthConfig, client: Client) -> Self {
        let refresher = Self::new(config);
        let _ = refresher.client.set(client);
        refresher
    }

    /// Lazily built so commands that never refresh do not pay for TLS setup.
    fn client(&self) -> &Client {
        self.client.get_or_init(|| {
            Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Falling back to default HTTP client");
                    Client::new()
                })
        })
    }
}

/// Map a non-success token endpoint response to an error.
fn classify_failure(status: StatusCode, body: &str) -> CredentialError {
    if let Ok(err) = serde_json::from_str::<ErrorResponse>(body) {
        if err.error == "invalid_grant" {
            return CredentialError::InvalidGrant;
        }
        let detail = err.error_description.unwrap_or(err.error);
        return CredentialError::RefreshFailed(format!("{status}: {detail}"));
    }
    if body.contains("invalid_grant") {
        return CredentialError::InvalidGrant;
    }
    CredentialError::RefreshFailed(format!("token endpoint returned {status}"))
}

fn parse_success(token: &TokenData, body: &str, now_ms: i64) -> Result<TokenData, CredentialError> {
    let response: TokenResponse =
        serde_json::from_str(body).map_err(|e| CredentialError::ParseError(e.to_string()))?;
    if response.access_token.is_empty() {
        return Err(CredentialError::ParseError(
            "token response has an empty access_token".to_string(),
        ));
    }

    let mut refreshed = refreshed_token(token, response.access_token, response.expires_in, now_ms);
    if let Some(rotated) = response.refresh_token.filter(|t| !t.is_empty()) {
        refreshed.refresh_token = rotated;
    }
    Ok(refreshed)
}

#[async_trait]
impl TokenRefresher for OAuthTokenRefresher {
    async fn refresh(&self, token: &TokenData) -> Result<TokenData, CredentialError> {
        if token.refresh_token.is_empty() {
            return Err(CredentialError::MissingRefreshToken);
        }
        if self.config.client_id.is_empty() {
            return Err(CredentialError::MissingConfig("oauth.client_id"));
        }
        if self.config.token_url.is_empty() {
            return Err(CredentialError::MissingConfig("oauth.token_url"));
        }

        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", token.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client()
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let err = classify_failure(status, &body);
            warn!(%status, error = %err, "Token refresh rejected");
            return Err(err);
        }

        let refreshed = parse_success(token, &body, time::now_ms())?;
        debug!(expiry = refreshed.expiry_timestamp, "Token refreshed");
        Ok(refreshed)
    }
}
