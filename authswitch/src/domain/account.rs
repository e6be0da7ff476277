//! Account records shared with the companion tool's on-disk format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// OAuth token set for one account. Replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as Unix epoch milliseconds.
    pub expiry_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl TokenData {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expiry_timestamp: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expiry_timestamp,
            email: None,
            project_id: None,
            session_id: None,
        }
    }

    /// True when the token expires within `skew_ms` of `now_ms` (or already has).
    #[inline]
    pub fn expires_within(&self, now_ms: i64, skew_ms: i64) -> bool {
        self.expiry_timestamp - now_ms <= skew_ms
    }
}

/// Host telemetry identifiers bound to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub machine_id: String,
    pub mac_machine_id: String,
    pub dev_device_id: String,
    pub sqm_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfileVersion {
    pub id: String,
    pub created_at: i64,
    pub label: String,
    pub profile: DeviceProfile,
    pub is_current: bool,
}

/// Remaining quota for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaModel {
    pub name: String,
    /// Remaining quota, 0..=100.
    pub percentage: i32,
    /// RFC 3339 reset instant; empty when the backend reports none.
    #[serde(default)]
    pub reset_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaData {
    #[serde(default)]
    pub models: Vec<QuotaModel>,
    #[serde(default)]
    pub last_updated: i64,
    #[serde(default)]
    pub is_forbidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_tier: Option<String>,
}

/// A stored account.
///
/// Fields this crate does not use are kept in `extra` so rewriting the file
/// after a switch does not drop them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub token: TokenData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaData>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_profile: Option<DeviceProfile>,
    #[serde(default)]
    pub device_history: Vec<DeviceProfileVersion>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Account {
    pub fn new(id: impl Into<String>, email: impl Into<String>, token: TokenData) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: None,
            token,
            quota: None,
            created_at: 0,
            last_used: None,
            disabled: false,
            disabled_reason: None,
            device_profile: None,
            device_history: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Whether the quota backend has refused this account.
    #[inline]
    pub fn is_forbidden(&self) -> bool {
        self.quota.as_ref().is_some_and(|q| q.is_forbidden)
    }

    /// Human-facing label: the name when set, otherwise the email.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            last_used: self.last_used,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
}

/// `accounts.json`: the account list plus the current-account pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIndex {
    #[serde(default)]
    pub accounts: Vec<AccountSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_account_id: Option<String>,
}
