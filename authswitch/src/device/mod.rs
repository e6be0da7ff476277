//! Device profile application.
//!
//! The host reads its telemetry identifiers from `storage.json`. Each account
//! may carry its own set; switching writes that set (or the global original
//! one) back so the host presents a consistent device per account.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::domain::{Account, DeviceProfile};
use crate::utils::fs;
use crate::{Error, Result};

/// Profile captured before this tool first changed anything.
pub const GLOBAL_ORIGINAL_PROFILE_FILE: &str = "global_original_profile.json";

const MACHINE_ID_KEY: &str = "telemetry.machineId";
const MAC_MACHINE_ID_KEY: &str = "telemetry.macMachineId";
const DEV_DEVICE_ID_KEY: &str = "telemetry.devDeviceId";
const SQM_ID_KEY: &str = "telemetry.sqmId";

#[async_trait]
pub trait DeviceProfileApplier: Send + Sync {
    async fn apply(&self, profile: &DeviceProfile) -> Result<()>;

    /// The profile the host currently presents, if it can be read.
    async fn read_current(&self) -> Result<Option<DeviceProfile>> {
        Ok(None)
    }
}

/// The profile to apply for `account`: its bound profile, else the global original.
pub async fn resolve_profile(account: &Account, data_dir: &Path) -> Option<DeviceProfile> {
    if let Some(profile) = &account.device_profile {
        return Some(profile.clone());
    }
    match load_global_original_profile(data_dir).await {
        Ok(profile) => profile,
        Err(e) => {
            warn!(error = %e, "Failed to load global original device profile");
            None
        }
    }
}

pub async fn load_global_original_profile(data_dir: &Path) -> Result<Option<DeviceProfile>> {
    fs::read_json_lenient(&data_dir.join(GLOBAL_ORIGINAL_PROFILE_FILE)).await
}

pub async fn save_global_original_profile(data_dir: &Path, profile: &DeviceProfile) -> Result<()> {
    fs::write_json_atomic(&data_dir.join(GLOBAL_ORIGINAL_PROFILE_FILE), profile).await
}

/// Save the host's current profile as the global original unless one is
/// already recorded. Returns whether a profile was captured.
pub async fn capture_global_original(
    applier: &dyn DeviceProfileApplier,
    data_dir: &Path,
) -> Result<bool> {
    if load_global_original_profile(data_dir).await?.is_some() {
        return Ok(false);
    }
    let Some(current) = applier.read_current().await? else {
        return Ok(false);
    };
    save_global_original_profile(data_dir, &current).await?;
    info!(machine_id = %current.machine_id, "Captured global original device profile");
    Ok(true)
}

/// Writes profiles into the host's `storage.json`.
///
/// Without a path (host not located) applying is a logged no-op.
#[derive(Debug, Clone, Default)]
pub struct StorageJsonProfileApplier {
    path: Option<PathBuf>,
}

impl StorageJsonProfileApplier {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn read_storage(path: &Path) -> Result<Map<String, Value>> {
        match fs::read_json_lenient::<Value>(path).await? {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => {
                warn!(path = %path.display(), "storage.json is not an object, starting fresh");
                Ok(Map::new())
            }
            None => Ok(Map::new()),
        }
    }
}

#[async_trait]
impl DeviceProfileApplier for StorageJsonProfileApplier {
    async fn apply(&self, profile: &DeviceProfile) -> Result<()> {
        let Some(path) = &self.path else {
            debug!("No storage.json location, skipping device profile");
            return Ok(());
        };
        if profile.machine_id.is_empty() {
            return Err(Error::validation("device profile has an empty machine id"));
        }

        let mut storage = Self::read_storage(path).await?;
        storage.insert(MACHINE_ID_KEY.into(), profile.machine_id.clone().into());
        storage.insert(MAC_MACHINE_ID_KEY.into(), profile.mac_machine_id.clone().into());
        storage.insert(DEV_DEVICE_ID_KEY.into(), profile.dev_device_id.clone().into());
        storage.insert(SQM_ID_KEY.into(), profile.sqm_id.clone().into());

        fs::write_json_atomic(path, &storage).await?;
        info!(machine_id = %profile.machine_id, "Applied device profile");
        Ok(())
    }

    /// The profile in `storage.json`, if any identifier is set.
    async fn read_current(&self) -> Result<Option<DeviceProfile>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let storage = Self::read_storage(path).await?;
        let get = |key: &str| {
            storage
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let profile = DeviceProfile {
            machine_id: get(MACHINE_ID_KEY),
            mac_machine_id: get(MAC_MACHINE_ID_KEY),
            dev_device_id: get(DEV_DEVICE_ID_KEY),
            sqm_id: get(SQM_ID_KEY),
        };
        let empty = profile.machine_id.is_empty()
            && profile.mac_machine_id.is_empty()
            && profile.dev_device_id.is_empty()
            && profile.sqm_id.is_empty();
        Ok((!empty).then_some(profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TokenData;
    use tempfile::TempDir;

    fn profile(tag: &str) -> DeviceProfile {
        DeviceProfile {
            machine_id: format!("machine-{tag}"),
            mac_machine_id: format!("mac-{tag}"),
            dev_device_id: format!("dev-{tag}"),
            sqm_id: format!("{{SQM-{tag}}}"),
        }
    }

    #[tokio::test]
    async fn test_apply_preserves_other_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        tokio::fs::write(
            &path,
            r#"{"theme": "dark", "telemetry.machineId": "old", "window": {"x": 1}}"#,
        )
        .await
        .unwrap();

        let applier = StorageJsonProfileApplier::new(Some(path.clone()));
        applier.apply(&profile("a")).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["theme"], "dark");
        assert_eq!(value["window"]["x"], 1);
        assert_eq!(value[MACHINE_ID_KEY], "machine-a");
        assert_eq!(value[SQM_ID_KEY], "{SQM-a}");

        assert_eq!(applier.read_current().await.unwrap(), Some(profile("a")));
    }

    #[tokio::test]
    async fn test_apply_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("globalStorage").join("storage.json");
        let applier = StorageJsonProfileApplier::new(Some(path.clone()));

        assert_eq!(applier.read_current().await.unwrap(), None);
        applier.apply(&profile("b")).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_apply_without_location_is_noop() {
        let applier = StorageJsonProfileApplier::default();
        applier.apply(&profile("c")).await.unwrap();
        assert_eq!(applier.read_current().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_capture_global_original_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        let applier = StorageJsonProfileApplier::new(Some(path.clone()));

        assert!(!capture_global_original(&applier, dir.path()).await.unwrap());
        assert_eq!(load_global_original_profile(dir.path()).await.unwrap(), None);

        applier.apply(&profile("host")).await.unwrap();
        assert!(capture_global_original(&applier, dir.path()).await.unwrap());

        applier.apply(&profile("other")).await.unwrap();
        assert!(!capture_global_original(&applier, dir.path()).await.unwrap());
        assert_eq!(
            load_global_original_profile(dir.path()).await.unwrap(),
            Some(profile("host"))
        );
    }

    #[tokio::test]
    async fn test_resolve_prefers_bound_profile() {
        let dir = TempDir::new().unwrap();
        let mut account = Account::new("a1", "a@example.com", TokenData::new("x", "y", 0));

        assert_eq!(resolve_profile(&account, dir.path()).await, None);

        save_global_original_profile(dir.path(), &profile("global"))
            .await
            .unwrap();
        assert_eq!(
            resolve_profile(&account, dir.path()).await,
            Some(profile("global"))
        );

        account.device_profile = Some(profile("bound"));
        assert_eq!(
            resolve_profile(&account, dir.path()).await,
            Some(profile("bound"))
        );
    }
}
