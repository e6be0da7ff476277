//! Backup-then-patch access to the host's `state.vscdb`.
//!
//! The database is a plain SQLite key-value table (`ItemTable`). The record
//! this tool patches is stored as base64 text of an opaque protobuf message;
//! only its credential field (6) is rewritten.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use field_codec::CredentialField;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use tracing::{debug, info, instrument, warn};

use super::error::StoreError;

/// File name of the host's state database.
pub const STATE_DB_FILE: &str = "state.vscdb";

/// Key of the record carrying the credential sub-message.
pub const AGENT_STATE_KEY: &str = "jetskiStateSync.agentManagerInitState";

/// Marker key the host checks before trusting injected credentials.
pub const ONBOARDING_KEY: &str = "antigravityOnboarding";

/// Platform-specific default location of the state database.
///
/// `dirs::config_dir()` resolves to `~/Library/Application Support` on macOS,
/// `%APPDATA%` on Windows and `$XDG_CONFIG_HOME` (or `~/.config`) elsewhere.
pub fn default_store_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| {
        dir.join("Antigravity")
            .join("User")
            .join("globalStorage")
            .join(STATE_DB_FILE)
    })
}

/// Find the state database, preferring an explicit path.
///
/// `NotFound` means the host is not installed (or never ran) here.
pub fn locate_store(explicit: Option<&Path>) -> Result<PathBuf, StoreError> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(default_store_path)
        .ok_or(StoreError::NotFound)?;

    if path.is_file() {
        Ok(path)
    } else {
        debug!(path = %path.display(), "State database not present");
        Err(StoreError::NotFound)
    }
}

/// Sibling path used for the pre-patch copy: `<path>.backup`.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".backup");
    PathBuf::from(name)
}

/// Reads and patches one state database file.
#[derive(Debug, Clone)]
pub struct StateDbWriter {
    path: PathBuf,
    busy_timeout: Duration,
}

impl StateDbWriter {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> Result<SqliteConnection, StoreError> {
        // Statement logging would print the encoded record, tokens included.
        let conn = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(false)
            .busy_timeout(self.busy_timeout)
            .disable_statement_logging()
            .connect()
            .await?;
        Ok(conn)
    }

    /// Whether a read-write SQLite connection to the file can be opened.
    ///
    /// Injection must not be attempted when this is false.
    pub async fn has_backend_available(&self) -> bool {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() && !meta.permissions().readonly() => {}
            Ok(_) => {
                debug!(path = %self.path.display(), "State database is not a writable file");
                return false;
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "State database metadata unavailable");
                return false;
            }
        }

        match self.connect().await {
            Ok(mut conn) => {
                let ok = sqlx::query("SELECT 1").execute(&mut conn).await.is_ok();
                let _ = conn.close().await;
                ok
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Cannot open state database");
                false
            }
        }
    }

    /// Copy the database file to `<path>.backup`, replacing any earlier backup.
    pub async fn backup(&self) -> Result<PathBuf, StoreError> {
        let backup_path = backup_path_for(&self.path);
        tokio::fs::copy(&self.path, &backup_path)
            .await
            .map_err(|source| StoreError::BackupFailed {
                path: backup_path.clone(),
                source,
            })?;
        debug!(backup = %backup_path.display(), "Backed up state database");
        Ok(backup_path)
    }

    /// Read the text value stored under `key`.
    pub async fn read_value(&self, key: &str) -> Result<String, StoreError> {
        let mut conn = self.connect().await?;
        let value = read_value_on(&mut conn, key).await;
        let _ = conn.close().await;
        value
    }

    /// Decode the credential field currently stored in the host's record.
    pub async fn read_credentials(&self) -> Result<Option<CredentialField>, StoreError> {
        let encoded = self.read_value(AGENT_STATE_KEY).await?;
        let record = BASE64.decode(encoded.trim())?;
        Ok(field_codec::decode_credential_field(&record)?)
    }

    /// Replace the record's credential field and set the onboarding marker.
    ///
    /// Runs as one `BEGIN IMMEDIATE` transaction so the read and the write see
    /// the same record. Callers take a [`backup`](Self::backup) first.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn inject(
        &self,
        access_token: &str,
        refresh_token: &str,
        expiry_ms: i64,
    ) -> Result<(), StoreError> {
        let mut conn = self.connect().await?;
        let result = inject_on(&mut conn, access_token, refresh_token, expiry_ms).await;

        if let Err(e) = &result {
            warn!(error = %e, "Credential injection failed, rolling back");
            // No-op if BEGIN itself failed.
            let _ = sqlx::query("ROLLBACK").execute(&mut conn).await;
        }
        let _ = conn.close().await;
        result
    }
}

async fn read_value_on(conn: &mut SqliteConnection, key: &str) -> Result<String, StoreError> {
    let value: Option<Option<Vec<u8>>> =
        sqlx::query_scalar("SELECT value FROM ItemTable WHERE key = ?1")
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;

    let bytes = value
        .flatten()
        .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;
    String::from_utf8(bytes).map_err(|_| StoreError::InvalidValue(key.to_string()))
}

async fn inject_on(
    conn: &mut SqliteConnection,
    access_token: &str,
    refresh_token: &str,
    expiry_ms: i64,
) -> Result<(), StoreError> {
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    let encoded = read_value_on(conn, AGENT_STATE_KEY).await?;
    let record = BASE64.decode(encoded.trim())?;
    let patched =
        field_codec::splice_credentials(&record, access_token, refresh_token, expiry_ms)?;

    sqlx::query("UPDATE ItemTable SET value = ?1 WHERE key = ?2")
        .bind(BASE64.encode(&patched))
        .bind(AGENT_STATE_KEY)
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT OR REPLACE INTO ItemTable (key, value) VALUES (?1, 'true')")
        .bind(ONBOARDING_KEY)
        .execute(&mut *conn)
        .await?;

    sqlx::query("COMMIT").execute(&mut *conn).await?;

    info!(
        record_len = record.len(),
        patched_len = patched.len(),
        "Injected credentials into state database"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use field_codec::{FieldScanner, TOKEN_TYPE_BEARER};
    use tempfile::TempDir;

    /// Opaque record: f1 varint 5, f6 stale credentials, f2 "keep".
    const RECORD: &[u8] = &[
        0x08, 0x05, 0x32, 0x03, 0xAA, 0xBB, 0xCC, 0x12, 0x04, b'k', b'e', b'e', b'p',
    ];

    async fn open(path: &Path, create: bool) -> SqliteConnection {
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create)
            .connect()
            .await
            .unwrap()
    }

    async fn create_state_db(dir: &TempDir, record: Option<&[u8]>) -> PathBuf {
        let path = dir.path().join(STATE_DB_FILE);
        let mut conn = open(&path, true).await;
        sqlx::query("CREATE TABLE ItemTable (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB)")
            .execute(&mut conn)
            .await
            .unwrap();
        if let Some(record) = record {
            sqlx::query("INSERT INTO ItemTable (key, value) VALUES (?1, ?2)")
                .bind(AGENT_STATE_KEY)
                .bind(BASE64.encode(record))
                .execute(&mut conn)
                .await
                .unwrap();
        }
        conn.close().await.unwrap();
        path
    }

    fn writer(path: &Path) -> StateDbWriter {
        StateDbWriter::new(path, Duration::from_millis(100))
    }

    #[test]
    fn test_backup_path_for() {
        assert_eq!(
            backup_path_for(Path::new("/a/state.vscdb")),
            PathBuf::from("/a/state.vscdb.backup")
        );
    }

    #[test]
    fn test_locate_store_missing() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join(STATE_DB_FILE);
        assert!(matches!(
            locate_store(Some(missing.as_path())),
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_locate_store_explicit() {
        let dir = TempDir::new().unwrap();
        let path = create_state_db(&dir, None).await;
        assert_eq!(locate_store(Some(path.as_path())).unwrap(), path);
    }

    #[tokio::test]
    async fn test_backend_available() {
        let dir = TempDir::new().unwrap();
        let path = create_state_db(&dir, Some(RECORD)).await;
        assert!(writer(&path).has_backend_available().await);
        assert!(!writer(&dir.path().join("missing.vscdb")).has_backend_available().await);
    }

    #[tokio::test]
    async fn test_read_value_missing_key() {
        let dir = TempDir::new().unwrap();
        let path = create_state_db(&dir, None).await;
        let err = writer(&path).read_value(AGENT_STATE_KEY).await.unwrap_err();
        assert!(matches!(err, StoreError::KeyNotFound(key) if key == AGENT_STATE_KEY));
    }

    #[tokio::test]
    async fn test_backup_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = create_state_db(&dir, Some(RECORD)).await;

        let backup = writer(&path).backup().await.unwrap();

        assert_eq!(backup, backup_path_for(&path));
        assert_eq!(
            tokio::fs::read(&path).await.unwrap(),
            tokio::fs::read(&backup).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_backup_failure() {
        let dir = TempDir::new().unwrap();
        let err = writer(&dir.path().join("missing.vscdb"))
            .backup()
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BackupFailed { .. }));
    }

    #[tokio::test]
    async fn test_inject_rewrites_credential_field() {
        let dir = TempDir::new().unwrap();
        let path = create_state_db(&dir, Some(RECORD)).await;
        let writer = writer(&path);

        writer.inject("AT1", "RT1", 1_700_000_000_000).await.unwrap();

        let credentials = writer.read_credentials().await.unwrap().unwrap();
        assert_eq!(credentials.access_token, "AT1");
        assert_eq!(credentials.token_type, TOKEN_TYPE_BEARER);
        assert_eq!(credentials.refresh_token, "RT1");
        assert_eq!(credentials.expiry_seconds, Some(1_700_000_000));

        let record = BASE64
            .decode(writer.read_value(AGENT_STATE_KEY).await.unwrap())
            .unwrap();
        let numbers: Vec<u32> = FieldScanner::new(&record)
            .map(|f| f.unwrap().field_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 6]);
        assert_eq!(&record[..2], &RECORD[..2]);
        assert_eq!(&record[2..8], &RECORD[7..]);

        assert_eq!(writer.read_value(ONBOARDING_KEY).await.unwrap(), "true");
    }

    #[tokio::test]
    async fn test_inject_missing_record() {
        let dir = TempDir::new().unwrap();
        let path = create_state_db(&dir, None).await;
        let writer = writer(&path);

        let err = writer.inject("a", "b", 1_000).await.unwrap_err();
        assert!(matches!(err, StoreError::KeyNotFound(_)));
        // Rolled back: the marker was not written either.
        assert!(matches!(
            writer.read_value(ONBOARDING_KEY).await,
            Err(StoreError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_inject_rejects_corrupt_record() {
        let dir = TempDir::new().unwrap();
        let path = create_state_db(&dir, Some(&[0x32, 0x7F, 0x01])).await;

        let err = writer(&path).inject("a", "b", 1_000).await.unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
    }

    #[tokio::test]
    async fn test_inject_reports_lock() {
        let dir = TempDir::new().unwrap();
        let path = create_state_db(&dir, Some(RECORD)).await;

        let mut holder = open(&path, false).await;
        sqlx::query("BEGIN EXCLUSIVE")
            .execute(&mut holder)
            .await
            .unwrap();

        let err = writer(&path).inject("a", "b", 1_000).await.unwrap_err();
        assert!(err.is_locked(), "expected StoreLocked, got {err:?}");

        sqlx::query("ROLLBACK").execute(&mut holder).await.unwrap();
        holder.close().await.unwrap();

        // Nothing was written while locked.
        let stored = writer(&path).read_value(AGENT_STATE_KEY).await.unwrap();
        assert_eq!(stored, BASE64.encode(RECORD));
    }
}
