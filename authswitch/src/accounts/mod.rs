//! Account persistence.
//!
//! Layout under the data directory:
//!
//! ```text
//! accounts.json          index: summaries + current_account_id
//! accounts/<id>.json     one full account record per file
//! ```
//!
//! Both files are rewritten atomically. The format is shared with the
//! companion account tool, so unknown fields survive a rewrite.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{Account, AccountIndex, TokenData};
use crate::utils::{fs, time};
use crate::{Error, Result};

const INDEX_FILE: &str = "accounts.json";
const ACCOUNTS_DIR: &str = "accounts";

/// Storage of accounts and the current-account pointer.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Load one account; `Error::NotFound` when it does not exist.
    async fn load(&self, id: &str) -> Result<Account>;

    /// Create or replace an account record.
    async fn save(&self, account: &Account) -> Result<()>;

    /// All readable accounts, in index order.
    async fn list(&self) -> Result<Vec<Account>>;

    async fn current_id(&self) -> Result<Option<String>>;

    /// Point the current-account pointer at `id`, which must exist.
    async fn set_current(&self, id: &str) -> Result<()>;

    /// Resolve an account by id, falling back to a case-insensitive email match.
    async fn find(&self, id_or_email: &str) -> Result<Account> {
        match self.load(id_or_email).await {
            Err(Error::NotFound { .. }) => {}
            other => return other,
        }
        self.list()
            .await?
            .into_iter()
            .find(|a| a.email.eq_ignore_ascii_case(id_or_email))
            .ok_or_else(|| Error::not_found("Account", id_or_email))
    }
}

/// [`AccountRepository`] backed by JSON files in the data directory.
pub struct JsonAccountRepository {
    data_dir: PathBuf,
    /// Serializes index read-modify-write cycles.
    index_lock: Mutex<()>,
}

impl JsonAccountRepository {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            index_lock: Mutex::new(()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE)
    }

    fn account_path(&self, id: &str) -> PathBuf {
        self.data_dir.join(ACCOUNTS_DIR).join(format!("{id}.json"))
    }

    async fn read_index(&self) -> Result<AccountIndex> {
        Ok(fs::read_json(&self.index_path()).await?.unwrap_or_default())
    }

    async fn write_index(&self, index: &AccountIndex) -> Result<()> {
        fs::write_json_atomic(&self.index_path(), index).await
    }

    /// Reject ids that would escape the accounts directory.
    fn check_id(id: &str) -> Result<()> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(Error::validation(format!("invalid account id: {id:?}")));
        }
        Ok(())
    }

    /// Add an account for `email`, or replace the token of the existing one.
    ///
    /// The first account ever added becomes current.
    pub async fn upsert_by_email(
        &self,
        email: &str,
        name: Option<String>,
        token: TokenData,
    ) -> Result<Account> {
        let existing = self
            .list()
            .await?
            .into_iter()
            .find(|a| a.email.eq_ignore_ascii_case(email));

        let account = match existing {
            Some(mut account) => {
                account.token = token;
                if name.is_some() {
                    account.name = name;
                }
                debug!(account_id = %account.id, "Updating existing account");
                account
            }
            None => {
                let mut account = Account::new(uuid::Uuid::new_v4().to_string(), email, token);
                account.name = name;
                account.created_at = time::now_ms();
                info!(account_id = %account.id, "Adding account");
                account
            }
        };

        self.save(&account).await?;

        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index().await?;
        if index.current_account_id.is_none() {
            index.current_account_id = Some(account.id.clone());
            self.write_index(&index).await?;
        }
        Ok(account)
    }

    /// Delete an account. If it was current, the first remaining account becomes current.
    pub async fn delete(&self, id: &str) -> Result<()> {
        Self::check_id(id)?;
        let _guard = self.index_lock.lock().await;

        let mut index = self.read_index().await?;
        let before = index.accounts.len();
        index.accounts.retain(|s| s.id != id);
        if index.accounts.len() == before {
            return Err(Error::not_found("Account", id));
        }

        if index.current_account_id.as_deref() == Some(id) {
            index.current_account_id = index.accounts.first().map(|s| s.id.clone());
        }
        self.write_index(&index).await?;
        fs::remove_if_exists(&self.account_path(id)).await?;

        info!(account_id = %id, "Deleted account");
        Ok(())
    }
}

#[async_trait]
impl AccountRepository for JsonAccountRepository {
    async fn load(&self, id: &str) -> Result<Account> {
        Self::check_id(id)?;
        fs::read_json(&self.account_path(id))
            .await?
            .ok_or_else(|| Error::not_found("Account", id))
    }

    async fn save(&self, account: &Account) -> Result<()> {
        Self::check_id(&account.id)?;
        fs::write_json_atomic(&self.account_path(&account.id), account).await?;

        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index().await?;
        let summary = account.summary();
        match index.accounts.iter_mut().find(|s| s.id == account.id) {
            Some(existing) if *existing == summary => return Ok(()),
            Some(existing) => *existing = summary,
            None => index.accounts.push(summary),
        }
        self.write_index(&index).await
    }

    async fn list(&self) -> Result<Vec<Account>> {
        let index = self.read_index().await?;
        let mut accounts = Vec::with_capacity(index.accounts.len());
        for summary in &index.accounts {
            match self.load(&summary.id).await {
                Ok(account) => accounts.push(account),
                Err(e) => {
                    warn!(account_id = %summary.id, error = %e, "Skipping unreadable account");
                }
            }
        }
        Ok(accounts)
    }

    async fn current_id(&self) -> Result<Option<String>> {
        Ok(self.read_index().await?.current_account_id)
    }

    async fn set_current(&self, id: &str) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index().await?;
        if !index.accounts.iter().any(|s| s.id == id) {
            return Err(Error::not_found("Account", id));
        }
        if index.current_account_id.as_deref() != Some(id) {
            index.current_account_id = Some(id.to_string());
            self.write_index(&index).await?;
        }
        Ok(())
    }
}
