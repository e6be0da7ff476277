//! Drives a switch from token refresh to injection, and replays journaled
//! switches on startup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::error::SwitchError;
use super::pending::{PendingIntentStore, PendingSwitchIntent};
use super::phase::SwitchPhase;
use crate::accounts::AccountRepository;
use crate::config::AppConfig;
use crate::credentials::{self, TokenRefresher};
use crate::device::{self, DeviceProfileApplier};
use crate::state_db::{CredentialInjector, StoreError};
use crate::utils::time;

/// Result of [`SwitchOrchestrator::switch_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The host's store now carries the account's credentials.
    Injected,
    /// The store was locked or unavailable; the switch was journaled.
    FallbackPending,
}

/// Why a journaled switch was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    /// Older than the pending TTL; no injection was attempted.
    Stale,
    /// The replayed injection failed.
    InjectionFailed,
}

/// Result of [`SwitchOrchestrator::recover_pending_on_startup`] when an intent existed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Injected { account_id: String },
    Expired {
        account_id: String,
        reason: ExpiryReason,
    },
}

#[derive(Debug, Clone)]
pub struct SwitchSettings {
    /// Where the global original device profile is looked up.
    pub data_dir: PathBuf,
    pub inject_timeout: Duration,
    pub refresh_skew: Duration,
    pub pending_ttl: Duration,
}

impl SwitchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            inject_timeout: config.inject_timeout(),
            refresh_skew: config.refresh_skew(),
            pending_ttl: config.pending_ttl(),
        }
    }
}

/// Outcome of one guarded injection attempt.
enum Injection {
    Done,
    /// Backend unavailable, locked, or timed out.
    Deferred,
}

/// Owns the switch state machine.
///
/// Switches and recovery are serialized: a second call waits for the
/// running one to finish.
pub struct SwitchOrchestrator {
    accounts: Arc<dyn AccountRepository>,
    refresher: Arc<dyn TokenRefresher>,
    profiles: Arc<dyn DeviceProfileApplier>,
    injector: Arc<dyn CredentialInjector>,
    pending: PendingIntentStore,
    settings: SwitchSettings,
    phase: Mutex<SwitchPhase>,
    run_lock: tokio::sync::Mutex<()>,
}

impl SwitchOrchestrator {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        refresher: Arc<dyn TokenRefresher>,
        profiles: Arc<dyn DeviceProfileApplier>,
        injector: Arc<dyn CredentialInjector>,
        settings: SwitchSettings,
    ) -> Self {
        Self {
            accounts,
            refresher,
            profiles,
            injector,
            pending: PendingIntentStore::new(&settings.data_dir),
            settings,
            phase: Mutex::new(SwitchPhase::Idle),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SwitchPhase {
        *self.phase.lock()
    }

    pub fn pending_store(&self) -> &PendingIntentStore {
        &self.pending
    }

    fn transition(&self, target: SwitchPhase) -> Result<(), SwitchError> {
        let mut phase = self.phase.lock();
        let next = phase.transition_to(target)?;
        debug!(from = %*phase, to = %next, "Switch phase transition");
        *phase = next;
        Ok(())
    }

    /// Settle back to Idle after a run, whatever state it stopped in.
    fn settle(&self) {
        let mut phase = self.phase.lock();
        if *phase == SwitchPhase::Idle {
            return;
        }
        if phase.is_terminal() {
            debug!(from = %*phase, "Switch phase settled to IDLE");
        } else {
            warn!(from = %*phase, "Run aborted before completing, resetting to IDLE");
        }
        *phase = SwitchPhase::Idle;
    }

    /// Switch the host to `account_id`.
    ///
    /// A locked or unavailable store is not an error: the switch is journaled
    /// and `FallbackPending` returned. In both outcomes the account becomes
    /// current.
    #[instrument(skip(self))]
    pub async fn switch_to(&self, account_id: &str) -> Result<SwitchOutcome, SwitchError> {
        let _running = self.run_lock.lock().await;
        let result = self.run_switch(account_id).await;
        if let Err(e) = &result {
            error!(error = %e, "Switch failed");
        }
        self.settle();
        result
    }

    async fn run_switch(&self, account_id: &str) -> Result<SwitchOutcome, SwitchError> {
        self.transition(SwitchPhase::TokenRefreshing)?;

        let mut account = self.accounts.load(account_id).await?;
        if account.disabled {
            return Err(SwitchError::AccountDisabled(account.id));
        }

        if let Some(fresh) = credentials::ensure_fresh(
            &account.token,
            self.refresher.as_ref(),
            self.settings.refresh_skew,
        )
        .await?
        {
            account.token = fresh;
            self.accounts.save(&account).await?;
            info!(account_id = %account.id, "Persisted refreshed token");
        }

        self.transition(SwitchPhase::ApplyingDirect)?;

        if account.device_profile.is_some() {
            device::capture_global_original(self.profiles.as_ref(), &self.settings.data_dir)
                .await?;
        }
        if let Some(profile) = device::resolve_profile(&account, &self.settings.data_dir).await {
            self.profiles.apply(&profile).await?;
        }

        let outcome = match self.inject(&account.token).await? {
            Injection::Done => {
                self.transition(SwitchPhase::Injected)?;
                if self.pending.clear().await? {
                    debug!("Cleared superseded pending switch");
                }
                SwitchOutcome::Injected
            }
            Injection::Deferred => {
                self.transition(SwitchPhase::FallbackPending)?;
                let intent = PendingSwitchIntent::new(&account.id, &account.token, time::now_ms());
                self.pending.save(&intent).await?;
                SwitchOutcome::FallbackPending
            }
        };

        self.accounts.set_current(&account.id).await?;
        account.last_used = Some(time::now_ms());
        self.accounts.save(&account).await?;

        info!(account_id = %account.id, email = %account.email, ?outcome, "Switched account");
        Ok(outcome)
    }

    /// Run one backup-and-inject under the configured timeout.
    ///
    /// Lock failures and timeouts become `Deferred`; other errors propagate.
    async fn inject(&self, token: &crate::domain::TokenData) -> Result<Injection, StoreError> {
        if !self.injector.is_available().await {
            info!("State database backend unavailable, deferring injection");
            return Ok(Injection::Deferred);
        }

        let attempt = self.injector.backup_and_inject(
            &token.access_token,
            &token.refresh_token,
            token.expiry_timestamp,
        );
        let result = match tokio::time::timeout(self.settings.inject_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.settings.inject_timeout, "Injection timed out");
                Err(StoreError::StoreLocked)
            }
        };

        match result {
            Ok(()) => Ok(Injection::Done),
            Err(e) if e.is_locked() => {
                warn!("State database is locked, deferring injection");
                Ok(Injection::Deferred)
            }
            Err(e) => Err(e),
        }
    }

    /// Replay or discard the journaled switch left by an earlier process.
    ///
    /// Returns `None` when nothing was journaled. A replay is attempted at
    /// most once; the intent is removed whatever the result.
    #[instrument(skip(self))]
    pub async fn recover_pending_on_startup(
        &self,
    ) -> Result<Option<RecoveryOutcome>, SwitchError> {
        let _running = self.run_lock.lock().await;
        let result = self.run_recovery().await;
        self.settle();
        result
    }

    async fn run_recovery(&self) -> Result<Option<RecoveryOutcome>, SwitchError> {
        self.transition(SwitchPhase::StartupRecovery)?;

        let Some(intent) = self.pending.load().await? else {
            debug!("No pending switch to recover");
            return Ok(None);
        };
        let account_id = intent.account_id.clone();

        if intent.is_stale(time::now_ms(), self.settings.pending_ttl) {
            self.transition(SwitchPhase::Expired)?;
            self.pending.clear().await?;
            info!(account_id = %account_id, created_at = intent.created_at, "Discarded stale pending switch");
            return Ok(Some(RecoveryOutcome::Expired {
                account_id,
                reason: ExpiryReason::Stale,
            }));
        }

        self.transition(SwitchPhase::Replaying)?;
        let token = crate::domain::TokenData::new(
            intent.access_token,
            intent.refresh_token,
            intent.expiry_timestamp,
        );

        let outcome = match self.inject(&token).await {
            Ok(Injection::Done) => {
                self.transition(SwitchPhase::Injected)?;
                info!(account_id = %account_id, "Replayed pending switch");
                RecoveryOutcome::Injected { account_id }
            }
            Ok(Injection::Deferred) => {
                self.transition(SwitchPhase::Expired)?;
                warn!(account_id = %account_id, "Pending switch could not be replayed, discarding");
                RecoveryOutcome::Expired {
                    account_id,
                    reason: ExpiryReason::InjectionFailed,
                }
            }
            Err(e) => {
                self.transition(SwitchPhase::Expired)?;
                warn!(account_id = %account_id, error = %e, "Pending switch replay failed, discarding");
                RecoveryOutcome::Expired {
                    account_id,
                    reason: ExpiryReason::InjectionFailed,
                }
            }
        };

        self.pending.clear().await?;
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::credentials::{CredentialError, refreshed_token};
    use crate::domain::{Account, DeviceProfile, TokenData};
    use crate::{Error, Result};

    const HOUR_MS: i64 = 3_600_000;

    #[derive(Default)]
    struct MemoryAccounts {
        accounts: Mutex<Vec<Account>>,
        current: Mutex<Option<String>>,
    }

    impl MemoryAccounts {
        fn with(accounts: Vec<Account>) -> Self {
            Self {
                accounts: Mutex::new(accounts),
                current: Mutex::new(None),
            }
        }

        fn get(&self, id: &str) -> Account {
            self.accounts
                .lock()
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .unwrap()
        }
    }

    #[async_trait]
    impl AccountRepository for MemoryAccounts {
        async fn load(&self, id: &str) -> Result<Account> {
            self.accounts
                .lock()
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .ok_or_else(|| Error::not_found("Account", id))
        }

        async fn save(&self, account: &Account) -> Result<()> {
            let mut accounts = self.accounts.lock();
            match accounts.iter_mut().find(|a| a.id == account.id) {
                Some(existing) => *existing = account.clone(),
                None => accounts.push(account.clone()),
            }
            Ok(())
        }

        async fn list(&self) -> Result<Vec<Account>> {
            Ok(self.accounts.lock().clone())
        }

        async fn current_id(&self) -> Result<Option<String>> {
            Ok(self.current.lock().clone())
        }

        async fn set_current(&self, id: &str) -> Result<()> {
            *self.current.lock() = Some(id.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, token: &TokenData) -> std::result::Result<TokenData, CredentialError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if token.refresh_token == "revoked" {
                return Err(CredentialError::InvalidGrant);
            }
            Ok(refreshed_token(token, "refreshed-at".into(), 3600, time::now_ms()))
        }
    }

    #[derive(Default)]
    struct RecordingApplier {
        applied: Mutex<Vec<DeviceProfile>>,
    }

    #[async_trait]
    impl DeviceProfileApplier for RecordingApplier {
        async fn apply(&self, profile: &DeviceProfile) -> Result<()> {
            self.applied.lock().push(profile.clone());
            Ok(())
        }
    }

    #[derive(Clone, Copy)]
    enum InjectBehavior {
        Succeed,
        Locked,
        KeyMissing,
        Hang,
    }

    struct FakeInjector {
        available: bool,
        behavior: InjectBehavior,
        calls: Mutex<Vec<(String, String, i64)>>,
    }

    impl FakeInjector {
        fn new(available: bool, behavior: InjectBehavior) -> Self {
            Self {
                available,
                behavior,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl CredentialInjector for FakeInjector {
        async fn is_available(&self) -> bool {
            self.available
        }

        async fn backup_and_inject(
            &self,
            access_token: &str,
            refresh_token: &str,
            expiry_ms: i64,
        ) -> std::result::Result<(), StoreError> {
            self.calls
                .lock()
                .push((access_token.to_string(), refresh_token.to_string(), expiry_ms));
            match self.behavior {
                InjectBehavior::Succeed => Ok(()),
                InjectBehavior::Locked => Err(StoreError::StoreLocked),
                InjectBehavior::KeyMissing => Err(StoreError::KeyNotFound("record".into())),
                InjectBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            }
        }
    }

    struct Harness {
        _dir: TempDir,
        accounts: Arc<MemoryAccounts>,
        refresher: Arc<FakeRefresher>,
        applier: Arc<RecordingApplier>,
        injector: Arc<FakeInjector>,
        orchestrator: SwitchOrchestrator,
    }

    fn account(id: &str, expiry: i64) -> Account {
        let mut account = Account::new(
            id,
            format!("{id}@example.com"),
            TokenData::new(format!("at-{id}"), format!("rt-{id}"), expiry),
        );
        account.device_profile = Some(DeviceProfile {
            machine_id: format!("machine-{id}"),
            mac_machine_id: "mac".into(),
            dev_device_id: "dev".into(),
            sqm_id: "{SQM}".into(),
        });
        account
    }

    fn harness(accounts: Vec<Account>, injector: FakeInjector) -> Harness {
        let dir = TempDir::new().unwrap();
        let accounts = Arc::new(MemoryAccounts::with(accounts));
        let refresher = Arc::new(FakeRefresher::default());
        let applier = Arc::new(RecordingApplier::default());
        let injector = Arc::new(injector);
        let settings = SwitchSettings {
            data_dir: dir.path().to_path_buf(),
            inject_timeout: Duration::from_millis(200),
            refresh_skew: Duration::from_secs(300),
            pending_ttl: Duration::from_secs(300),
        };
        let orchestrator = SwitchOrchestrator::new(
            accounts.clone(),
            refresher.clone(),
            applier.clone(),
            injector.clone(),
            settings,
        );
        Harness {
            _dir: dir,
            accounts,
            refresher,
            applier,
            injector,
            orchestrator,
        }
    }

    fn far_future() -> i64 {
        time::now_ms() + 24 * HOUR_MS
    }

    #[tokio::test]
    async fn test_direct_injection() {
        let expiry = far_future();
        let h = harness(
            vec![account("a", expiry)],
            FakeInjector::new(true, InjectBehavior::Succeed),
        );
        // A leftover intent for another account is superseded.
        h.orchestrator
            .pending_store()
            .save(&PendingSwitchIntent::new("other", &TokenData::new("x", "y", 1), time::now_ms()))
            .await
            .unwrap();

        let outcome = h.orchestrator.switch_to("a").await.unwrap();

        assert_eq!(outcome, SwitchOutcome::Injected);
        assert_eq!(
            h.injector.calls.lock().clone(),
            vec![("at-a".to_string(), "rt-a".to_string(), expiry)]
        );
        assert_eq!(h.accounts.current_id().await.unwrap().as_deref(), Some("a"));
        assert!(h.accounts.get("a").last_used.is_some());
        assert_eq!(h.orchestrator.pending_store().load().await.unwrap(), None);
        assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.orchestrator.phase(), SwitchPhase::Idle);
    }

    #[tokio::test]
    async fn test_locked_store_falls_back_to_pending() {
        let expiry = far_future();
        let h = harness(
            vec![account("a", expiry)],
            FakeInjector::new(true, InjectBehavior::Locked),
        );

        let outcome = h.orchestrator.switch_to("a").await.unwrap();

        assert_eq!(outcome, SwitchOutcome::FallbackPending);
        let intent = h.orchestrator.pending_store().load().await.unwrap().unwrap();
        assert_eq!(intent.account_id, "a");
        assert_eq!(intent.access_token, "at-a");
        assert_eq!(intent.refresh_token, "rt-a");
        assert_eq!(intent.expiry_timestamp, expiry);
        // Optimistic commit: the pointer advances anyway.
        assert_eq!(h.accounts.current_id().await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_unavailable_backend_skips_injection() {
        let h = harness(
            vec![account("a", far_future())],
            FakeInjector::new(false, InjectBehavior::Succeed),
        );

        let outcome = h.orchestrator.switch_to("a").await.unwrap();

        assert_eq!(outcome, SwitchOutcome::FallbackPending);
        assert_eq!(h.injector.call_count(), 0);
        assert!(h.orchestrator.pending_store().load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_timeout_is_treated_as_locked() {
        let h = harness(
            vec![account("a", far_future())],
            FakeInjector::new(true, InjectBehavior::Hang),
        );

        let outcome = h.orchestrator.switch_to("a").await.unwrap();

        assert_eq!(outcome, SwitchOutcome::FallbackPending);
    }

    #[tokio::test]
    async fn test_hard_store_error_propagates() {
        let h = harness(
            vec![account("a", far_future())],
            FakeInjector::new(true, InjectBehavior::KeyMissing),
        );

        let err = h.orchestrator.switch_to("a").await.unwrap_err();

        assert!(matches!(err, SwitchError::Store(StoreError::KeyNotFound(_))));
        assert_eq!(h.accounts.current_id().await.unwrap(), None);
        assert_eq!(h.orchestrator.pending_store().load().await.unwrap(), None);
        assert_eq!(h.orchestrator.phase(), SwitchPhase::Idle);
    }

    #[tokio::test]
    async fn test_refresh_persisted_and_profile_applied_on_fallback() {
        let near_expiry = time::now_ms() + 60_000;
        let h = harness(
            vec![account("a", near_expiry)],
            FakeInjector::new(true, InjectBehavior::Locked),
        );

        let outcome = h.orchestrator.switch_to("a").await.unwrap();

        assert_eq!(outcome, SwitchOutcome::FallbackPending);
        assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
        let stored = h.accounts.get("a");
        assert_eq!(stored.token.access_token, "refreshed-at");
        assert_eq!(stored.token.refresh_token, "rt-a");

        let intent = h.orchestrator.pending_store().load().await.unwrap().unwrap();
        assert_eq!(intent.access_token, "refreshed-at");

        let applied = h.applier.applied.lock().clone();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].machine_id, "machine-a");
    }

    #[tokio::test]
    async fn test_invalid_grant_aborts_switch() {
        let mut revoked = account("a", time::now_ms());
        revoked.token.refresh_token = "revoked".into();
        let h = harness(vec![revoked], FakeInjector::new(true, InjectBehavior::Succeed));

        let err = h.orchestrator.switch_to("a").await.unwrap_err();

        assert!(err.requires_relogin());
        assert_eq!(h.injector.call_count(), 0);
        assert!(h.applier.applied.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_disabled_accounts() {
        let mut disabled = account("d", far_future());
        disabled.disabled = true;
        let h = harness(vec![disabled], FakeInjector::new(true, InjectBehavior::Succeed));

        assert!(matches!(
            h.orchestrator.switch_to("missing").await,
            Err(SwitchError::App(Error::NotFound { .. }))
        ));
        assert!(matches!(
            h.orchestrator.switch_to("d").await,
            Err(SwitchError::AccountDisabled(_))
        ));
        assert_eq!(h.injector.call_count(), 0);
    }

    #[tokio::test]
    async fn test_new_fallback_overwrites_previous_intent() {
        let h = harness(
            vec![account("a", far_future()), account("b", far_future())],
            FakeInjector::new(true, InjectBehavior::Locked),
        );

        h.orchestrator.switch_to("a").await.unwrap();
        h.orchestrator.switch_to("b").await.unwrap();

        let intent = h.orchestrator.pending_store().load().await.unwrap().unwrap();
        assert_eq!(intent.account_id, "b");
    }

    #[tokio::test]
    async fn test_recovery_without_intent() {
        let h = harness(vec![], FakeInjector::new(true, InjectBehavior::Succeed));
        assert_eq!(h.orchestrator.recover_pending_on_startup().await.unwrap(), None);
        assert_eq!(h.orchestrator.phase(), SwitchPhase::Idle);
    }

    #[tokio::test]
    async fn test_recovery_discards_stale_intent() {
        let h = harness(vec![], FakeInjector::new(true, InjectBehavior::Succeed));
        let six_minutes_ago = time::now_ms() - 6 * 60_000;
        h.orchestrator
            .pending_store()
            .save(&PendingSwitchIntent::new(
                "a",
                &TokenData::new("at", "rt", far_future()),
                six_minutes_ago,
            ))
            .await
            .unwrap();

        let outcome = h.orchestrator.recover_pending_on_startup().await.unwrap();

        assert_eq!(
            outcome,
            Some(RecoveryOutcome::Expired {
                account_id: "a".into(),
                reason: ExpiryReason::Stale
            })
        );
        assert_eq!(h.injector.call_count(), 0);
        assert!(!h.orchestrator.pending_store().path().exists());
    }

    #[tokio::test]
    async fn test_recovery_replays_fresh_intent() {
        let h = harness(vec![], FakeInjector::new(true, InjectBehavior::Succeed));
        let expiry = far_future();
        h.orchestrator
            .pending_store()
            .save(&PendingSwitchIntent::new(
                "a",
                &TokenData::new("at", "rt", expiry),
                time::now_ms() - 60_000,
            ))
            .await
            .unwrap();

        let outcome = h.orchestrator.recover_pending_on_startup().await.unwrap();

        assert_eq!(
            outcome,
            Some(RecoveryOutcome::Injected {
                account_id: "a".into()
            })
        );
        assert_eq!(
            h.injector.calls.lock().clone(),
            vec![("at".to_string(), "rt".to_string(), expiry)]
        );
        assert!(!h.orchestrator.pending_store().path().exists());
    }

    #[tokio::test]
    async fn test_recovery_failure_discards_without_retry() {
        let h = harness(vec![], FakeInjector::new(true, InjectBehavior::Locked));
        h.orchestrator
            .pending_store()
            .save(&PendingSwitchIntent::new(
                "a",
                &TokenData::new("at", "rt", far_future()),
                time::now_ms(),
            ))
            .await
            .unwrap();

        let outcome = h.orchestrator.recover_pending_on_startup().await.unwrap();

        assert_eq!(
            outcome,
            Some(RecoveryOutcome::Expired {
                account_id: "a".into(),
                reason: ExpiryReason::InjectionFailed
            })
        );
        assert_eq!(h.injector.call_count(), 1);
        assert!(!h.orchestrator.pending_store().path().exists());
        assert_eq!(h.orchestrator.recover_pending_on_startup().await.unwrap(), None);
    }
}
