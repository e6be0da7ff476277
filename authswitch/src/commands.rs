use std::sync::Arc;

use anyhow::{Context, Result};
use authswitch::{
    accounts::{AccountRepository, JsonAccountRepository},
    config::AppConfig,
    credentials::OAuthTokenRefresher,
    device::{DeviceProfileApplier, StorageJsonProfileApplier},
    domain::Account,
    selection,
    state_db::{self, CredentialInjector, StateDbInjector},
    switch::{ExpiryReason, RecoveryOutcome, SwitchOrchestrator, SwitchOutcome, SwitchSettings},
    utils::time,
};
use serde_json::json;
use tracing::warn;

use crate::cli::{Commands, OutputFormat};

pub struct CommandExecutor {
    config: AppConfig,
    accounts: Arc<JsonAccountRepository>,
    injector: Arc<StateDbInjector>,
    profiles: Arc<StorageJsonProfileApplier>,
    orchestrator: SwitchOrchestrator,
    output: OutputFormat,
}

impl CommandExecutor {
    pub fn new(config: AppConfig, output: OutputFormat) -> Self {
        let injector = Arc::new(StateDbInjector::locate(
            config.state_db_path.as_deref(),
            config.busy_timeout(),
        ));
        let storage_json = config.storage_json_path.clone().or_else(|| {
            injector
                .writer()
                .map(|writer| state_db::storage_json_path(writer.path()))
        });
        let profiles = Arc::new(StorageJsonProfileApplier::new(storage_json));
        let accounts = Arc::new(JsonAccountRepository::new(&config.data_dir));
        let refresher = Arc::new(OAuthTokenRefresher::new(config.oauth.clone()));

        let orchestrator = SwitchOrchestrator::new(
            accounts.clone(),
            refresher,
            profiles.clone(),
            injector.clone(),
            SwitchSettings::from_config(&config),
        );

        Self {
            config,
            accounts,
            injector,
            profiles,
            orchestrator,
            output,
        }
    }

    /// Startup recovery. Failures are logged; the command still runs.
    pub async fn recover_on_startup(&self) -> Option<RecoveryOutcome> {
        match self.orchestrator.recover_pending_on_startup().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Startup recovery failed");
                None
            }
        }
    }

    pub async fn execute(&self, command: Commands, recovery: Option<RecoveryOutcome>) -> Result<()> {
        match command {
            Commands::List => self.list().await,
            Commands::Status => self.status().await,
            Commands::Switch { target } => self.switch(&target).await,
            Commands::Best { switch } => self.best(switch).await,
            Commands::Recover => self.report_recovery(recovery.as_ref()),
            Commands::Inspect => self.inspect().await,
        }
    }

    fn print_json(&self, value: &serde_json::Value) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn lowest_quota_label(&self, account: &Account) -> String {
        account
            .quota
            .as_ref()
            .and_then(|q| selection::lowest_monitored_quota(q, &self.config.monitored_models))
            .map(|m| format!("{} {}%", m.name, m.percentage))
            .unwrap_or_else(|| "-".to_string())
    }

    async fn list(&self) -> Result<()> {
        let accounts = self.accounts.list().await?;
        let current = self.accounts.current_id().await?;

        if self.output == OutputFormat::Json {
            let rows: Vec<_> = accounts
                .iter()
                .map(|a| {
                    json!({
                        "id": a.id,
                        "email": a.email,
                        "name": a.name,
                        "current": current.as_deref() == Some(a.id.as_str()),
                        "disabled": a.disabled,
                        "forbidden": a.is_forbidden(),
                        "lastUsed": a.last_used,
                    })
                })
                .collect();
            return self.print_json(&json!(rows));
        }

        if accounts.is_empty() {
            println!("No accounts in {}", self.accounts.data_dir().display());
            return Ok(());
        }
        for account in &accounts {
            let marker = if current.as_deref() == Some(account.id.as_str()) {
                "*"
            } else {
                " "
            };
            let flags = match (account.disabled, account.is_forbidden()) {
                (true, _) => " [disabled]",
                (false, true) => " [forbidden]",
                _ => "",
            };
            println!(
                "{marker} {:<36}  {:<32}  {}{flags}",
                account.id,
                account.display_name(),
                self.lowest_quota_label(account)
            );
        }
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        let accounts = self.accounts.list().await?;
        let current_id = self.accounts.current_id().await?;
        let current = current_id
            .as_deref()
            .and_then(|id| accounts.iter().find(|a| a.id == id));
        let pending = self.orchestrator.pending_store().load().await?;
        let store_path = self.injector.writer().map(|w| w.path().to_path_buf());
        let store_available = self.injector.is_available().await;

        let low = current.and_then(|a| {
            selection::quota_below_threshold(
                a.quota.as_ref(),
                self.config.quota_threshold,
                &self.config.monitored_models,
            )
        });
        let best = selection::select_best(&accounts, &self.config.monitored_models);
        let suggestion = best
            .filter(|b| Some(b.account.id.as_str()) != current_id.as_deref())
            .filter(|_| low.is_some());

        if self.output == OutputFormat::Json {
            return self.print_json(&json!({
                "currentAccountId": current_id,
                "currentEmail": current.map(|a| &a.email),
                "lowQuotaModel": low.map(|m| json!({"name": m.name, "percentage": m.percentage})),
                "suggestedAccountId": suggestion.map(|s| &s.account.id),
                "pendingSwitch": pending.as_ref().map(|p| json!({
                    "accountId": p.account_id,
                    "createdAt": p.created_at,
                })),
                "stateDb": store_path,
                "stateDbAvailable": store_available,
            }));
        }

        match current {
            Some(account) => println!(
                "Current account: {} ({})",
                account.display_name(),
                account.id
            ),
            None => println!("Current account: none"),
        }
        if let Some(model) = low {
            println!(
                "Warning: {} has {}% remaining (threshold {}%)",
                model.name, model.percentage, self.config.quota_threshold
            );
        }
        if let Some(candidate) = suggestion {
            println!(
                "Suggestion: switch to {} (lowest monitored quota {}%)",
                candidate.account.display_name(),
                candidate.min_quota
            );
        }
        if let Some(intent) = pending {
            println!(
                "Pending switch to {} since {}",
                intent.account_id,
                time::format_ms(intent.created_at)
            );
        }
        match store_path {
            Some(path) => println!(
                "State database: {} ({})",
                path.display(),
                if store_available { "writable" } else { "unavailable" }
            ),
            None => println!("State database: not found"),
        }
        Ok(())
    }

    async fn switch(&self, target: &str) -> Result<()> {
        let account = self
            .accounts
            .find(target)
            .await
            .with_context(|| format!("no account matches '{target}'"))?;
        let outcome = self.switch_account(&account).await?;

        if self.output == OutputFormat::Json {
            return self.print_json(&json!({
                "accountId": account.id,
                "outcome": outcome_label(outcome),
            }));
        }
        self.print_outcome(&account, outcome);
        Ok(())
    }

    async fn switch_account(&self, account: &Account) -> Result<SwitchOutcome> {
        match self.orchestrator.switch_to(&account.id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.requires_relogin() => Err(e).with_context(|| {
                format!("{} has to sign in again", account.display_name())
            }),
            Err(e) if e.is_transient() => {
                Err(e).context("token refresh failed on the network, try again later")
            }
            Err(e) => Err(e.into()),
        }
    }

    fn print_outcome(&self, account: &Account, outcome: SwitchOutcome) {
        match outcome {
            SwitchOutcome::Injected => {
                println!("Switched to {}. Restart the editor to pick it up.", account.display_name());
            }
            SwitchOutcome::FallbackPending => {
                println!(
                    "Switched to {}. The editor's database is busy; close the editor and run any \
                     authswitch command within {} seconds to apply it.",
                    account.display_name(),
                    self.config.pending_ttl_secs
                );
            }
        }
    }

    async fn best(&self, switch: bool) -> Result<()> {
        let accounts = self.accounts.list().await?;
        let Some(best) = selection::select_best(&accounts, &self.config.monitored_models) else {
            if self.output == OutputFormat::Json {
                return self.print_json(&json!({"accountId": null}));
            }
            println!("No eligible account with quota data");
            return Ok(());
        };

        let current = self.accounts.current_id().await?;
        let already_current = current.as_deref() == Some(best.account.id.as_str());
        let outcome = if switch && !already_current {
            Some(self.switch_account(best.account).await?)
        } else {
            None
        };

        if self.output == OutputFormat::Json {
            return self.print_json(&json!({
                "accountId": best.account.id,
                "email": best.account.email,
                "minQuota": best.min_quota,
                "maxResetSecs": best.max_reset_secs,
                "score": best.score,
                "current": already_current,
                "outcome": outcome.map(outcome_label),
            }));
        }

        println!(
            "Best account: {} (lowest monitored quota {}%, score {:.1})",
            best.account.display_name(),
            best.min_quota,
            best.score
        );
        match outcome {
            Some(outcome) => self.print_outcome(best.account, outcome),
            None if switch => println!("Already current"),
            None => {}
        }
        Ok(())
    }

    fn report_recovery(&self, recovery: Option<&RecoveryOutcome>) -> Result<()> {
        if self.output == OutputFormat::Json {
            let value = match recovery {
                None => json!({"outcome": "none"}),
                Some(RecoveryOutcome::Injected { account_id }) => {
                    json!({"outcome": "injected", "accountId": account_id})
                }
                Some(RecoveryOutcome::Expired { account_id, reason }) => json!({
                    "outcome": "expired",
                    "accountId": account_id,
                    "reason": match reason {
                        ExpiryReason::Stale => "stale",
                        ExpiryReason::InjectionFailed => "injectionFailed",
                    },
                }),
            };
            return self.print_json(&value);
        }

        match recovery {
            None => println!("No pending switch"),
            Some(RecoveryOutcome::Injected { account_id }) => {
                println!("Applied pending switch to {account_id}")
            }
            Some(RecoveryOutcome::Expired {
                account_id,
                reason: ExpiryReason::Stale,
            }) => println!("Discarded pending switch to {account_id}: too old"),
            Some(RecoveryOutcome::Expired {
                account_id,
                reason: ExpiryReason::InjectionFailed,
            }) => println!(
                "Discarded pending switch to {account_id}: database still busy, switch again"
            ),
        }
        Ok(())
    }

    async fn inspect(&self) -> Result<()> {
        let writer = self
            .injector
            .writer()
            .context("host state database not found")?;
        let credentials = writer.read_credentials().await?;
        let profile = self.profiles.read_current().await?;

        let expiry = credentials
            .as_ref()
            .and_then(|c| c.expiry_seconds)
            .map(|s| time::format_ms(i64::from(s) * 1000));

        if self.output == OutputFormat::Json {
            return self.print_json(&json!({
                "stateDb": writer.path(),
                "accessToken": credentials.as_ref().map(|c| mask(&c.access_token)),
                "tokenType": credentials.as_ref().map(|c| &c.token_type),
                "refreshToken": credentials.as_ref().map(|c| mask(&c.refresh_token)),
                "expiry": expiry,
                "machineId": profile.as_ref().map(|p| &p.machine_id),
            }));
        }

        println!("State database: {}", writer.path().display());
        match &credentials {
            Some(c) => {
                println!("Access token:  {}", mask(&c.access_token));
                println!("Token type:    {}", c.token_type);
                println!("Refresh token: {}", mask(&c.refresh_token));
                println!("Expiry:        {}", expiry.as_deref().unwrap_or("-"));
            }
            None => println!("No credentials stored"),
        }
        if let Some(profile) = profile {
            println!("Machine id:    {}", profile.machine_id);
        }
        Ok(())
    }
}

fn outcome_label(outcome: SwitchOutcome) -> &'static str {
    match outcome {
        SwitchOutcome::Injected => "injected",
        SwitchOutcome::FallbackPending => "pending",
    }
}

/// Show only a token prefix.
fn mask(token: &str) -> String {
    const VISIBLE: usize = 8;
    if token.is_empty() {
        return "-".to_string();
    }
    let prefix: String = token.chars().take(VISIBLE).collect();
    format!("{prefix}... ({} chars)", token.chars().count())
}
