//! Best-account selection and quota checks.
//!
//! Score: `min_quota * 2 + min(50, reset_horizon_days * 50)`, where
//! `min_quota` is the lowest remaining percentage among monitored models
//! (100 when none is monitored) and the reset horizon is the longest time
//! until any of the account's models resets. Quota dominates; a long reset
//! horizon breaks near-ties.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{Account, QuotaData, QuotaModel};

const SECONDS_PER_DAY: f64 = 86_400.0;
const MAX_RESET_BONUS: f64 = 50.0;

/// An account together with its selection score.
#[derive(Debug, Clone, Copy)]
pub struct ScoredCandidate<'a> {
    pub account: &'a Account,
    pub min_quota: i32,
    pub max_reset_secs: f64,
    pub score: f64,
}

/// Whether `model_name` is covered by any monitored pattern (substring either way).
pub fn is_monitored(model_name: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|p| model_name.contains(p.as_str()) || p.contains(model_name))
}

/// The monitored model with the lowest remaining quota. Earlier entries win ties.
pub fn lowest_monitored_quota<'a>(
    quota: &'a QuotaData,
    patterns: &[String],
) -> Option<&'a QuotaModel> {
    quota
        .models
        .iter()
        .filter(|m| is_monitored(&m.name, patterns))
        .fold(None, |lowest: Option<&QuotaModel>, m| match lowest {
            Some(l) if l.percentage <= m.percentage => Some(l),
            _ => Some(m),
        })
}

/// The monitored model below `threshold` percent, if the lowest one is.
pub fn quota_below_threshold<'a>(
    quota: Option<&'a QuotaData>,
    threshold: i32,
    patterns: &[String],
) -> Option<&'a QuotaModel> {
    lowest_monitored_quota(quota?, patterns).filter(|m| m.percentage < threshold)
}

/// Seconds from `now` until the latest future reset among `models`; 0 when none.
fn max_reset_horizon(models: &[QuotaModel], now: DateTime<Utc>) -> f64 {
    models
        .iter()
        .filter(|m| !m.reset_time.is_empty())
        .filter_map(|m| DateTime::parse_from_rfc3339(&m.reset_time).ok())
        .map(|reset| (reset.with_timezone(&Utc) - now).num_milliseconds() as f64 / 1000.0)
        .fold(0.0, f64::max)
}

/// Score one account, or `None` when it is not eligible.
pub fn score_account<'a>(
    account: &'a Account,
    patterns: &[String],
    now: DateTime<Utc>,
) -> Option<ScoredCandidate<'a>> {
    if account.disabled || account.is_forbidden() {
        return None;
    }
    let quota = account.quota.as_ref().filter(|q| !q.models.is_empty())?;

    let min_quota = lowest_monitored_quota(quota, patterns).map_or(100, |m| m.percentage);
    let max_reset_secs = max_reset_horizon(&quota.models, now);
    let reset_bonus = (max_reset_secs / SECONDS_PER_DAY * MAX_RESET_BONUS).min(MAX_RESET_BONUS);
    let score = f64::from(min_quota) * 2.0 + reset_bonus;

    Some(ScoredCandidate {
        account,
        min_quota,
        max_reset_secs,
        score,
    })
}

/// Pick the highest-scoring eligible account as of `now`.
///
/// Only a strictly greater score replaces the current best, so ties keep the
/// earlier account.
pub fn select_best_at<'a>(
    accounts: &'a [Account],
    patterns: &[String],
    now: DateTime<Utc>,
) -> Option<ScoredCandidate<'a>> {
    let mut best: Option<ScoredCandidate<'a>> = None;
    for candidate in accounts.iter().filter_map(|a| score_account(a, patterns, now)) {
        debug!(
            account_id = %candidate.account.id,
            min_quota = candidate.min_quota,
            reset_minutes = (candidate.max_reset_secs / 60.0).round(),
            score = candidate.score,
            "Scored account"
        );
        if best.is_none_or(|b| candidate.score > b.score) {
            best = Some(candidate);
        }
    }
    best
}

pub fn select_best<'a>(accounts: &'a [Account], patterns: &[String]) -> Option<ScoredCandidate<'a>> {
    select_best_at(accounts, patterns, Utc::now())
}
