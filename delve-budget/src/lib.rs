//! DELVE Budget - Token Budget Guard
//!
//! Tracks language-model token consumption across a per-request cap, a
//! rolling-hour window, and a rolling-day window, and persists the
//! counters through an injected [`UsageLedger`] so they survive process
//! restarts. This is the system's backpressure mechanism: when a ceiling
//! is hit the caller must stop making language-model calls and degrade,
//! not block or retry.
//!
//! Cost figures are reporting only; enforcement is purely token counts.

use chrono::{DateTime, Duration, Utc};
use delve_core::{BudgetConfig, BudgetError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

// ============================================================================
// USAGE LEDGER (persistence seam)
// ============================================================================

/// Persisted counter state. Bucket keys are `YYYY-MM-DD` (daily) and
/// `YYYY-MM-DD-HH` (hourly); zero-padded so lexicographic order is
/// chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UsageData {
    pub daily: BTreeMap<String, i64>,
    pub hourly: BTreeMap<String, i64>,
    pub total_tokens: i64,
    pub total_cost: f64,
}

/// Durable storage for [`UsageData`]. Owned by one [`BudgetGuard`];
/// loaded on construction, saved on every write, flushable on demand.
/// Swap the implementation to move the counters off the local disk
/// without touching callers.
pub trait UsageLedger: Send + Sync {
    fn load(&self) -> Result<Option<UsageData>, BudgetError>;
    fn save(&self, data: &UsageData) -> Result<(), BudgetError>;
}

/// JSON-file ledger. The file is created on first save.
#[derive(Debug, Clone)]
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl UsageLedger for FileLedger {
    fn load(&self) -> Result<Option<UsageData>, BudgetError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            BudgetError::LedgerLoadFailed {
                reason: e.to_string(),
            }
        })?;
        let data = serde_json::from_str(&raw).map_err(|e| BudgetError::LedgerLoadFailed {
            reason: e.to_string(),
        })?;
        Ok(Some(data))
    }

    fn save(&self, data: &UsageData) -> Result<(), BudgetError> {
        let raw =
            serde_json::to_string_pretty(data).map_err(|e| BudgetError::LedgerSaveFailed {
                reason: e.to_string(),
            })?;
        std::fs::write(&self.path, raw).map_err(|e| BudgetError::LedgerSaveFailed {
            reason: e.to_string(),
        })
    }
}

/// In-memory ledger for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    data: Mutex<Option<UsageData>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageLedger for MemoryLedger {
    fn load(&self) -> Result<Option<UsageData>, BudgetError> {
        Ok(lock_recover(&self.data).clone())
    }

    fn save(&self, data: &UsageData) -> Result<(), BudgetError> {
        *lock_recover(&self.data) = Some(data.clone());
        Ok(())
    }
}

// Counter updates are short and non-panicking; recover the inner value
// rather than propagating poison.
fn lock_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// BUDGET DECISIONS AND SUMMARY
// ============================================================================

/// Outcome of a pre-call limit check. The reason names the specific
/// ceiling that would be exceeded and when it resets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl BudgetDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn reject(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Usage within one rolling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowUsage {
    pub used: i64,
    pub limit: i64,
    pub remaining: i64,
    pub percentage: f64,
}

/// Snapshot of current consumption for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub daily: WindowUsage,
    pub hourly: WindowUsage,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub daily_cost: f64,
    pub per_request_limit: i64,
}

// ============================================================================
// BUDGET GUARD
// ============================================================================

/// Process-wide token budget guard. Shared across concurrent sessions;
/// updates are short, so a plain mutex over the counters suffices.
pub struct BudgetGuard<L: UsageLedger> {
    config: BudgetConfig,
    ledger: L,
    state: Mutex<UsageData>,
}

impl<L: UsageLedger> BudgetGuard<L> {
    /// Load persisted counters (if any) and wrap them with the given
    /// ceilings. A corrupt or unreadable ledger starts fresh with a
    /// warning rather than failing construction.
    pub fn new(config: BudgetConfig, ledger: L) -> Self {
        let state = match ledger.load() {
            Ok(Some(data)) => data,
            Ok(None) => UsageData::default(),
            Err(e) => {
                tracing::warn!(error = %e, "usage ledger unreadable, starting fresh");
                UsageData::default()
            }
        };
        Self {
            config,
            ledger,
            state: Mutex::new(state),
        }
    }

    /// Would a call of `estimated_tokens` exceed any ceiling?
    ///
    /// Ceilings are checked per-request, then daily, then hourly; the
    /// first violation is reported with its reset time.
    pub fn check_limits(&self, estimated_tokens: i64) -> BudgetDecision {
        self.check_limits_at(estimated_tokens, Utc::now())
    }

    fn check_limits_at(&self, estimated_tokens: i64, now: DateTime<Utc>) -> BudgetDecision {
        if estimated_tokens > self.config.max_tokens_per_request {
            return BudgetDecision::reject(format!(
                "Request too large: {} tokens (max per request: {})",
                estimated_tokens, self.config.max_tokens_per_request
            ));
        }

        let state = lock_recover(&self.state);
        let daily_used = *state.daily.get(&day_key(now)).unwrap_or(&0);
        let hourly_used = *state.hourly.get(&hour_key(now)).unwrap_or(&0);

        if daily_used + estimated_tokens > self.config.max_daily_tokens {
            let cost = daily_used as f64 / 1000.0 * self.config.cost_per_1k_tokens;
            return BudgetDecision::reject(format!(
                "Daily token limit reached: {}/{} tokens used (${:.2}). Resets at midnight.",
                daily_used, self.config.max_daily_tokens, cost
            ));
        }

        if hourly_used + estimated_tokens > self.config.max_hourly_tokens {
            return BudgetDecision::reject(format!(
                "Hourly token limit reached: {}/{} tokens used. Try again next hour.",
                hourly_used, self.config.max_hourly_tokens
            ));
        }

        BudgetDecision::allow()
    }

    /// Record actual consumption after a completed language-model call.
    /// Never speculative: call this only with provider-reported counts.
    pub fn track(&self, prompt_tokens: i64, completion_tokens: i64) {
        self.track_at(prompt_tokens, completion_tokens, Utc::now())
    }

    fn track_at(&self, prompt_tokens: i64, completion_tokens: i64, now: DateTime<Utc>) {
        let total = prompt_tokens + completion_tokens;
        let snapshot = {
            let mut state = lock_recover(&self.state);

            let today = day_key(now);
            // Only the current day matters for enforcement.
            state.daily.retain(|k, _| *k == today);
            *state.daily.entry(today).or_insert(0) += total;

            // Hourly buckets older than 24h are pruned lazily on write.
            let cutoff = hour_key(now - Duration::hours(24));
            state.hourly.retain(|k, _| *k >= cutoff);
            *state.hourly.entry(hour_key(now)).or_insert(0) += total;

            state.total_tokens += total;
            state.total_cost += total as f64 / 1000.0 * self.config.cost_per_1k_tokens;

            state.clone()
        };

        if let Err(e) = self.ledger.save(&snapshot) {
            tracing::warn!(error = %e, "failed to persist token usage");
        }

        tracing::info!(
            tokens = total,
            daily_total = snapshot.daily.values().sum::<i64>(),
            "tracked token usage"
        );
    }

    /// Current usage snapshot for reporting.
    pub fn summary(&self) -> UsageSummary {
        self.summary_at(Utc::now())
    }

    fn summary_at(&self, now: DateTime<Utc>) -> UsageSummary {
        let state = lock_recover(&self.state);
        let daily_used = *state.daily.get(&day_key(now)).unwrap_or(&0);
        let hourly_used = *state.hourly.get(&hour_key(now)).unwrap_or(&0);

        UsageSummary {
            daily: window(daily_used, self.config.max_daily_tokens),
            hourly: window(hourly_used, self.config.max_hourly_tokens),
            total_tokens: state.total_tokens,
            total_cost: state.total_cost,
            daily_cost: daily_used as f64 / 1000.0 * self.config.cost_per_1k_tokens,
            per_request_limit: self.config.max_tokens_per_request,
        }
    }

    /// Force a ledger write of the current counters.
    pub fn flush(&self) -> Result<(), BudgetError> {
        let snapshot = lock_recover(&self.state).clone();
        self.ledger.save(&snapshot)
    }

    /// Rough token estimate for admission checks: ~4 characters per token.
    /// Actual accounting uses provider-reported counts via [`Self::track`].
    pub fn estimate_tokens(text: &str) -> i64 {
        (text.len() / 4) as i64
    }
}

fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

fn hour_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d-%H").to_string()
}

fn window(used: i64, limit: i64) -> WindowUsage {
    WindowUsage {
        used,
        limit,
        remaining: limit - used,
        percentage: if limit > 0 {
            used as f64 / limit as f64 * 100.0
        } else {
            0.0
        },
    }
}
