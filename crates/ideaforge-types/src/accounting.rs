//! Spend and quota accounting types.
//!
//! Read-only snapshots of the router's budget and rate-limit state, plus the
//! per-call spend record emitted to the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

/// Point-in-time view of the budget guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub daily_spend: f64,
    pub monthly_spend: f64,
    pub daily_limit: f64,
    pub monthly_limit: f64,
    /// Start (UTC midnight) of the current daily period.
    pub period_start: DateTime<Utc>,
    /// `max(daily_spend/daily_limit, monthly_spend/monthly_limit)`.
    pub utilization: f64,
}

/// Point-in-time view of one provider's rate-limit window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub provider: ProviderKind,
    pub requests_per_window: u32,
    pub tokens_per_window: u32,
    pub requests_remaining: u32,
    pub tokens_remaining: u32,
    pub window_reset_at: DateTime<Utc>,
    pub limited: bool,
}

/// One charged call, emitted after every successful non-cached dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendRecord {
    pub request_id: String,
    pub user_id: Option<String>,
    pub provider: ProviderKind,
    pub model: String,
    pub tokens_used: u32,
    pub cost: f64,
    pub recorded_at: DateTime<Utc>,
}
