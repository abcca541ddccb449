//! Daily/monthly spend tracking for the router.
//!
//! `BudgetGuard` holds cumulative USD spend for the current UTC day and
//! month behind a single mutex. It decides, per request, whether routing is
//! unrestricted, capped below the top tier of the available models, or
//! refused outright.
//!
//! Thresholds on `utilization = max(daily/limit, monthly/limit)`:
//! - below 80%: unrestricted
//! - 80% up to 100%: top tier excluded unless the request is critical
//! - 100% and above: refused unless critical; critical requests may overshoot

use std::sync::Mutex;

use chrono::{DateTime, Datelike, NaiveTime, Utc};

use ideaforge_types::accounting::BudgetSnapshot;
use ideaforge_types::error::RouterError;
use ideaforge_types::request::Priority;

use crate::lock;
use crate::selector::Candidate;

/// Utilization at which the top tier is withheld from non-critical work.
pub const DOWNGRADE_THRESHOLD: f64 = 0.8;

/// Utilization at which non-critical work is refused.
pub const EXHAUSTED_THRESHOLD: f64 = 1.0;

/// Spend counters for the current period.
#[derive(Debug, Clone)]
pub struct BudgetState {
    pub daily_spend: f64,
    pub monthly_spend: f64,
    pub daily_limit: f64,
    pub monthly_limit: f64,
    /// UTC midnight of the day the counters belong to.
    pub period_start: DateTime<Utc>,
}

impl BudgetState {
    pub fn new(daily_limit: f64, monthly_limit: f64, now: DateTime<Utc>) -> Self {
        Self {
            daily_spend: 0.0,
            monthly_spend: 0.0,
            daily_limit,
            monthly_limit,
            period_start: day_start(now),
        }
    }

    /// Reset daily spend when the UTC date changes and monthly spend when
    /// the UTC month changes. A clock that moves backwards resets nothing.
    pub fn roll(&mut self, now: DateTime<Utc>) {
        let today = day_start(now);
        if today <= self.period_start {
            return;
        }
        if (today.year(), today.month()) != (self.period_start.year(), self.period_start.month())
        {
            self.monthly_spend = 0.0;
        }
        self.daily_spend = 0.0;
        self.period_start = today;
    }

    pub fn utilization(&self) -> f64 {
        let daily = ratio(self.daily_spend, self.daily_limit);
        let monthly = ratio(self.monthly_spend, self.monthly_limit);
        daily.max(monthly)
    }

    /// USD left before the tighter of the two caps.
    pub fn headroom(&self) -> f64 {
        (self.daily_limit - self.daily_spend)
            .min(self.monthly_limit - self.monthly_spend)
            .max(0.0)
    }

    fn exceeded(&self) -> RouterError {
        RouterError::BudgetExceeded {
            utilization: self.utilization(),
            daily_spend: self.daily_spend,
            daily_limit: self.daily_limit,
            monthly_spend: self.monthly_spend,
            monthly_limit: self.monthly_limit,
        }
    }
}

fn ratio(spend: f64, limit: f64) -> f64 {
    if limit <= 0.0 {
        return f64::INFINITY;
    }
    spend / limit
}

/// UTC midnight of the day containing `now`.
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// UTC midnight of the first day of the month containing `now`.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = now.date_naive().with_day(1).unwrap_or(now.date_naive());
    first.and_time(NaiveTime::MIN).and_utc()
}

/// Outcome of evaluating the budget for one request.
///
/// Which tier is "top" depends on the models able to serve the request, so
/// the decision only says whether it is withheld; the selector resolves it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetDecision {
    /// Under 80% (or critical below 100%): every tier allowed.
    Unrestricted,
    /// 80%..100% for non-critical work: the top eligible tier is withheld.
    Downgrade,
    /// At or over the cap for non-critical work: nothing may be dispatched.
    Exhausted,
    /// At or over the cap, but the request is critical and proceeds anyway.
    Overshoot { utilization: f64 },
}

impl BudgetDecision {
    /// Whether selection must stay below the top eligible tier.
    pub fn withholds_top_tier(&self) -> bool {
        matches!(self, BudgetDecision::Downgrade | BudgetDecision::Exhausted)
    }
}

/// Shared spend tracker. Increments are atomic with respect to concurrent
/// `route` calls because every read-modify-write happens under one lock.
#[derive(Debug)]
pub struct BudgetGuard {
    state: Mutex<BudgetState>,
}

impl BudgetGuard {
    pub fn new(daily_limit: f64, monthly_limit: f64, now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(BudgetState::new(daily_limit, monthly_limit, now)),
        }
    }

    /// Decide how far this request may go given current spend.
    ///
    /// Has no side effects, so it can run before the cache lookup; the
    /// refusal for [`BudgetDecision::Exhausted`] is raised at selection.
    pub fn evaluate(&self, priority: Priority, now: DateTime<Utc>) -> BudgetDecision {
        let mut state = lock(&self.state);
        state.roll(now);
        let utilization = state.utilization();
        let critical = priority == Priority::Critical;

        if utilization >= EXHAUSTED_THRESHOLD {
            if critical {
                return BudgetDecision::Overshoot { utilization };
            }
            return BudgetDecision::Exhausted;
        }
        if utilization >= DOWNGRADE_THRESHOLD && !critical {
            return BudgetDecision::Downgrade;
        }
        BudgetDecision::Unrestricted
    }

    /// Drop non-critical candidates whose estimated cost exceeds the
    /// remaining headroom. An emptied list is a budget refusal.
    pub fn filter_candidates(
        &self,
        candidates: Vec<Candidate>,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, RouterError> {
        if priority == Priority::Critical || candidates.is_empty() {
            return Ok(candidates);
        }

        let mut state = lock(&self.state);
        state.roll(now);
        let headroom = state.headroom();

        let before = candidates.len();
        let kept: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.estimated_cost <= headroom)
            .collect();

        if kept.len() < before {
            tracing::debug!(
                dropped = before - kept.len(),
                headroom,
                "Dropped candidates that would exceed remaining budget"
            );
        }
        if kept.is_empty() {
            return Err(state.exceeded());
        }
        Ok(kept)
    }

    /// The error returned when the budget leaves nothing to route to.
    pub fn refusal(&self, now: DateTime<Utc>) -> RouterError {
        let mut state = lock(&self.state);
        state.roll(now);
        state.exceeded()
    }

    /// Add a completed call's cost to both counters. Negative or NaN costs are ignored.
    pub fn record_spend(&self, cost: f64, now: DateTime<Utc>) -> f64 {
        let mut state = lock(&self.state);
        state.roll(now);
        if cost.is_finite() && cost > 0.0 {
            state.daily_spend += cost;
            state.monthly_spend += cost;
        }
        state.utilization()
    }

    /// Seed counters from persisted spend (e.g. the ledger at startup).
    ///
    /// Only raises counters; restoring never lowers spend already recorded.
    pub fn restore(&self, daily_spend: f64, monthly_spend: f64, now: DateTime<Utc>) {
        let mut state = lock(&self.state);
        state.roll(now);
        if daily_spend.is_finite() {
            state.daily_spend = state.daily_spend.max(daily_spend);
        }
        if monthly_spend.is_finite() {
            state.monthly_spend = state.monthly_spend.max(monthly_spend).max(state.daily_spend);
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> BudgetSnapshot {
        let mut state = lock(&self.state);
        state.roll(now);
        BudgetSnapshot {
            daily_spend: state.daily_spend,
            monthly_spend: state.monthly_spend,
            daily_limit: state.daily_limit,
            monthly_limit: state.monthly_limit,
            period_start: state.period_start,
            utilization: state.utilization(),
        }
    }
}
