//! Per-provider request/token quota tracking.
//!
//! Each provider gets a fixed window with a request allowance and a token
//! allowance. The window rolls forward lazily: any read or write first checks
//! whether `now` has passed the reset instant and refills if so.
//!
//! Failover never waits on a window. The router only asks "is this provider
//! limited right now?" and moves on to the next candidate if it is.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use ideaforge_types::accounting::RateLimitSnapshot;
use ideaforge_types::provider::{ProviderKind, RateLimitObservation};

use crate::lock;

/// Quota state for one provider's current window.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub requests_per_window: u32,
    pub tokens_per_window: u32,
    pub requests_remaining: u32,
    pub tokens_remaining: u32,
    pub window_reset_at: DateTime<Utc>,
    pub window: TimeDelta,
}

impl RateLimitState {
    /// A full window starting at `now`.
    pub fn new(
        requests_per_window: u32,
        tokens_per_window: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::seconds(60));
        Self {
            requests_per_window,
            tokens_per_window,
            requests_remaining: requests_per_window,
            tokens_remaining: tokens_per_window,
            window_reset_at: now + window,
            window,
        }
    }

    /// Refill if `now` is past the reset instant, then advance the reset
    /// instant by whole windows until it lies in the future.
    ///
    /// Returns true if the window rolled over.
    pub fn roll(&mut self, now: DateTime<Utc>) -> bool {
        if now <= self.window_reset_at {
            return false;
        }
        self.requests_remaining = self.requests_per_window;
        self.tokens_remaining = self.tokens_per_window;

        let window_ms = self.window.num_milliseconds().max(1);
        let behind_ms = (now - self.window_reset_at).num_milliseconds();
        let windows = behind_ms / window_ms + 1;
        self.window_reset_at += TimeDelta::milliseconds(window_ms * windows);
        true
    }

    /// True iff either allowance is exhausted in the current window.
    pub fn is_rate_limited(&mut self, now: DateTime<Utc>) -> bool {
        self.roll(now);
        self.requests_remaining == 0 || self.tokens_remaining == 0
    }

    /// Time until the window resets; zero if already due.
    pub fn wait_time(&self, now: DateTime<Utc>) -> Duration {
        (self.window_reset_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Charge one request and its tokens against the window.
    pub fn record_success(&mut self, tokens_used: u32, now: DateTime<Utc>) {
        self.roll(now);
        self.requests_remaining = self.requests_remaining.saturating_sub(1);
        self.tokens_remaining = self.tokens_remaining.saturating_sub(tokens_used);
    }

    /// Merge what the backend reported about its own quota.
    ///
    /// Reported counts only ever lower the local ones; a reported reset
    /// later than ours extends the window.
    pub fn apply_observation(&mut self, observation: &RateLimitObservation, now: DateTime<Utc>) {
        self.roll(now);
        if let Some(requests) = observation.requests_remaining {
            self.requests_remaining = self.requests_remaining.min(requests);
        }
        if let Some(tokens) = observation.tokens_remaining {
            self.tokens_remaining = self.tokens_remaining.min(tokens);
        }
        if let Some(reset_ms) = observation.reset_after_ms {
            let reported = now + millis(reset_ms);
            if reported > self.window_reset_at {
                self.window_reset_at = reported;
            }
        }
    }

    /// The backend answered 429: no more requests this window.
    pub fn record_rate_limited(&mut self, retry_after_ms: Option<u64>, now: DateTime<Utc>) {
        self.roll(now);
        self.requests_remaining = 0;
        if let Some(retry_ms) = retry_after_ms {
            let until = now + millis(retry_ms);
            if until > self.window_reset_at {
                self.window_reset_at = until;
            }
        }
    }

    pub fn snapshot(&self, provider: ProviderKind) -> RateLimitSnapshot {
        RateLimitSnapshot {
            provider,
            requests_per_window: self.requests_per_window,
            tokens_per_window: self.tokens_per_window,
            requests_remaining: self.requests_remaining,
            tokens_remaining: self.tokens_remaining,
            window_reset_at: self.window_reset_at,
            limited: self.requests_remaining == 0 || self.tokens_remaining == 0,
        }
    }
}

/// Backend-reported delays are capped at a day.
fn millis(ms: u64) -> TimeDelta {
    const MAX_MS: u64 = 24 * 60 * 60 * 1000;
    TimeDelta::milliseconds(ms.min(MAX_MS) as i64)
}

/// The per-provider state table. One mutex per provider; the key set is
/// fixed at construction.
#[derive(Debug, Default)]
pub struct RateLimiter {
    states: BTreeMap<ProviderKind, Mutex<RateLimitState>>,
}

impl RateLimiter {
    pub fn new(states: impl IntoIterator<Item = (ProviderKind, RateLimitState)>) -> Self {
        Self {
            states: states
                .into_iter()
                .map(|(kind, state)| (kind, Mutex::new(state)))
                .collect(),
        }
    }

    /// Unknown providers are never limited.
    pub fn is_rate_limited(&self, provider: ProviderKind, now: DateTime<Utc>) -> bool {
        self.states
            .get(&provider)
            .is_some_and(|state| lock(state).is_rate_limited(now))
    }

    pub fn wait_time(&self, provider: ProviderKind, now: DateTime<Utc>) -> Duration {
        self.states.get(&provider).map_or(Duration::ZERO, |state| {
            let mut state = lock(state);
            state.roll(now);
            state.wait_time(now)
        })
    }

    /// Requests left in the current window; used as a selection tie-break.
    pub fn requests_remaining(&self, provider: ProviderKind, now: DateTime<Utc>) -> u32 {
        self.states.get(&provider).map_or(0, |state| {
            let mut state = lock(state);
            state.roll(now);
            state.requests_remaining
        })
    }

    pub fn record_success(
        &self,
        provider: ProviderKind,
        tokens_used: u32,
        observation: Option<&RateLimitObservation>,
        now: DateTime<Utc>,
    ) {
        if let Some(state) = self.states.get(&provider) {
            let mut state = lock(state);
            state.record_success(tokens_used, now);
            if let Some(observation) = observation {
                state.apply_observation(observation, now);
            }
        }
    }

    pub fn record_rate_limited(
        &self,
        provider: ProviderKind,
        retry_after_ms: Option<u64>,
        now: DateTime<Utc>,
    ) {
        if let Some(state) = self.states.get(&provider) {
            lock(state).record_rate_limited(retry_after_ms, now);
        }
    }

    pub fn snapshots(&self, now: DateTime<Utc>) -> Vec<RateLimitSnapshot> {
        self.states
            .iter()
            .map(|(kind, state)| {
                let mut state = lock(state);
                state.roll(now);
                state.snapshot(*kind)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn state(requests: u32, tokens: u32) -> RateLimitState {
        RateLimitState::new(requests, tokens, Duration::from_secs(60), t0())
    }

    #[test]
    fn test_success_decrements_saturating() {
        let mut s = state(2, 100);
        s.record_success(60, t0());
        assert_eq!(s.requests_remaining, 1);
        assert_eq!(s.tokens_remaining, 40);
        s.record_success(60, t0());
        assert_eq!(s.requests_remaining, 0);
        assert_eq!(s.tokens_remaining, 0);
        s.record_success(60, t0());
        assert_eq!(s.requests_remaining, 0);
        assert!(s.is_rate_limited(t0()));
    }

    #[test]
    fn test_token_exhaustion_limits() {
        let mut s = state(10, 100);
        s.record_success(100, t0());
        assert_eq!(s.requests_remaining, 9);
        assert!(s.is_rate_limited(t0()));
    }

    #[test]
    fn test_window_resets_only_after_reset_instant() {
        let mut s = state(1, 100);
        s.record_success(10, t0());
        let reset_at = s.window_reset_at;

        // Exactly at the reset instant: still the old window.
        assert!(s.is_rate_limited(reset_at));

        let after = reset_at + TimeDelta::milliseconds(1);
        assert!(!s.is_rate_limited(after));
        assert_eq!(s.requests_remaining, 1);
        assert_eq!(s.tokens_remaining, 100);
        assert_eq!(s.window_reset_at, reset_at + TimeDelta::seconds(60));
    }

    #[test]
    fn test_window_skips_whole_missed_windows() {
        let mut s = state(1, 100);
        let reset_at = s.window_reset_at;
        let later = reset_at + TimeDelta::seconds(150);
        assert!(s.roll(later));
        assert_eq!(s.window_reset_at, reset_at + TimeDelta::seconds(180));
        assert!(s.window_reset_at > later);
    }

    #[test]
    fn test_wait_time() {
        let s = state(1, 1);
        assert_eq!(s.wait_time(t0()), Duration::from_secs(60));
        assert_eq!(
            s.wait_time(t0() + TimeDelta::seconds(90)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_observation_only_lowers_counts() {
        let mut s = state(100, 10_000);
        s.apply_observation(
            &RateLimitObservation {
                requests_remaining: Some(500),
                tokens_remaining: Some(20),
                reset_after_ms: None,
            },
            t0(),
        );
        assert_eq!(s.requests_remaining, 100);
        assert_eq!(s.tokens_remaining, 20);
    }

    #[test]
    fn test_observation_extends_window() {
        let mut s = state(100, 10_000);
        let original = s.window_reset_at;
        s.apply_observation(
            &RateLimitObservation {
                reset_after_ms: Some(10_000),
                ..Default::default()
            },
            t0(),
        );
        assert_eq!(s.window_reset_at, original);

        s.apply_observation(
            &RateLimitObservation {
                reset_after_ms: Some(120_000),
                ..Default::default()
            },
            t0(),
        );
        assert_eq!(s.window_reset_at, t0() + TimeDelta::seconds(120));
    }

    #[test]
    fn test_rate_limited_response_zeroes_requests() {
        let mut s = state(100, 10_000);
        s.record_rate_limited(Some(5_000), t0());
        assert_eq!(s.requests_remaining, 0);
        // retry-after inside the window leaves the reset alone
        assert_eq!(s.window_reset_at, t0() + TimeDelta::seconds(60));

        s.record_rate_limited(Some(90_000), t0());
        assert_eq!(s.window_reset_at, t0() + TimeDelta::seconds(90));
        assert!(s.is_rate_limited(t0() + TimeDelta::seconds(61)));
        assert!(!s.is_rate_limited(t0() + TimeDelta::seconds(91)));
    }

    #[test]
    fn test_limiter_table() {
        let limiter = RateLimiter::new([
            (ProviderKind::Anthropic, state(0, 100)),
            (ProviderKind::OpenAi, state(5, 100)),
        ]);
        assert!(limiter.is_rate_limited(ProviderKind::Anthropic, t0()));
        assert!(!limiter.is_rate_limited(ProviderKind::OpenAi, t0()));
        assert!(!limiter.is_rate_limited(ProviderKind::Gemini, t0()));

        limiter.record_success(
            ProviderKind::OpenAi,
            10,
            Some(&RateLimitObservation {
                requests_remaining: Some(2),
                ..Default::default()
            }),
            t0(),
        );
        assert_eq!(limiter.requests_remaining(ProviderKind::OpenAi, t0()), 2);

        let snapshots = limiter.snapshots(t0());
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots[0].limited);
        assert_eq!(snapshots[1].tokens_remaining, 90);
    }
}
