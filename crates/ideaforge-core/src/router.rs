//! The request router.
//!
//! Every agent call goes through [`Router::route`]:
//!
//! ```text
//! CacheCheck -> Selecting -> Invoking(0) -> Success
//!                              |  transient error / locally rate limited
//!                              v
//!                           Invoking(1) -> ... -> AllProvidersExhausted
//! ```
//!
//! Terminal provider errors (auth, bad request) stop the chain immediately.
//! Failover never waits for a rate-limit window: a limited provider is
//! skipped without a network call.
//!
//! The router owns all mutation of rate-limit and budget state. Adapters
//! only report what their backend said.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use ideaforge_types::accounting::{BudgetSnapshot, RateLimitSnapshot, SpendRecord};
use ideaforge_types::config::{CacheSettings, RouterConfig, RouterSettings};
use ideaforge_types::error::{AttemptFailure, ConfigError, RouterError};
use ideaforge_types::provider::{
    CapabilityTier, Generation, HealthReport, ModelConfig, ProviderError, ProviderKind,
};
use ideaforge_types::request::{RouteDecision, RouterRequest, RouterResponse};

use crate::budget::{BudgetDecision, BudgetGuard};
use crate::cache::{BoxResponseCache, CacheEntry, InMemoryResponseCache, fingerprint};
use crate::provider::{BoxProviderAdapter, ProviderRegistry};
use crate::rate_limit::{RateLimitState, RateLimiter};
use crate::selector::{Candidate, ModelSelector};

/// Sending half of the spend ledger channel.
pub type SpendSender = mpsc::UnboundedSender<SpendRecord>;

/// Multi-provider request router. `Send + Sync`; share it behind an `Arc`.
pub struct Router {
    registry: ProviderRegistry,
    selector: ModelSelector,
    rate_limiter: RateLimiter,
    budget: BudgetGuard,
    cache: BoxResponseCache,
    cache_settings: CacheSettings,
    settings: RouterSettings,
    spend_tx: Option<SpendSender>,
}

/// Builder for [`Router`]. Nothing is global: adapters, config, cache and
/// the optional ledger channel are all passed in here.
#[derive(Default)]
pub struct RouterBuilder {
    config: Option<RouterConfig>,
    adapters: Vec<BoxProviderAdapter>,
    cache: Option<BoxResponseCache>,
    spend_tx: Option<SpendSender>,
}

impl RouterBuilder {
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn adapter(mut self, adapter: BoxProviderAdapter) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn adapters(mut self, adapters: impl IntoIterator<Item = BoxProviderAdapter>) -> Self {
        self.adapters.extend(adapters);
        self
    }

    /// Response cache backend. Defaults to an in-memory map.
    pub fn cache(mut self, cache: BoxResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Emit a [`SpendRecord`] for every charged call.
    pub fn spend_channel(mut self, tx: SpendSender) -> Self {
        self.spend_tx = Some(tx);
        self
    }

    pub fn build(self) -> Result<Router, ConfigError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let mut registry = ProviderRegistry::new();
        for adapter in self.adapters {
            registry.register(adapter);
        }
        if registry.is_empty() {
            return Err(ConfigError::Invalid(
                "no provider adapters registered".to_string(),
            ));
        }

        let now = Utc::now();
        let mut states = Vec::with_capacity(registry.len());
        for kind in registry.kinds() {
            let settings = config.provider(kind).ok_or_else(|| {
                ConfigError::Invalid(format!("no [[providers]] settings for {kind}"))
            })?;
            states.push((
                kind,
                RateLimitState::new(
                    settings.requests_per_window,
                    settings.tokens_per_window,
                    settings.window(),
                    now,
                ),
            ));
        }

        let catalog: Vec<ModelConfig> = config
            .models
            .iter()
            .filter(|m| registry.contains(m.provider))
            .cloned()
            .collect();
        if catalog.is_empty() {
            return Err(ConfigError::Invalid(
                "no catalog models belong to a registered provider".to_string(),
            ));
        }

        Ok(Router {
            selector: ModelSelector::new(catalog, &config.router, config.enable_cost_optimization),
            rate_limiter: RateLimiter::new(states),
            budget: BudgetGuard::new(config.daily_budget_limit, config.monthly_budget_limit, now),
            cache: self
                .cache
                .unwrap_or_else(|| BoxResponseCache::new(InMemoryResponseCache::new())),
            cache_settings: config.cache.clone(),
            settings: config.router.clone(),
            spend_tx: self.spend_tx,
            registry,
        })
    }
}

/// Candidate list produced by the `Selecting` state.
struct Plan {
    fingerprint: String,
    tier: CapabilityTier,
    decision: BudgetDecision,
    candidates: Vec<Candidate>,
    reasoning: String,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Route one request to a provider, or serve it from cache.
    ///
    /// Cancelling `cancel` drops any in-flight provider call and returns
    /// [`RouterError::Cancelled`].
    pub async fn route(
        &self,
        request: RouterRequest,
        cancel: &CancellationToken,
    ) -> Result<RouterResponse, RouterError> {
        let span = info_span!(
            "router.route",
            request_id = %request.request_id,
            task_type = %request.task_type,
            priority = %request.priority,
        );
        self.route_inner(request, cancel).instrument(span).await
    }

    async fn route_inner(
        &self,
        request: RouterRequest,
        cancel: &CancellationToken,
    ) -> Result<RouterResponse, RouterError> {
        let started = Instant::now();
        let request = self.resolve(request)?;
        if cancel.is_cancelled() {
            return Err(RouterError::Cancelled);
        }

        let decision = self.budget.evaluate(request.priority, Utc::now());
        let key = self.cache_key_for(&request, decision)?;
        if let Some(entry) = self.cache_lookup(&key, Utc::now()).await {
            debug!(fingerprint = %key, "Cache hit");
            return Ok(RouterResponse {
                request_id: request.request_id,
                cached: true,
                cost: 0.0,
                latency_ms: elapsed_ms(started),
                fallback_used: false,
                reasoning: format!("served from {} cache", self.cache.backend()),
                ..entry.response
            });
        }
        debug!(fingerprint = %key, "Cache miss");

        let plan = self.select(&request, decision, key, Utc::now())?;
        debug!(
            candidates = ?plan.candidates.iter().map(Candidate::label).collect::<Vec<_>>(),
            "Candidates selected"
        );

        let mut attempts: Vec<AttemptFailure> = Vec::new();
        for (index, candidate) in plan.candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(RouterError::Cancelled);
            }

            let provider = candidate.model.provider;
            let now = Utc::now();
            if self.rate_limiter.is_rate_limited(provider, now) {
                let wait = self.rate_limiter.wait_time(provider, now);
                debug!(
                    candidate = %candidate.label(),
                    wait_ms = wait.as_millis() as u64,
                    "Provider rate limited locally, skipping"
                );
                attempts.push(AttemptFailure {
                    provider,
                    model: candidate.model.model_name.clone(),
                    error: ProviderError::RateLimited {
                        provider,
                        retry_after_ms: Some(wait.as_millis() as u64),
                    },
                    skipped_locally: true,
                });
                continue;
            }

            let Some(adapter) = self.registry.get(provider) else {
                warn!(candidate = %candidate.label(), "No adapter registered, skipping");
                attempts.push(AttemptFailure {
                    provider,
                    model: candidate.model.model_name.clone(),
                    error: ProviderError::ServerError {
                        provider,
                        message: "no adapter registered".to_string(),
                    },
                    skipped_locally: false,
                });
                continue;
            };

            let span = info_span!(
                "gen_ai.generate",
                gen_ai.system = %provider,
                gen_ai.request.model = %candidate.model.model_name,
                gen_ai.request.max_tokens = request.max_tokens,
                gen_ai.request.temperature = ?request.temperature,
            );
            let call = tokio::time::timeout(
                self.settings.provider_timeout(),
                adapter.generate(&request, &candidate.model),
            )
            .instrument(span);

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(candidate = %candidate.label(), "Request cancelled mid-call");
                    return Err(RouterError::Cancelled);
                }
                outcome = call => outcome.unwrap_or_else(|_| {
                    Err(ProviderError::ServerError {
                        provider,
                        message: format!(
                            "timed out after {}s",
                            self.settings.provider_timeout().as_secs()
                        ),
                    })
                }),
            };

            match result {
                Ok(generation) => {
                    return Ok(self
                        .complete(&request, &plan, candidate, index, &attempts, generation, started)
                        .await);
                }
                Err(err) if err.is_transient() => {
                    warn!(
                        candidate = %candidate.label(),
                        error = %err,
                        "Provider failed, trying next candidate"
                    );
                    if let ProviderError::RateLimited { retry_after_ms, .. } = &err {
                        self.rate_limiter
                            .record_rate_limited(provider, *retry_after_ms, Utc::now());
                    }
                    attempts.push(AttemptFailure {
                        provider,
                        model: candidate.model.model_name.clone(),
                        error: err,
                        skipped_locally: false,
                    });
                }
                Err(err) => {
                    error!(
                        candidate = %candidate.label(),
                        error = %err,
                        "Terminal provider error, not failing over"
                    );
                    return Err(RouterError::Provider(err));
                }
            }
        }

        Err(RouterError::AllProvidersExhausted { attempts })
    }

    /// Success path: account for the call, cache and report it.
    #[allow(clippy::too_many_arguments)]
    async fn complete(
        &self,
        request: &RouterRequest,
        plan: &Plan,
        candidate: &Candidate,
        index: usize,
        attempts: &[AttemptFailure],
        generation: Generation,
        started: Instant,
    ) -> RouterResponse {
        let now = Utc::now();
        let provider = candidate.model.provider;

        self.rate_limiter.record_success(
            provider,
            generation.tokens_used,
            generation.rate_limit.as_ref(),
            now,
        );
        let utilization = self.budget.record_spend(generation.cost, now);
        if let BudgetDecision::Overshoot { .. } = plan.decision {
            warn!(
                cost = generation.cost,
                utilization, "Critical request charged past the budget cap"
            );
        }

        let fallback_used = index > 0;
        let mut reasoning = format!("{}; served by {}", plan.reasoning, candidate.label());
        if fallback_used {
            reasoning.push_str(&format!(
                " after {} unavailable candidate(s)",
                attempts.len()
            ));
        }

        let response = RouterResponse {
            request_id: request.request_id.clone(),
            content: generation.content,
            provider: provider.to_string(),
            model: candidate.model.model_name.clone(),
            tokens_used: generation.tokens_used,
            cost: generation.cost,
            cached: false,
            latency_ms: elapsed_ms(started),
            fallback_used,
            reasoning,
        };

        // A fallback to a lower tier is cached under that tier's key.
        let key = if candidate.model.tier == plan.tier {
            plan.fingerprint.clone()
        } else {
            fingerprint(
                request.task_type,
                &request.prompt,
                request.context.as_deref(),
                candidate.model.tier,
            )
        };
        let ttl = self.cache_settings.ttl_for(request.task_type);
        let entry = CacheEntry::new(key, response.clone(), ttl, now);
        if let Err(e) = self.cache.put(entry).await {
            warn!(error = %e, backend = self.cache.backend(), "Cache write failed");
        }

        if let Some(tx) = &self.spend_tx {
            let record = SpendRecord {
                request_id: response.request_id.clone(),
                user_id: request.user_id.clone(),
                provider,
                model: response.model.clone(),
                tokens_used: response.tokens_used,
                cost: response.cost,
                recorded_at: now,
            };
            if tx.send(record).is_err() {
                debug!("Spend ledger channel closed, record dropped");
            }
        }

        info!(
            provider = %provider,
            model = %response.model,
            cost = response.cost,
            tokens = response.tokens_used,
            latency_ms = response.latency_ms,
            fallback_used,
            "Request routed"
        );
        response
    }

    /// Dry run: cache check and selection without invoking any provider.
    pub async fn plan(&self, request: &RouterRequest) -> Result<RouteDecision, RouterError> {
        let request = self.resolve(request.clone())?;
        let decision = self.budget.evaluate(request.priority, Utc::now());
        let key = self.cache_key_for(&request, decision)?;

        if let Some(entry) = self.cache_lookup(&key, Utc::now()).await {
            return Ok(RouteDecision {
                request_id: request.request_id,
                candidates: Vec::new(),
                chosen: Some(format!("{}/{}", entry.response.provider, entry.response.model)),
                fallback_used: false,
                cached: true,
                reasoning: format!("served from {} cache", self.cache.backend()),
            });
        }

        let now = Utc::now();
        let plan = self.select(&request, decision, key, now)?;
        let chosen = plan
            .candidates
            .iter()
            .position(|c| !self.rate_limiter.is_rate_limited(c.model.provider, now));

        Ok(RouteDecision {
            request_id: request.request_id,
            candidates: plan.candidates.iter().map(Candidate::label).collect(),
            chosen: chosen.map(|i| plan.candidates[i].label()),
            fallback_used: chosen.is_some_and(|i| i > 0),
            cached: false,
            reasoning: plan.reasoning,
        })
    }

    /// Cache fingerprint for a request under the current budget.
    pub fn cache_key(&self, request: &RouterRequest) -> Result<String, RouterError> {
        let decision = self.budget.evaluate(request.priority, Utc::now());
        self.cache_key_for(request, decision)
    }

    /// The fingerprint is keyed on the tier selection will actually use, so
    /// an answer produced under a budget downgrade is never served to a
    /// request entitled to a higher tier.
    fn cache_key_for(
        &self,
        request: &RouterRequest,
        decision: BudgetDecision,
    ) -> Result<String, RouterError> {
        let estimate = |m: &ModelConfig| self.estimate_cost(request, m);
        let tier = match self.selector.effective_tier(
            request,
            decision.withholds_top_tier(),
            &estimate,
        )? {
            Some(tier) => tier,
            // Nothing left to dispatch to; an answer already cached at the
            // unrestricted tier is still free to serve.
            None => self
                .selector
                .effective_tier(request, false, &estimate)?
                .unwrap_or(CapabilityTier::Economy),
        };
        Ok(fingerprint(
            request.task_type,
            &request.prompt,
            request.context.as_deref(),
            tier,
        ))
    }

    /// Health-check every registered provider with its cheapest model, concurrently.
    pub async fn health_check_all(&self) -> Vec<HealthReport> {
        let checks = self.registry.iter().filter_map(|(kind, adapter)| {
            let model = self.selector.cheapest_model(kind)?;
            let span = info_span!("gen_ai.health_check", gen_ai.system = %kind);
            Some(adapter.health_check(model).instrument(span))
        });
        join_all(checks).await
    }

    pub fn rate_limit_snapshots(&self) -> Vec<RateLimitSnapshot> {
        self.rate_limiter.snapshots(Utc::now())
    }

    /// How long until `provider` has quota again; zero if it has some now.
    pub fn wait_time(&self, provider: ProviderKind) -> Duration {
        self.rate_limiter.wait_time(provider, Utc::now())
    }

    pub fn budget_snapshot(&self) -> BudgetSnapshot {
        self.budget.snapshot(Utc::now())
    }

    /// Seed the budget guard with spend persisted before this process started.
    pub fn restore_spend(&self, daily_spend: f64, monthly_spend: f64) {
        self.budget.restore(daily_spend, monthly_spend, Utc::now());
    }

    /// Models the router can dispatch to (catalog entries of registered providers).
    pub fn catalog(&self) -> &[ModelConfig] {
        self.selector.catalog()
    }

    pub fn providers(&self) -> Vec<ProviderKind> {
        self.registry.kinds()
    }

    pub fn cache_backend(&self) -> &'static str {
        self.cache.backend()
    }

    /// Validate the request and fill absent fields from config defaults.
    fn resolve(&self, mut request: RouterRequest) -> Result<RouterRequest, RouterError> {
        if request.prompt.trim().is_empty() {
            return Err(RouterError::InvalidRequest("prompt is empty".to_string()));
        }
        if request.max_tokens == Some(0) {
            return Err(RouterError::InvalidRequest(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        if let Some(t) = request.temperature.filter(|t| !(0.0..=2.0).contains(t)) {
            return Err(RouterError::InvalidRequest(format!(
                "temperature {t} is outside 0.0..=2.0"
            )));
        }
        request.max_tokens.get_or_insert(self.settings.default_max_tokens);
        request
            .temperature
            .get_or_insert(self.settings.default_temperature);
        Ok(request)
    }

    fn estimate_cost(&self, request: &RouterRequest, model: &ModelConfig) -> f64 {
        self.registry
            .get(model.provider)
            .map_or(f64::INFINITY, |adapter| adapter.estimate_cost(request, model))
    }

    /// Cache read. Backend failures are logged and treated as a miss.
    async fn cache_lookup(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        match self.cache.get(key, now).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, backend = self.cache.backend(), "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// The `Selecting` state: budget decision, ranked candidates, budget filter.
    fn select(
        &self,
        request: &RouterRequest,
        decision: BudgetDecision,
        fingerprint: String,
        now: DateTime<Utc>,
    ) -> Result<Plan, RouterError> {
        match decision {
            BudgetDecision::Exhausted => return Err(self.budget.refusal(now)),
            BudgetDecision::Overshoot { utilization } => {
                warn!(utilization, "Budget exhausted, critical request allowed to overshoot");
            }
            BudgetDecision::Unrestricted | BudgetDecision::Downgrade => {}
        }
        let selection = self.selector.select(
            request,
            decision.withholds_top_tier(),
            |m| self.estimate_cost(request, m),
            |p| self.rate_limiter.requests_remaining(p, now),
        )?;
        if selection.candidates.is_empty() {
            return Err(self.budget.refusal(now));
        }
        let candidates = self
            .budget
            .filter_candidates(selection.candidates, request.priority, now)?;

        Ok(Plan {
            fingerprint,
            tier: selection.tier,
            decision,
            candidates,
            reasoning: selection.reasoning,
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("providers", &self.registry.kinds())
            .field("cache", &self.cache.backend())
            .field("provider_timeout", &self.settings.provider_timeout())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::provider::ProviderAdapter;
    use ideaforge_types::config::ProviderSettings;
    use ideaforge_types::error::CacheError;
    use ideaforge_types::provider::{FinishReason, RateLimitObservation, Usage};
    use ideaforge_types::request::{Priority, TaskType};
    use std::future::Future;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // --- Mock adapters ---

    #[derive(Clone)]
    enum MockReply {
        Ok(Option<RateLimitObservation>),
        Err(ProviderError),
        Hang,
    }

    struct MockAdapter {
        kind: ProviderKind,
        reply: MockReply,
        calls: Arc<AtomicUsize>,
    }

    impl MockAdapter {
        fn ok(kind: ProviderKind) -> (Self, Arc<AtomicUsize>) {
            Self::with_reply(kind, MockReply::Ok(None))
        }

        fn failing(kind: ProviderKind, error: ProviderError) -> (Self, Arc<AtomicUsize>) {
            Self::with_reply(kind, MockReply::Err(error))
        }

        fn with_reply(kind: ProviderKind, reply: MockReply) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    kind,
                    reply,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl ProviderAdapter for MockAdapter {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn generate(
            &self,
            request: &RouterRequest,
            model: &ModelConfig,
        ) -> impl Future<Output = Result<Generation, ProviderError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.reply.clone();
            let usage = Usage {
                input_tokens: 100,
                output_tokens: 200,
            };
            let cost = model.cost_for(usage.input_tokens, usage.output_tokens);
            let content = format!("{} answered: {}", model.label(), request.prompt);
            let model_name = model.model_name.clone();
            async move {
                match reply {
                    MockReply::Ok(rate_limit) => Ok(Generation {
                        content,
                        model: model_name,
                        usage,
                        tokens_used: usage.total(),
                        cost,
                        latency_ms: 5,
                        finish_reason: FinishReason::Stop,
                        rate_limit,
                    }),
                    MockReply::Err(err) => Err(err),
                    MockReply::Hang => std::future::pending().await,
                }
            }
        }
    }

    /// A cache backend that is always down.
    struct BrokenCache;

    impl ResponseCache for BrokenCache {
        fn backend(&self) -> &'static str {
            "broken"
        }

        fn get(
            &self,
            _fingerprint: &str,
            _now: DateTime<Utc>,
        ) -> impl Future<Output = Result<Option<CacheEntry>, CacheError>> + Send {
            async { Err(CacheError::Unavailable("connection refused".to_string())) }
        }

        fn put(&self, _entry: CacheEntry) -> impl Future<Output = Result<(), CacheError>> + Send {
            async { Err(CacheError::Unavailable("connection refused".to_string())) }
        }
    }

    // --- Fixtures ---

    fn model(provider: ProviderKind, name: &str, tier: CapabilityTier, price: f64) -> ModelConfig {
        ModelConfig {
            provider,
            model_name: name.to_string(),
            input_cost_per_million: price,
            output_cost_per_million: price,
            context_window: 200_000,
            max_output_tokens: 8_192,
            tier,
        }
    }

    /// Anthropic is the cheaper provider in every tier, so it is always the primary.
    fn test_config() -> RouterConfig {
        RouterConfig {
            daily_budget_limit: 10.0,
            monthly_budget_limit: 100.0,
            models: vec![
                model(ProviderKind::Anthropic, "a-premium", CapabilityTier::Premium, 10.0),
                model(ProviderKind::OpenAi, "o-premium", CapabilityTier::Premium, 20.0),
                model(ProviderKind::Anthropic, "a-standard", CapabilityTier::Standard, 1.0),
                model(ProviderKind::OpenAi, "o-standard", CapabilityTier::Standard, 2.0),
            ],
            ..Default::default()
        }
    }

    fn with_quota(mut config: RouterConfig, kind: ProviderKind, requests: u32) -> RouterConfig {
        config.providers.retain(|p| p.kind != kind);
        config.providers.push(ProviderSettings {
            kind,
            api_key_env: None,
            base_url: None,
            requests_per_window: requests,
            tokens_per_window: 1_000_000,
            window_secs: 60,
            enabled: true,
        });
        config
    }

    fn router(config: RouterConfig, adapters: Vec<MockAdapter>) -> Router {
        Router::builder()
            .config(config)
            .adapters(adapters.into_iter().map(BoxProviderAdapter::new))
            .build()
            .unwrap()
    }

    fn request(prompt: &str) -> RouterRequest {
        RouterRequest::new(TaskType::MarketResearch, prompt)
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    // --- Tests ---

    #[tokio::test]
    async fn test_primary_succeeds() {
        let (a, a_calls) = MockAdapter::ok(ProviderKind::Anthropic);
        let (o, o_calls) = MockAdapter::ok(ProviderKind::OpenAi);
        let router = router(test_config(), vec![a, o]);

        let req = request("size the pet food market");
        let request_id = req.request_id.clone();
        let resp = router.route(req, &token()).await.unwrap();

        assert_eq!(resp.request_id, request_id);
        assert_eq!(resp.provider, "anthropic");
        assert_eq!(resp.model, "a-standard");
        assert!(!resp.cached);
        assert!(!resp.fallback_used);
        assert_eq!(resp.tokens_used, 300);
        assert!(resp.reasoning.contains("served by anthropic/a-standard"));
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(o_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cost_is_conserved() {
        let (a, _) = MockAdapter::ok(ProviderKind::Anthropic);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let router = Router::builder()
            .config(test_config())
            .adapter(BoxProviderAdapter::new(a))
            .spend_channel(tx)
            .build()
            .unwrap();

        let before = router.budget_snapshot();
        let resp = router
            .route(request("q1").with_user("founder-1"), &token())
            .await
            .unwrap();
        let after = router.budget_snapshot();

        // 300 tokens at $1/M
        assert!((resp.cost - 0.0003).abs() < 1e-12);
        assert!((after.daily_spend - before.daily_spend - resp.cost).abs() < 1e-12);
        assert!((after.monthly_spend - before.monthly_spend - resp.cost).abs() < 1e-12);

        let record = rx.try_recv().unwrap();
        assert_eq!(record.request_id, resp.request_id);
        assert_eq!(record.user_id.as_deref(), Some("founder-1"));
        assert_eq!(record.provider, ProviderKind::Anthropic);
        assert!((record.cost - resp.cost).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_concurrent_routes_conserve_cost() {
        let (a, a_calls) = MockAdapter::ok(ProviderKind::Anthropic);
        let router = Arc::new(router(test_config(), vec![a]));

        let mut handles = Vec::new();
        for i in 0..20 {
            let router = Arc::clone(&router);
            handles.push(tokio::spawn(async move {
                router
                    .route(request(&format!("question {i}")), &CancellationToken::new())
                    .await
                    .unwrap()
                    .cost
            }));
        }
        let mut total = 0.0;
        for handle in handles {
            total += handle.await.unwrap();
        }

        assert_eq!(a_calls.load(Ordering::SeqCst), 20);
        assert!((router.budget_snapshot().daily_spend - total).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider_and_budget() {
        let (a, a_calls) = MockAdapter::ok(ProviderKind::Anthropic);
        let router = router(test_config(), vec![a]);

        let first = router.route(request("competitors of Acme"), &token()).await.unwrap();
        let spend = router.budget_snapshot().daily_spend;

        // Same content, new request id, different whitespace.
        let second_req = request("  competitors   of\nAcme ");
        let second_id = second_req.request_id.clone();
        let second = router.route(second_req, &token()).await.unwrap();

        assert!(second.cached);
        assert_eq!(second.cost, 0.0);
        assert_eq!(second.request_id, second_id);
        assert_eq!(second.content, first.content);
        assert_eq!(second.provider, first.provider);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(router.budget_snapshot().daily_spend, spend);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let (a, a_calls) = MockAdapter::ok(ProviderKind::Anthropic);
        let store = InMemoryResponseCache::new();
        let router = Router::builder()
            .config(test_config())
            .adapter(BoxProviderAdapter::new(a))
            .cache(BoxResponseCache::new(store.clone()))
            .build()
            .unwrap();

        let req = request("stale question");
        let key = router.cache_key(&req).unwrap();
        let stale = RouterResponse {
            request_id: "old".to_string(),
            content: "stale answer".to_string(),
            provider: "openai".to_string(),
            model: "o-standard".to_string(),
            tokens_used: 1,
            cost: 1.0,
            cached: false,
            latency_ms: 1,
            fallback_used: false,
            reasoning: String::new(),
        };
        // market_research TTL is 6h; this entry is a day old.
        let written = Utc::now() - chrono::TimeDelta::hours(24);
        store
            .put(CacheEntry::new(key, stale, Duration::from_secs(6 * 3600), written))
            .await
            .unwrap();

        let resp = router.route(req, &token()).await.unwrap();
        assert!(!resp.cached);
        assert_ne!(resp.content, "stale answer");
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_backend_failure_is_not_fatal() {
        let (a, a_calls) = MockAdapter::ok(ProviderKind::Anthropic);
        let router = Router::builder()
            .config(test_config())
            .adapter(BoxProviderAdapter::new(a))
            .cache(BoxResponseCache::new(BrokenCache))
            .build()
            .unwrap();

        router.route(request("q"), &token()).await.unwrap();
        let again = router.route(request("q"), &token()).await.unwrap();
        assert!(!again.cached);
        assert_eq!(a_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_quota_falls_back_without_network_call() {
        let config = with_quota(test_config(), ProviderKind::Anthropic, 1);
        let (a, a_calls) = MockAdapter::ok(ProviderKind::Anthropic);
        let (o, o_calls) = MockAdapter::ok(ProviderKind::OpenAi);
        let router = router(config, vec![a, o]);

        // Uses the only Anthropic request in this window.
        let first = router.route(request("first"), &token()).await.unwrap();
        assert_eq!(first.provider, "anthropic");

        let second = router.route(request("second"), &token()).await.unwrap();
        assert_eq!(second.provider, "openai");
        assert_eq!(second.model, "o-standard");
        assert!(second.fallback_used);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(o_calls.load(Ordering::SeqCst), 1);

        let anthropic = router
            .rate_limit_snapshots()
            .into_iter()
            .find(|s| s.provider == ProviderKind::Anthropic)
            .unwrap();
        assert!(anthropic.limited);
        assert!(router.wait_time(ProviderKind::Anthropic) > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_primary_429_falls_back() {
        let (a, a_calls) = MockAdapter::failing(
            ProviderKind::Anthropic,
            ProviderError::RateLimited {
                provider: ProviderKind::Anthropic,
                retry_after_ms: Some(30_000),
            },
        );
        let (o, _) = MockAdapter::ok(ProviderKind::OpenAi);
        let router = router(test_config(), vec![a, o]);

        let resp = router.route(request("q"), &token()).await.unwrap();
        assert_eq!(resp.provider, "openai");
        assert!(resp.fallback_used);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);

        // The 429 marks Anthropic limited; the next request skips it locally.
        let again = router.route(request("q2"), &token()).await.unwrap();
        assert_eq!(again.provider, "openai");
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_primary_401_fails_immediately() {
        let (a, _) = MockAdapter::failing(
            ProviderKind::Anthropic,
            ProviderError::AuthFailed {
                provider: ProviderKind::Anthropic,
            },
        );
        let (o, o_calls) = MockAdapter::ok(ProviderKind::OpenAi);
        let router = router(test_config(), vec![a, o]);

        let err = router.route(request("q"), &token()).await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::Provider(ProviderError::AuthFailed {
                provider: ProviderKind::Anthropic
            })
        ));
        assert_eq!(o_calls.load(Ordering::SeqCst), 0);
        assert_eq!(router.budget_snapshot().daily_spend, 0.0);
    }

    #[tokio::test]
    async fn test_all_server_errors_exhaust_chain() {
        let server_error = |provider| ProviderError::ServerError {
            provider,
            message: "HTTP 503".to_string(),
        };
        let (a, _) = MockAdapter::failing(ProviderKind::Anthropic, server_error(ProviderKind::Anthropic));
        let (o, _) = MockAdapter::failing(ProviderKind::OpenAi, server_error(ProviderKind::OpenAi));
        let router = router(test_config(), vec![a, o]);

        let err = router.route(request("q"), &token()).await.unwrap_err();
        match &err {
            RouterError::AllProvidersExhausted { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts.iter().all(|a| !a.skipped_locally));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.all_server_errors());
        assert!(!err.all_rate_limited());
    }

    #[tokio::test]
    async fn test_budget_exceeded_rejects_medium_without_calls() {
        let (a, a_calls) = MockAdapter::ok(ProviderKind::Anthropic);
        let router = router(test_config(), vec![a]);
        router.restore_spend(10.0, 10.0);

        let err = router.route(request("q"), &token()).await.unwrap_err();
        assert!(matches!(err, RouterError::BudgetExceeded { .. }));
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_budget_exceeded_allows_critical_overshoot() {
        let (a, _) = MockAdapter::ok(ProviderKind::Anthropic);
        let router = router(test_config(), vec![a]);
        router.restore_spend(10.0, 10.0);

        let resp = router
            .route(request("q").with_priority(Priority::Critical), &token())
            .await
            .unwrap();
        assert!(resp.cost > 0.0);
        let snap = router.budget_snapshot();
        assert!(snap.daily_spend > snap.daily_limit);
    }

    #[tokio::test]
    async fn test_budget_pressure_downgrades_business_plan() {
        let (a, _) = MockAdapter::ok(ProviderKind::Anthropic);
        let (o, _) = MockAdapter::ok(ProviderKind::OpenAi);
        let router = router(test_config(), vec![a, o]);
        router.restore_spend(8.5, 8.5);

        let high = RouterRequest::new(TaskType::BusinessPlan, "plan for a cafe")
            .with_priority(Priority::High);
        let resp = router.route(high, &token()).await.unwrap();
        assert_eq!(resp.model, "a-standard");
        assert!(resp.reasoning.contains("budget caps selection at standard"));

        let critical = RouterRequest::new(TaskType::BusinessPlan, "plan for a bakery")
            .with_priority(Priority::Critical);
        let resp = router.route(critical, &token()).await.unwrap();
        assert_eq!(resp.model, "a-premium");
    }

    #[tokio::test]
    async fn test_downgraded_answer_not_served_to_critical_request() {
        let (a, a_calls) = MockAdapter::ok(ProviderKind::Anthropic);
        let router = router(test_config(), vec![a]);
        router.restore_spend(8.5, 8.5);

        let prompt = "plan for a bike shop";
        let high = RouterRequest::new(TaskType::BusinessPlan, prompt).with_priority(Priority::High);
        let downgraded = router.route(high.clone(), &token()).await.unwrap();
        assert_eq!(downgraded.model, "a-standard");

        // Same budget pressure, same entitlement: served from cache.
        let again = router.route(high, &token()).await.unwrap();
        assert!(again.cached);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);

        let critical =
            RouterRequest::new(TaskType::BusinessPlan, prompt).with_priority(Priority::Critical);
        let resp = router.route(critical, &token()).await.unwrap();
        assert!(!resp.cached);
        assert_eq!(resp.model, "a-premium");
        assert_eq!(a_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_budget_pressure_on_standard_topped_catalog() {
        let config = RouterConfig {
            models: vec![
                model(ProviderKind::Anthropic, "a-standard", CapabilityTier::Standard, 1.0),
                model(ProviderKind::OpenAi, "o-economy", CapabilityTier::Economy, 0.5),
            ],
            ..test_config()
        };
        let (a, a_calls) = MockAdapter::ok(ProviderKind::Anthropic);
        let (o, _) = MockAdapter::ok(ProviderKind::OpenAi);
        let router = router(config, vec![a, o]);
        router.restore_spend(8.5, 8.5);

        let high = RouterRequest::new(TaskType::BusinessPlan, "plan for a food truck")
            .with_priority(Priority::High);
        let decision = router.plan(&high).await.unwrap();
        assert_eq!(decision.candidates, vec!["openai/o-economy"]);

        let resp = router.route(high, &token()).await.unwrap();
        assert_eq!(resp.model, "o-economy");
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_answer_cached_under_its_own_tier() {
        let config = RouterConfig {
            models: vec![
                model(ProviderKind::Anthropic, "a-standard", CapabilityTier::Standard, 1.0),
                model(ProviderKind::OpenAi, "o-economy", CapabilityTier::Economy, 0.5),
            ],
            ..test_config()
        };
        let (a, _) = MockAdapter::failing(
            ProviderKind::Anthropic,
            ProviderError::ServerError {
                provider: ProviderKind::Anthropic,
                message: "HTTP 503".to_string(),
            },
        );
        let (o, o_calls) = MockAdapter::ok(ProviderKind::OpenAi);
        let router = router(config, vec![a, o]);

        let high = request("lemonade stand demand").with_priority(Priority::High);
        let first = router.route(high.clone(), &token()).await.unwrap();
        assert_eq!(first.model, "o-economy");
        assert!(first.fallback_used);

        // A standard-tier request does not get the economy fallback's answer.
        let second = router.route(high, &token()).await.unwrap();
        assert!(!second.cached);
        assert_eq!(o_calls.load(Ordering::SeqCst), 2);

        // A request that would have chosen economy anyway does.
        let medium = router
            .route(request("lemonade stand demand"), &token())
            .await
            .unwrap();
        assert!(medium.cached);
        assert_eq!(o_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_candidate_without_adapter_is_reported() {
        let (a, _) = MockAdapter::ok(ProviderKind::Anthropic);
        let (o, _) = MockAdapter::ok(ProviderKind::OpenAi);
        let mut router = router(test_config(), vec![a, o]);

        // Leave OpenAI in the catalog but drop its adapter.
        let (failing, _) = MockAdapter::failing(
            ProviderKind::Anthropic,
            ProviderError::ServerError {
                provider: ProviderKind::Anthropic,
                message: "HTTP 503".to_string(),
            },
        );
        let mut registry = ProviderRegistry::new();
        registry.register(BoxProviderAdapter::new(failing));
        router.registry = registry;

        // Critical, so the budget filter keeps the unpriceable OpenAI models.
        let req = request("q").with_priority(Priority::Critical);
        let err = router.route(req, &token()).await.unwrap_err();
        match &err {
            RouterError::AllProvidersExhausted { attempts } => {
                assert_eq!(attempts.len(), 4);
                assert_eq!(attempts[1].provider, ProviderKind::OpenAi);
                assert!(attempts[1].error.to_string().contains("no adapter registered"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_business_plan_high_priority_uses_premium() {
        let (a, _) = MockAdapter::ok(ProviderKind::Anthropic);
        let (o, _) = MockAdapter::ok(ProviderKind::OpenAi);
        let router = router(test_config(), vec![a, o]);

        let req = RouterRequest::new(TaskType::BusinessPlan, "plan for a coworking space")
            .with_priority(Priority::High);
        let decision = router.plan(&req).await.unwrap();
        assert_eq!(
            decision.candidates,
            vec![
                "anthropic/a-premium",
                "openai/o-premium",
                "anthropic/a-standard",
                "openai/o-standard"
            ]
        );
        assert_eq!(decision.chosen.as_deref(), Some("anthropic/a-premium"));
        assert!(!decision.fallback_used);

        let resp = router.route(req, &token()).await.unwrap();
        assert_eq!(resp.model, "a-premium");
        assert!(resp.reasoning.contains("premium"));
    }

    #[tokio::test]
    async fn test_plan_does_not_invoke_providers() {
        let (a, a_calls) = MockAdapter::ok(ProviderKind::Anthropic);
        let router = router(test_config(), vec![a]);

        let req = request("dry run");
        let decision = router.plan(&req).await.unwrap();
        assert!(!decision.cached);
        assert_eq!(decision.chosen.as_deref(), Some("anthropic/a-standard"));
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);

        router.route(req.clone(), &token()).await.unwrap();
        let decision = router.plan(&req).await.unwrap();
        assert!(decision.cached);
        assert!(decision.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_empty_prompt_is_invalid() {
        let (a, _) = MockAdapter::ok(ProviderKind::Anthropic);
        let router = router(test_config(), vec![a]);
        let err = router.route(request("   "), &token()).await.unwrap_err();
        assert!(matches!(err, RouterError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_context_too_long_for_catalog() {
        let (a, _) = MockAdapter::ok(ProviderKind::Anthropic);
        let router = router(test_config(), vec![a]);
        let req = request("summarize").with_context("x".repeat(2_000_000));
        let err = router.route(req, &token()).await.unwrap_err();
        assert!(matches!(err, RouterError::NoCandidates(_)));
    }

    #[tokio::test]
    async fn test_pre_cancelled_token() {
        let (a, a_calls) = MockAdapter::ok(ProviderKind::Anthropic);
        let router = router(test_config(), vec![a]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = router.route(request("q"), &cancel).await.unwrap_err();
        assert!(matches!(err, RouterError::Cancelled));
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_call() {
        let (a, _) = MockAdapter::with_reply(ProviderKind::Anthropic, MockReply::Hang);
        let router = Arc::new(router(test_config(), vec![a]));
        let cancel = CancellationToken::new();

        let task = {
            let router = Arc::clone(&router);
            let cancel = cancel.clone();
            tokio::spawn(async move { router.route(request("q"), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, RouterError::Cancelled));
        assert_eq!(router.budget_snapshot().daily_spend, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        let mut config = test_config();
        config.router.provider_timeout_secs = 1;
        let (a, _) = MockAdapter::with_reply(ProviderKind::Anthropic, MockReply::Hang);
        let (o, _) = MockAdapter::ok(ProviderKind::OpenAi);
        let router = router(config, vec![a, o]);

        let resp = router.route(request("q"), &token()).await.unwrap();
        assert_eq!(resp.provider, "openai");
        assert!(resp.fallback_used);
    }

    #[tokio::test]
    async fn test_backend_observation_is_applied() {
        let (a, _) = MockAdapter::with_reply(
            ProviderKind::Anthropic,
            MockReply::Ok(Some(RateLimitObservation {
                requests_remaining: Some(0),
                tokens_remaining: None,
                reset_after_ms: Some(45_000),
            })),
        );
        let (o, _) = MockAdapter::ok(ProviderKind::OpenAi);
        let router = router(test_config(), vec![a, o]);

        router.route(request("q1"), &token()).await.unwrap();
        let next = router.route(request("q2"), &token()).await.unwrap();
        assert_eq!(next.provider, "openai");
    }

    #[tokio::test]
    async fn test_health_check_all() {
        let (a, _) = MockAdapter::ok(ProviderKind::Anthropic);
        let (o, _) = MockAdapter::failing(
            ProviderKind::OpenAi,
            ProviderError::AuthFailed {
                provider: ProviderKind::OpenAi,
            },
        );
        let router = router(test_config(), vec![a, o]);

        let reports = router.health_check_all().await;
        assert_eq!(reports.len(), 2);
        let anthropic = reports.iter().find(|r| r.provider == ProviderKind::Anthropic).unwrap();
        assert_eq!(anthropic.model, "a-standard");
        assert_eq!(anthropic.status, ideaforge_types::provider::HealthStatus::Healthy);
        let openai = reports.iter().find(|r| r.provider == ProviderKind::OpenAi).unwrap();
        assert_eq!(openai.status, ideaforge_types::provider::HealthStatus::Unhealthy);
    }

    #[test]
    fn test_builder_rejects_missing_adapters() {
        let err = Router::builder().config(test_config()).build().unwrap_err();
        assert!(err.to_string().contains("no provider adapters"));
    }

    #[test]
    fn test_builder_filters_catalog_to_registered_providers() {
        let (a, _) = MockAdapter::ok(ProviderKind::Anthropic);
        let router = router(test_config(), vec![a]);
        assert_eq!(router.providers(), vec![ProviderKind::Anthropic]);
        assert!(router
            .catalog()
            .iter()
            .all(|m| m.provider == ProviderKind::Anthropic));
        assert_eq!(router.cache_backend(), "memory");
    }
}
