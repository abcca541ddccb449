//! Model selection: request shape -> ordered candidate list.
//!
//! The selector first picks a preferred capability tier, then ranks every
//! model at or below that tier. Within a tier, cheaper estimated cost wins;
//! ties go to the provider with more requests left in its window, then to
//! provider name so the order is deterministic.

use std::cmp::Ordering;

use ideaforge_types::config::RouterSettings;
use ideaforge_types::error::RouterError;
use ideaforge_types::provider::{CapabilityTier, ModelConfig, ProviderKind};
use ideaforge_types::request::{Priority, RouterRequest};

use crate::provider::adapter::CHARS_PER_TOKEN;
use crate::provider::effective_max_tokens;

/// A catalog entry considered for one request, with its pre-flight cost.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub model: ModelConfig,
    pub estimated_cost: f64,
}

impl Candidate {
    pub fn label(&self) -> String {
        self.model.label()
    }
}

/// Output of [`ModelSelector::select`].
#[derive(Debug, Clone)]
pub struct Selection {
    pub tier: CapabilityTier,
    pub candidates: Vec<Candidate>,
    pub reasoning: String,
}

/// Maps (task, content size, priority, budget pressure, quota headroom) to an
/// ordered list of provider+model candidates.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    catalog: Vec<ModelConfig>,
    long_context_threshold_chars: usize,
    enable_cost_optimization: bool,
}

impl ModelSelector {
    pub fn new(
        catalog: Vec<ModelConfig>,
        settings: &RouterSettings,
        enable_cost_optimization: bool,
    ) -> Self {
        Self {
            catalog,
            long_context_threshold_chars: settings.long_context_threshold_chars,
            enable_cost_optimization,
        }
    }

    pub fn catalog(&self) -> &[ModelConfig] {
        &self.catalog
    }

    /// Cheapest model for a provider, by combined per-token price.
    pub fn cheapest_model(&self, provider: ProviderKind) -> Option<&ModelConfig> {
        self.catalog
            .iter()
            .filter(|m| m.provider == provider)
            .min_by(|a, b| {
                (a.input_cost_per_million + a.output_cost_per_million)
                    .total_cmp(&(b.input_cost_per_million + b.output_cost_per_million))
            })
    }

    /// Tier selection is capped at for this request.
    ///
    /// With `withhold_top_tier` (budget pressure) the cap sits one tier
    /// below the highest eligible model, so a catalog topping out at
    /// standard drops to economy. `None` when nothing can sit below the top
    /// tier. Used as part of the cache key, so it has to agree with the tier
    /// [`ModelSelector::select`] settles on.
    pub fn effective_tier(
        &self,
        request: &RouterRequest,
        withhold_top_tier: bool,
        estimate: impl Fn(&ModelConfig) -> f64,
    ) -> Result<Option<CapabilityTier>, RouterError> {
        let pool = self.eligible(request)?;
        let (preferred, _) = self.choose_tier(request, &pool, &estimate);
        Ok(cap_tier(&pool, preferred, withhold_top_tier))
    }

    /// Produce the ordered candidate list.
    ///
    /// `withhold_top_tier` is the budget downgrade; `requests_remaining`
    /// reports quota headroom per provider for tie-breaking. The list may
    /// come back empty when the downgrade removes everything the request
    /// could run on.
    pub fn select(
        &self,
        request: &RouterRequest,
        withhold_top_tier: bool,
        estimate: impl Fn(&ModelConfig) -> f64,
        requests_remaining: impl Fn(ProviderKind) -> u32,
    ) -> Result<Selection, RouterError> {
        let pool = self.eligible(request)?;
        let (preferred, why) = self.choose_tier(request, &pool, &estimate);
        let mut reasoning = format!(
            "task {} (priority {}) prefers {preferred} tier: {why}",
            request.task_type, request.priority
        );

        let Some(tier) = cap_tier(&pool, preferred, withhold_top_tier) else {
            reasoning.push_str("; budget withholds the only tier available");
            return Ok(Selection {
                tier: preferred,
                candidates: Vec::new(),
                reasoning,
            });
        };

        let mut candidates: Vec<(Candidate, u32)> = pool
            .iter()
            .filter(|m| m.tier <= tier)
            .map(|m| {
                (
                    Candidate {
                        model: (*m).clone(),
                        estimated_cost: estimate(m),
                    },
                    requests_remaining(m.provider),
                )
            })
            .collect();

        candidates.sort_by(|(a, a_room), (b, b_room)| {
            b.model
                .tier
                .cmp(&a.model.tier)
                .then_with(|| a.estimated_cost.total_cmp(&b.estimated_cost))
                .then_with(|| b_room.cmp(a_room))
                .then_with(|| cmp_provider(a.model.provider, b.model.provider))
                .then_with(|| a.model.model_name.cmp(&b.model.model_name))
        });
        let candidates: Vec<Candidate> = candidates.into_iter().map(|(c, _)| c).collect();

        if tier != preferred {
            reasoning.push_str(&format!("; budget caps selection at {tier}"));
        }
        reasoning.push_str(&format!("; {} candidate(s)", candidates.len()));

        Ok(Selection {
            tier,
            candidates,
            reasoning,
        })
    }

    /// Catalog entries able to hold the request. Only long-context requests
    /// are filtered here; if nothing fits, no model can serve the request.
    fn eligible(&self, request: &RouterRequest) -> Result<Vec<&ModelConfig>, RouterError> {
        let content_len = request.content_len();
        if content_len <= self.long_context_threshold_chars {
            return Ok(self.catalog.iter().collect());
        }

        let input_tokens = content_len / CHARS_PER_TOKEN;
        let pool: Vec<&ModelConfig> = self
            .catalog
            .iter()
            .filter(|m| {
                let needed = input_tokens + effective_max_tokens(request, m) as usize;
                m.context_window as usize >= needed
            })
            .collect();

        if pool.is_empty() {
            return Err(RouterError::NoCandidates(format!(
                "{content_len} characters exceeds every model's context window"
            )));
        }
        Ok(pool)
    }

    fn choose_tier(
        &self,
        request: &RouterRequest,
        pool: &[&ModelConfig],
        estimate: &impl Fn(&ModelConfig) -> f64,
    ) -> (CapabilityTier, &'static str) {
        let highest = highest_tier(pool);

        if request.content_len() > self.long_context_threshold_chars {
            return (highest, "long context");
        }
        if request.priority >= Priority::High {
            return (highest, "high priority");
        }
        if request.task_type.is_quality_sensitive() {
            return (highest, "quality-sensitive task");
        }

        if !self.enable_cost_optimization {
            if pool.iter().any(|m| m.tier == CapabilityTier::Standard) {
                return (CapabilityTier::Standard, "cost optimization disabled");
            }
            return (highest, "cost optimization disabled");
        }

        let wanted = request.max_tokens.unwrap_or(0);
        pool.iter()
            .filter(|m| m.max_output_tokens >= wanted)
            .min_by(|a, b| estimate(a).total_cmp(&estimate(b)))
            .map(|m| (m.tier, "lowest-cost adequate model"))
            .unwrap_or((highest, "no model meets max_tokens"))
    }
}

fn highest_tier(pool: &[&ModelConfig]) -> CapabilityTier {
    pool.iter()
        .map(|m| m.tier)
        .max()
        .unwrap_or(CapabilityTier::Standard)
}

/// `preferred`, lowered below the pool's top tier when that tier is withheld.
fn cap_tier(
    pool: &[&ModelConfig],
    preferred: CapabilityTier,
    withhold_top_tier: bool,
) -> Option<CapabilityTier> {
    if !withhold_top_tier {
        return Some(preferred);
    }
    let ceiling = highest_tier(pool).lower()?;
    Some(preferred.min(ceiling))
}

fn cmp_provider(a: ProviderKind, b: ProviderKind) -> Ordering {
    a.to_string().cmp(&b.to_string())
}
