//! Router request/response types for IdeaForge.
//!
//! A [`RouterRequest`] is what an agent hands to the router; a
//! [`RouterResponse`] is what it always gets back on success.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Kind of work an agent is asking for. Drives model selection and cache TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    IdeaGeneration,
    MarketResearch,
    CompetitorAnalysis,
    FinancialModel,
    BusinessPlan,
    MarketSignals,
    General,
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::IdeaGeneration,
        TaskType::MarketResearch,
        TaskType::CompetitorAnalysis,
        TaskType::FinancialModel,
        TaskType::BusinessPlan,
        TaskType::MarketSignals,
        TaskType::General,
    ];

    /// Tasks whose output quality matters enough to prefer the top tier.
    pub fn is_quality_sensitive(&self) -> bool {
        matches!(self, TaskType::BusinessPlan | TaskType::FinancialModel)
    }

    /// How long a cached response for this task stays valid.
    ///
    /// Stable, expensive artifacts live for hours; market signal
    /// snapshots go stale within the hour.
    pub fn default_cache_ttl(&self) -> Duration {
        let hours = match self {
            TaskType::BusinessPlan => 24,
            TaskType::FinancialModel => 12,
            TaskType::MarketResearch | TaskType::CompetitorAnalysis => 6,
            TaskType::IdeaGeneration => 2,
            TaskType::MarketSignals | TaskType::General => 1,
        };
        Duration::from_secs(hours * 3600)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::IdeaGeneration => "idea_generation",
            TaskType::MarketResearch => "market_research",
            TaskType::CompetitorAnalysis => "competitor_analysis",
            TaskType::FinancialModel => "financial_model",
            TaskType::BusinessPlan => "business_plan",
            TaskType::MarketSignals => "market_signals",
            TaskType::General => "general",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "idea_generation" => Ok(TaskType::IdeaGeneration),
            "market_research" => Ok(TaskType::MarketResearch),
            "competitor_analysis" => Ok(TaskType::CompetitorAnalysis),
            "financial_model" => Ok(TaskType::FinancialModel),
            "business_plan" => Ok(TaskType::BusinessPlan),
            "market_signals" => Ok(TaskType::MarketSignals),
            "general" => Ok(TaskType::General),
            other => Err(format!("invalid task type: '{other}'")),
        }
    }
}

/// Caller-assigned urgency. Ordering is meaningful: `Low < ... < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("invalid priority: '{other}'")),
        }
    }
}

/// A request to the router. Immutable once issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterRequest {
    pub task_type: TaskType,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub request_id: String,
}

impl RouterRequest {
    /// Create a medium-priority request with a fresh time-sortable request ID.
    pub fn new(task_type: TaskType, prompt: impl Into<String>) -> Self {
        Self {
            task_type,
            prompt: prompt.into(),
            context: None,
            max_tokens: None,
            temperature: None,
            priority: Priority::default(),
            user_id: None,
            request_id: Uuid::now_v7().to_string(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Characters of prompt plus context; input to the long-context check.
    pub fn content_len(&self) -> usize {
        self.prompt.chars().count() + self.context.as_deref().map_or(0, |c| c.chars().count())
    }
}

/// What every successful `route` call returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterResponse {
    pub request_id: String,
    pub content: String,
    pub provider: String,
    pub model: String,
    pub tokens_used: u32,
    /// USD charged for this call; zero for cache hits.
    pub cost: f64,
    pub cached: bool,
    pub latency_ms: u64,
    pub fallback_used: bool,
    pub reasoning: String,
}

/// Diagnostic record of how a request was (or would be) routed. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub request_id: String,
    /// Ordered `provider/model` labels.
    pub candidates: Vec<String>,
    pub chosen: Option<String>,
    pub fallback_used: bool,
    pub cached: bool,
    pub reasoning: String,
}
