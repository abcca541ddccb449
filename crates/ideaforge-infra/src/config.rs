//! Router configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.ideaforge/` by default)
//! into a [`RouterConfig`], then applies `IDEAFORGE_*` environment
//! overrides and validates the result. A missing file means defaults; a
//! malformed one logs a warning and also means defaults.

use std::path::{Path, PathBuf};

use ideaforge_types::config::RouterConfig;
use ideaforge_types::error::ConfigError;

pub const ENV_DATA_DIR: &str = "IDEAFORGE_DATA_DIR";
pub const ENV_ENVIRONMENT: &str = "IDEAFORGE_ENVIRONMENT";
pub const ENV_ENABLE_COST_OPTIMIZATION: &str = "IDEAFORGE_ENABLE_COST_OPTIMIZATION";
pub const ENV_DAILY_BUDGET_LIMIT: &str = "IDEAFORGE_DAILY_BUDGET_LIMIT";
pub const ENV_MONTHLY_BUDGET_LIMIT: &str = "IDEAFORGE_MONTHLY_BUDGET_LIMIT";
pub const ENV_CACHE_URL: &str = "IDEAFORGE_CACHE_URL";
pub const ENV_DATABASE_URL: &str = "IDEAFORGE_DATABASE_URL";

/// Resolve the data directory: `IDEAFORGE_DATA_DIR`, else `~/.ideaforge`.
pub fn data_dir() -> PathBuf {
    match std::env::var(ENV_DATA_DIR) {
        Ok(dir) if !dir.trim().is_empty() => return PathBuf::from(dir),
        _ => {}
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ideaforge")
}

/// Spend ledger location when `database_url` is not configured.
pub fn default_database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join("ideaforge.db").display())
}

/// Load `{data_dir}/config.toml` without env overrides or validation.
pub async fn load_router_config(data_dir: &Path) -> RouterConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return RouterConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return RouterConfig::default();
        }
    };

    match toml::from_str::<RouterConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            RouterConfig::default()
        }
    }
}

/// Apply `IDEAFORGE_*` overrides from `lookup` (normally `std::env::var`).
///
/// Empty values are ignored. Unparseable numbers or booleans are errors,
/// not silent fallbacks.
pub fn apply_env_overrides<F>(config: &mut RouterConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let invalid = |key: &str, value: &str| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    };

    if let Some(value) = get(ENV_ENVIRONMENT) {
        config.environment = value.trim().to_string();
    }
    if let Some(value) = get(ENV_ENABLE_COST_OPTIMIZATION) {
        config.enable_cost_optimization = parse_bool(&value)
            .ok_or_else(|| invalid(ENV_ENABLE_COST_OPTIMIZATION, &value))?;
    }
    if let Some(value) = get(ENV_DAILY_BUDGET_LIMIT) {
        config.daily_budget_limit = value
            .trim()
            .parse()
            .map_err(|_| invalid(ENV_DAILY_BUDGET_LIMIT, &value))?;
    }
    if let Some(value) = get(ENV_MONTHLY_BUDGET_LIMIT) {
        config.monthly_budget_limit = value
            .trim()
            .parse()
            .map_err(|_| invalid(ENV_MONTHLY_BUDGET_LIMIT, &value))?;
    }
    if let Some(value) = get(ENV_CACHE_URL) {
        config.cache_url = Some(value.trim().to_string());
    }
    if let Some(value) = get(ENV_DATABASE_URL) {
        config.database_url = Some(value.trim().to_string());
    }
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Full startup load: file, then process env overrides, then validation.
pub async fn load_config(data_dir: &Path) -> Result<RouterConfig, ConfigError> {
    let mut config = load_router_config(data_dir).await;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}
