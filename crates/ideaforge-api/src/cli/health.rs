//! `health` command: provider health checks plus rate-limit windows.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use ideaforge_types::provider::HealthStatus;

use crate::state::AppState;

/// Health-check every registered provider and print health and quota state.
pub async fn health(state: &AppState, json: bool) -> Result<()> {
    let reports = state.router.health_check_all().await;
    let limits = state.router.rate_limit_snapshots();

    if json {
        let out = serde_json::json!({
            "providers": reports,
            "rate_limits": limits,
            "cache": state.router.cache_backend(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {}", style("Provider Health").bold());
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Provider").fg(Color::White),
        Cell::new("Model").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Latency").fg(Color::White),
        Cell::new("Requests Left").fg(Color::White),
        Cell::new("Tokens Left").fg(Color::White),
        Cell::new("Window Resets").fg(Color::White),
        Cell::new("Error").fg(Color::White),
    ]);

    for report in &reports {
        let status_cell = match report.status {
            HealthStatus::Healthy => Cell::new("healthy").fg(Color::Green),
            HealthStatus::Degraded => Cell::new("degraded").fg(Color::Yellow),
            HealthStatus::Unhealthy => Cell::new("UNHEALTHY").fg(Color::Red),
        };

        let limit = limits.iter().find(|l| l.provider == report.provider);
        let (requests, tokens, resets) = match limit {
            Some(l) => (
                format!("{}/{}", l.requests_remaining, l.requests_per_window),
                format!("{}/{}", l.tokens_remaining, l.tokens_per_window),
                l.window_reset_at.format("%H:%M:%S").to_string(),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string()),
        };

        table.add_row(vec![
            Cell::new(report.provider).fg(Color::Cyan),
            Cell::new(&report.model).fg(Color::DarkGrey),
            status_cell,
            Cell::new(format!("{}ms", report.latency_ms)).fg(Color::White),
            Cell::new(requests).fg(Color::White),
            Cell::new(tokens).fg(Color::White),
            Cell::new(resets).fg(Color::DarkGrey),
            Cell::new(truncate(report.error.as_deref().unwrap_or("-"), 40)).fg(Color::DarkGrey),
        ]);
    }

    println!("{table}");
    println!();

    let healthy = reports
        .iter()
        .filter(|r| r.status == HealthStatus::Healthy)
        .count();
    println!(
        "  {}/{} provider{} healthy  {}",
        style(healthy).bold(),
        reports.len(),
        if reports.len() == 1 { "" } else { "s" },
        style(format!("cache: {}", state.router.cache_backend())).dim()
    );
    println!();

    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{head}...")
}
