//! `budget` command: spend against limits, with a per-provider breakdown.

use anyhow::{Context, Result};
use chrono::Utc;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use ideaforge_core::budget::{DOWNGRADE_THRESHOLD, EXHAUSTED_THRESHOLD, month_start};

use crate::state::AppState;

pub async fn budget(state: &AppState, json: bool) -> Result<()> {
    let snapshot = state.router.budget_snapshot();
    let breakdown = state
        .ledger
        .by_provider(month_start(Utc::now()))
        .await
        .context("failed to read spend ledger")?;

    if json {
        let providers: Vec<_> = breakdown
            .iter()
            .map(|p| {
                serde_json::json!({
                    "provider": p.provider,
                    "calls": p.calls,
                    "tokens": p.tokens,
                    "cost": p.cost,
                })
            })
            .collect();
        let out = serde_json::json!({
            "budget": snapshot,
            "month_by_provider": providers,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {}", style("── Budget ──").dim());
    println!(
        "  Daily:       ${:.4} / ${:.2}",
        snapshot.daily_spend, snapshot.daily_limit
    );
    println!(
        "  Monthly:     ${:.4} / ${:.2}",
        snapshot.monthly_spend, snapshot.monthly_limit
    );
    println!(
        "  Utilization: {}",
        utilization_label(snapshot.utilization)
    );
    println!();

    if breakdown.is_empty() {
        println!("  {}", style("No spend recorded this month.").dim());
        println!();
        return Ok(());
    }

    println!("  {}", style("── This month by provider ──").dim());
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Provider").fg(Color::White),
        Cell::new("Calls").fg(Color::White),
        Cell::new("Tokens").fg(Color::White),
        Cell::new("Cost").fg(Color::White),
    ]);
    for row in &breakdown {
        table.add_row(vec![
            Cell::new(&row.provider).fg(Color::Cyan),
            Cell::new(row.calls).fg(Color::White),
            Cell::new(format_tokens(row.tokens)).fg(Color::White),
            Cell::new(format!("${:.4}", row.cost)).fg(Color::White),
        ]);
    }
    println!("{table}");
    println!();

    Ok(())
}

fn utilization_label(utilization: f64) -> String {
    let pct = format!("{:.1}%", utilization * 100.0);
    if utilization >= EXHAUSTED_THRESHOLD {
        format!("{} (critical requests only)", style(pct).red().bold())
    } else if utilization >= DOWNGRADE_THRESHOLD {
        format!("{} (top tier withheld)", style(pct).yellow())
    } else {
        style(pct).green().to_string()
    }
}

fn format_tokens(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
