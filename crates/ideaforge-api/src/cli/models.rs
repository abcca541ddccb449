//! `models` command: the catalog of dispatchable models.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use ideaforge_types::provider::{CapabilityTier, ModelConfig};

use crate::state::AppState;

pub fn models(state: &AppState, json: bool) -> Result<()> {
    let catalog = sorted_catalog(state.router.catalog());

    if json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    println!();
    println!("  {}", style("Model Catalog").bold());
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Tier").fg(Color::White),
        Cell::new("Provider").fg(Color::White),
        Cell::new("Model").fg(Color::White),
        Cell::new("Input $/M").fg(Color::White),
        Cell::new("Output $/M").fg(Color::White),
        Cell::new("Context").fg(Color::White),
        Cell::new("Max Output").fg(Color::White),
    ]);

    for model in &catalog {
        let tier_cell = match model.tier {
            CapabilityTier::Premium => Cell::new("premium").fg(Color::Magenta),
            CapabilityTier::Standard => Cell::new("standard").fg(Color::Cyan),
            CapabilityTier::Economy => Cell::new("economy").fg(Color::Green),
        };
        table.add_row(vec![
            tier_cell,
            Cell::new(model.provider).fg(Color::White),
            Cell::new(&model.model_name).fg(Color::White),
            Cell::new(format!("{:.2}", model.input_cost_per_million)).fg(Color::DarkGrey),
            Cell::new(format!("{:.2}", model.output_cost_per_million)).fg(Color::DarkGrey),
            Cell::new(model.context_window).fg(Color::DarkGrey),
            Cell::new(model.max_output_tokens).fg(Color::DarkGrey),
        ]);
    }

    println!("{table}");
    println!();
    println!(
        "  {} model{} across {}",
        style(catalog.len()).bold(),
        if catalog.len() == 1 { "" } else { "s" },
        state
            .router
            .providers()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();

    Ok(())
}

/// Premium first, then by provider and price.
fn sorted_catalog(catalog: &[ModelConfig]) -> Vec<&ModelConfig> {
    let mut models: Vec<&ModelConfig> = catalog.iter().collect();
    models.sort_by(|a, b| {
        b.tier
            .cmp(&a.tier)
            .then(a.provider.cmp(&b.provider))
            .then(a.output_cost_per_million.total_cmp(&b.output_cost_per_million))
    });
    models
}

#[cfg(test)]
mod tests {
    use super::*;
    use ideaforge_types::config::default_model_catalog;

    #[test]
    fn test_sorted_catalog_premium_first() {
        let catalog = default_model_catalog();
        let sorted = sorted_catalog(&catalog);

        assert_eq!(sorted.len(), catalog.len());
        assert_eq!(sorted[0].tier, CapabilityTier::Premium);
        assert_eq!(sorted.last().unwrap().tier, CapabilityTier::Economy);
        for pair in sorted.windows(2) {
            assert!(pair[0].tier >= pair[1].tier);
        }
    }
}
