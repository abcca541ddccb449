//! `route` and `plan` commands.

use anyhow::{Context, Result};
use console::style;
use tokio_util::sync::CancellationToken;

use ideaforge_types::request::RouterRequest;

use super::RequestArgs;
use crate::state::AppState;

/// Turn CLI arguments into a router request, reading the context file if given.
pub async fn build_request(args: RequestArgs) -> Result<RouterRequest> {
    let mut request = RouterRequest::new(args.task, args.prompt).with_priority(args.priority);

    if let Some(path) = &args.context_file {
        let context = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read context file {}", path.display()))?;
        request = request.with_context(context);
    }
    if let Some(max_tokens) = args.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }
    if let Some(temperature) = args.temperature {
        request = request.with_temperature(temperature);
    }
    if let Some(user) = args.user {
        request = request.with_user(user);
    }
    Ok(request)
}

/// Route one request. Ctrl-C cancels the in-flight provider call.
pub async fn route(state: &AppState, args: RequestArgs, json: bool) -> Result<()> {
    let request = build_request(args).await?;

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let result = state.router.route(request, &cancel).await;
    watcher.abort();

    let response = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}", response.content);
    println!();

    let source = if response.cached {
        style("cached").green().to_string()
    } else if response.fallback_used {
        style("fallback").yellow().to_string()
    } else {
        style("primary").cyan().to_string()
    };
    println!(
        "  {} {}/{} [{}]  {} tokens  ${:.6}  {}ms",
        style("→").dim(),
        response.provider,
        response.model,
        source,
        response.tokens_used,
        response.cost,
        response.latency_ms,
    );
    println!("  {}", style(&response.reasoning).dim());

    Ok(())
}

/// Show the route decision without dispatching.
pub async fn plan(state: &AppState, args: RequestArgs, json: bool) -> Result<()> {
    let request = build_request(args).await?;
    let decision = state.router.plan(&request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }

    println!();
    match &decision.chosen {
        Some(chosen) if decision.cached => {
            println!("  {} {} (cache hit)", style("✓").green().bold(), style(chosen).bold());
        }
        Some(chosen) => {
            println!("  {} {}", style("✓").green().bold(), style(chosen).bold());
        }
        None => {
            println!(
                "  {} every candidate is rate limited right now",
                style("✗").red().bold()
            );
        }
    }

    if !decision.candidates.is_empty() {
        println!();
        println!("  {}", style("── Candidates ──").dim());
        for (i, label) in decision.candidates.iter().enumerate() {
            let marker = if decision.chosen.as_deref() == Some(label.as_str()) {
                style("*").green().to_string()
            } else {
                " ".to_string()
            };
            println!("  {marker} {}. {label}", i + 1);
        }
    }

    println!();
    println!("  {}", style(&decision.reasoning).dim());
    println!();
    Ok(())
}
