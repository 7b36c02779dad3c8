use anyhow::Context;
use dashboard_client::DashboardApiClient;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use triage_core::{DashboardConfig, ErrorExt, ErrorReporter};
use triage_engine::TriageDashboard;

const DEFAULT_LOG_FILTER: &str = "triage_dashboard=info,triage_engine=info,dashboard_client=info";

/// Loads the dashboard once and prints the first page of the default view
/// as JSON. Takes an optional path to a TOML config file.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    tracing::info!("Starting triage dashboard sync");

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = DashboardConfig::load(config_path.as_deref())
        .context("Failed to load dashboard configuration")?;

    let client = DashboardApiClient::new(&config.api).context("Failed to build API client")?;
    let dashboard = TriageDashboard::new(Arc::new(client), &config);

    if let Err(e) = dashboard.refresh().await {
        ErrorReporter::new().report_error(&e);
        anyhow::bail!(e.user_friendly_message());
    }

    let view = dashboard.view().await;
    tracing::info!(
        "{} mentions, {} flagged, {} ignored, {} engaged, {} opportunities",
        view.stats.total_mentions,
        view.stats.flagged_count,
        view.stats.ignored_count,
        view.stats.engaged_count,
        view.stats.opportunities
    );
    for subreddit in &view.subreddits {
        tracing::info!("{}: {} mentions", subreddit.name, subreddit.mention_count);
    }
    if view.has_more {
        tracing::info!("{} more mentions beyond the first page", view.remaining);
    }

    let output = serde_json::to_string_pretty(&view).context("Failed to serialize view")?;
    println!("{}", output);

    Ok(())
}
