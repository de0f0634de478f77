//! CLI binary for MAV Explorer
//!
//! Starts the HTTP service that decodes uploaded DataFlash logs and answers
//! queries against them.

use anyhow::{Context, Result};
use mav_explorer::config::{build_command, config_from_matches};
use mav_explorer::graphs::GraphCatalog;
use mav_explorer::server;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "mav_explorer={},tower_http={}",
            default_level, default_level
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .init();
}

fn main() -> Result<()> {
    let matches = build_command().get_matches();
    let config = config_from_matches(&matches);
    init_tracing(config.debug);
    debug!(?config, "configuration");

    let catalog = if config.graph_patterns.is_empty() {
        GraphCatalog::builtin().context("Failed to load built-in graph catalog")?
    } else {
        GraphCatalog::load_patterns(&config.graph_patterns).with_context(|| {
            format!("Failed to load graph catalog from {:?}", config.graph_patterns)
        })?
    };
    info!(
        graphs = catalog.len(),
        max_sessions = config.max_sessions,
        upload_ttl_secs = config.upload_ttl.as_secs(),
        "starting MAV Explorer {}",
        env!("CARGO_PKG_VERSION")
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime
        .block_on(server::serve(config.clone(), catalog))
        .with_context(|| format!("Server on {} failed", config.bind))?;
    Ok(())
}
