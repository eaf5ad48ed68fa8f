//! Lead ingestion, one-shot binary entrypoint.
//! Reads an ingest request (JSON) from the path given as the first argument,
//! runs it against an in-memory repository and prints the result as JSON.

use anyhow::{bail, Context};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lead_ingest::ingest::config::{load_config_default, Credentials};
use lead_ingest::ingest::providers::build_integrations;
use lead_ingest::metrics::Metrics;
use lead_ingest::{IngestQuery, IngestionCoordinator, MemoryLeadRepository, ResilienceRegistry};

/// Compact logs by default; JSON lines when LOG_FORMAT=json.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lead_ingest=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let print_metrics = std::env::var("INGEST_PRINT_METRICS").is_ok_and(|v| v == "1");
    let metrics = if print_metrics { Some(Metrics::init()?) } else { None };

    let Some(request_path) = std::env::args().nth(1).map(PathBuf::from) else {
        bail!("usage: lead-ingest <request.json>");
    };
    let raw = std::fs::read_to_string(&request_path)
        .with_context(|| format!("read ingest request {}", request_path.display()))?;
    let query: IngestQuery = serde_json::from_str(&raw)
        .with_context(|| format!("parse ingest request {}", request_path.display()))?;

    let config = load_config_default()?;
    let credentials = Credentials::from_env();
    let registry = Arc::new(ResilienceRegistry::from_config(&config)?);
    let integrations = build_integrations(&config, &credentials, &registry)?;
    let repository = Arc::new(MemoryLeadRepository::new());

    let coordinator = IngestionCoordinator::new(repository.clone(), integrations, registry.clone())
        .with_max_concurrency(config.max_concurrent_sources);

    let query = query.on_progress(|ev| {
        info!(
            target: "lead_ingest::progress",
            source = %ev.source,
            trade = ?ev.trade,
            status = ?ev.status,
            found = ev.found,
            saved = ev.saved,
            duplicates = ev.duplicates,
            error = ev.error.as_deref().unwrap_or(""),
            "progress"
        );
    });

    let result = coordinator.run(&query).await?;
    info!(
        records = repository.len(),
        by_status = ?repository.count_by_status(),
        breakers = ?registry.breakers().all_stats(),
        proxies = ?registry.proxies().stats(),
        "run complete"
    );
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(m) = metrics {
        println!("{}", m.render());
    }
    Ok(())
}
