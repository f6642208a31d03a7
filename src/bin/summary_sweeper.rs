use std::time::Duration;

use tracing_subscriber::EnvFilter;

use net_reduction_engine::config::EngineConfig;
use net_reduction_engine::engine::repository::ReductionRepository;
use net_reduction_engine::engine::summary;
use net_reduction_engine::repository::SqliteRepository;

/// Background sweeper: periodically recomputes every known client's
/// summaries so dashboards stay warm even when a client has no recent
/// writes to trigger the per-entry recompute path (§4.7).
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("net_reduction_engine=debug")))
        .init();

    let config_path = std::env::var("NET_REDUCTION_CONFIG").unwrap_or_else(|_| "net_reduction.toml".to_string());
    let config = EngineConfig::load(&config_path)?;

    let repo = SqliteRepository::open(&config.storage.db_path)?;
    tracing::info!("summary-sweeper starting, interval {}s", config.summary.sweep_interval_secs);

    let mut ticker = tokio::time::interval(Duration::from_secs(config.summary.sweep_interval_secs));
    loop {
        ticker.tick().await;
        let clients = match repo.list_known_clients() {
            Ok(clients) => clients,
            Err(e) => {
                tracing::error!("sweeper failed to list clients: {e}");
                continue;
            }
        };
        for client_id in clients {
            if let Err(e) = summary::recompute_client_summaries(&repo, &client_id, chrono::Utc::now()) {
                tracing::error!("sweeper failed to recompute summaries for {client_id}: {e}");
            }
        }
    }
}
