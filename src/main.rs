use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use net_reduction_engine::config::EngineConfig;
use net_reduction_engine::engine::authz::RoleBasedOracle;
use net_reduction_engine::engine::events::EventBus;
use net_reduction_engine::engine::expr::FormulaCache;
use net_reduction_engine::http::routes;
use net_reduction_engine::http::state::AppState;
use net_reduction_engine::repository::SqliteRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("net_reduction_engine=debug,tower_http=debug")),
        )
        .init();

    let config_path = std::env::var("NET_REDUCTION_CONFIG").unwrap_or_else(|_| "net_reduction.toml".to_string());
    let config = EngineConfig::load(&config_path)?;

    let repo = Arc::new(SqliteRepository::open(&config.storage.db_path)?);
    tracing::info!("repository opened at {}", config.storage.db_path);

    let state = AppState {
        repo,
        oracle: Arc::new(RoleBasedOracle),
        cache: Arc::new(FormulaCache::new()),
        bus: Arc::new(EventBus::new()),
    };

    let app = routes::build(state);

    let addr_str = std::env::var("NET_REDUCTION_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let addr: SocketAddr = addr_str.parse()?;
    tracing::info!("net-reduction-engine listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
