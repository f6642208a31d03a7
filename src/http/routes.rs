use axum::Router;
use axum::routing::{get, patch, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

pub fn build(state: AppState) -> Router {
    Router::new()
        .route(
            "/net-reduction/{clientId}/{projectId}/{methodology}/manual",
            post(handlers::ingest::manual_entry),
        )
        .route(
            "/net-reduction/{clientId}/{projectId}/{methodology}/api",
            post(handlers::ingest::api_entry),
        )
        .route(
            "/net-reduction/{clientId}/{projectId}/{methodology}/iot",
            post(handlers::ingest::iot_entry),
        )
        .route(
            "/net-reduction/{clientId}/{projectId}/{methodology}/csv",
            post(handlers::csv::upload_csv),
        )
        .route(
            "/net-reduction/{clientId}/{projectId}/{methodology}/manual/{entryId}",
            patch(handlers::ingest::edit_manual_entry).delete(handlers::ingest::delete_manual_entry),
        )
        .route("/net-reduction", get(handlers::entries::list_entries))
        .route("/net-reduction/summary/{clientId}", get(handlers::summary::client_summary))
        .route(
            "/net-reduction/summary/{clientId}/{projectId}",
            get(handlers::summary::project_summary),
        )
        .route(
            "/net-reduction/{clientId}/{projectId}/input-type",
            patch(handlers::channel::switch_input_type),
        )
        .route("/net-reduction/{clientId}/{projectId}/disconnect", post(handlers::channel::disconnect))
        .route("/net-reduction/{clientId}/{projectId}/reconnect", post(handlers::channel::reconnect))
        .route("/healthz", get(handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
