use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::engine::model::Methodology;
use crate::error::EngineError;
use crate::http::actor::ActorExtractor;
use crate::http::envelope;
use crate::http::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListEntriesQuery {
    pub client_id: String,
    pub project_id: Option<String>,
    pub methodology: Option<Methodology>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    50
}

/// `GET /net-reduction` (filtered, paginated): role-scoped by the
/// authorization oracle, then narrowed by project/methodology if given.
pub async fn list_entries(
    State(state): State<AppState>,
    ActorExtractor(actor): ActorExtractor,
    Query(query): Query<ListEntriesQuery>,
) -> Result<axum::response::Response, EngineError> {
    state.oracle.can_read(&actor, &query.client_id)?;

    let all = match (&query.project_id, query.methodology) {
        (Some(project_id), Some(methodology)) => state.repo.list_series(&query.client_id, project_id, methodology)?,
        _ => state.repo.list_entries_for_client(&query.client_id)?,
    };

    let mut filtered: Vec<_> = all
        .into_iter()
        .filter(|e| query.project_id.as_deref().is_none_or(|p| p == e.project_id))
        .filter(|e| query.methodology.is_none_or(|m| m == e.methodology))
        .collect();
    filtered.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let start = (query.page.saturating_sub(1)) * query.page_size;
    let page: Vec<_> = filtered.into_iter().skip(start).take(query.page_size).collect();

    Ok(envelope::ok(StatusCode::OK, "entries", page))
}
