use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::engine::summary;
use crate::error::EngineError;
use crate::http::actor::ActorExtractor;
use crate::http::envelope;
use crate::http::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    #[serde(default)]
    pub refresh: bool,
}

pub async fn client_summary(
    State(state): State<AppState>,
    ActorExtractor(actor): ActorExtractor,
    Path(client_id): Path<String>,
    Query(query): Query<SummaryQuery>,
) -> Result<axum::response::Response, EngineError> {
    state.oracle.can_read(&actor, &client_id)?;

    let doc = if query.refresh {
        summary::recompute_client_summaries(state.repo.as_ref(), &client_id, chrono::Utc::now())?
    } else if let Some(existing) = state.repo.load_client_summary(&client_id)? {
        existing
    } else {
        summary::recompute_client_summaries(state.repo.as_ref(), &client_id, chrono::Utc::now())?
    };

    Ok(envelope::ok(StatusCode::OK, "summary", doc))
}

pub async fn project_summary(
    State(state): State<AppState>,
    ActorExtractor(actor): ActorExtractor,
    Path((client_id, project_id)): Path<(String, String)>,
) -> Result<axum::response::Response, EngineError> {
    state.oracle.can_read(&actor, &client_id)?;
    let doc = match state.repo.load_client_summary(&client_id)? {
        Some(existing) => existing,
        None => summary::recompute_client_summaries(state.repo.as_ref(), &client_id, chrono::Utc::now())?,
    };

    let project_slices: std::collections::BTreeMap<_, _> = doc
        .periods
        .iter()
        .map(|(period, s)| {
            let row = s.by_project.iter().find(|r| r.project_id == project_id).cloned();
            (*period, row)
        })
        .collect();

    Ok(envelope::ok(StatusCode::OK, "project summary", project_slices))
}
