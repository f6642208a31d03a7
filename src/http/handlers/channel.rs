use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::engine::{channel, methodology};
use crate::error::EngineError;
use crate::http::actor::ActorExtractor;
use crate::http::envelope;
use crate::http::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SwitchInputTypeBody {
    pub input_type: crate::engine::model::InputType,
}

pub async fn switch_input_type(
    State(state): State<AppState>,
    ActorExtractor(actor): ActorExtractor,
    Path((client_id, project_id)): Path<(String, String)>,
    axum::Json(body): axum::Json<SwitchInputTypeBody>,
) -> Result<axum::response::Response, EngineError> {
    state.oracle.can_manage_channel(&actor, &client_id)?;
    let mut project = state.repo.load_project(&client_id, &project_id)?;
    channel::switch_input_type(&mut project.channel, body.input_type);
    methodology::recompute_derived(&mut project);
    state.repo.save_project(&project)?;
    Ok(envelope::ok(StatusCode::OK, "channel switched", project.channel))
}

#[derive(Debug, Deserialize, Default)]
pub struct ReconnectBody {
    pub api_endpoint: Option<String>,
}

pub async fn disconnect(
    State(state): State<AppState>,
    ActorExtractor(actor): ActorExtractor,
    Path((client_id, project_id)): Path<(String, String)>,
) -> Result<axum::response::Response, EngineError> {
    state.oracle.can_manage_channel(&actor, &client_id)?;
    let mut project = state.repo.load_project(&client_id, &project_id)?;
    channel::disconnect(&mut project.channel)?;
    methodology::recompute_derived(&mut project);
    state.repo.save_project(&project)?;
    Ok(envelope::ok(StatusCode::OK, "channel disconnected", project.channel))
}

pub async fn reconnect(
    State(state): State<AppState>,
    ActorExtractor(actor): ActorExtractor,
    Path((client_id, project_id)): Path<(String, String)>,
    axum::Json(body): axum::Json<ReconnectBody>,
) -> Result<axum::response::Response, EngineError> {
    state.oracle.can_manage_channel(&actor, &client_id)?;
    let mut project = state.repo.load_project(&client_id, &project_id)?;
    channel::reconnect(&mut project.channel, body.api_endpoint)?;
    methodology::recompute_derived(&mut project);
    state.repo.save_project(&project)?;
    Ok(envelope::ok(StatusCode::OK, "channel reconnected", project.channel))
}
