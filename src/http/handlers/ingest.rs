use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use crate::engine::entry_store::{self, IngestRequest};
use crate::engine::methodology::EntryInput;
use crate::engine::model::{InputType, Methodology, SourceDetails};
use crate::error::EngineError;
use crate::http::actor::ActorExtractor;
use crate::http::envelope;
use crate::http::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SingleEntryBody {
    pub date: Option<String>,
    pub time: Option<String>,
    pub value: Option<f64>,
    #[serde(default)]
    pub variables: BTreeMap<String, f64>,
    #[serde(default)]
    pub entry: BTreeMap<String, BTreeMap<String, f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ManualEntryBody {
    Batch { entries: Vec<SingleEntryBody> },
    Single(SingleEntryBody),
}

fn to_entry_input(body: &SingleEntryBody) -> EntryInput {
    EntryInput {
        input_value: body.value,
        variables: body.variables.clone(),
        m3_manual: body.entry.clone(),
    }
}

fn parse_methodology(raw: &str) -> Result<Methodology, EngineError> {
    raw.parse().map_err(EngineError::ValidationError)
}

pub async fn manual_entry(
    State(state): State<AppState>,
    ActorExtractor(actor): ActorExtractor,
    Path((client_id, project_id, methodology)): Path<(String, String, String)>,
    Json(body): Json<ManualEntryBody>,
) -> Result<Response, EngineError> {
    state.oracle.can_write(&actor, &client_id)?;
    let methodology = parse_methodology(&methodology)?;

    let bodies = match body {
        ManualEntryBody::Batch { entries } => entries,
        ManualEntryBody::Single(single) => vec![single],
    };

    let mut saved = Vec::new();
    let mut errors = Vec::new();
    for (i, single) in bodies.iter().enumerate() {
        let req = IngestRequest {
            client_id: &client_id,
            project_id: &project_id,
            methodology,
            input_type: InputType::Manual,
            original_input_type: "manual",
            source: SourceDetails {
                uploaded_by: Some(actor.id.clone()),
                data_source: "manual".to_string(),
                api_endpoint: None,
                iot_device_id: None,
                file_name: None,
            },
            date: single.date.as_deref(),
            time: single.time.as_deref(),
            entry_input: to_entry_input(single),
        };
        match entry_store::ingest_entry(state.repo.as_ref(), &state.cache, &state.bus, req) {
            Ok(entry) => saved.push(entry),
            Err(e) => errors.push(json!({ "row": i + 1, "error": e.to_string() })),
        }
    }

    if saved.is_empty() && !errors.is_empty() {
        // A single-entry request that failed should surface as a normal
        // request failure rather than a 201 with an empty saved[] (§7:
        // "single-entry handlers fail the whole request with the first error").
        if bodies.len() == 1 {
            let message = errors[0]["error"].as_str().unwrap_or("validation error").to_string();
            return Err(EngineError::ValidationError(message));
        }
    }

    Ok(envelope::ok(StatusCode::CREATED, "entry recorded", json!({ "saved": saved, "errors": errors })))
}

pub async fn api_entry(
    State(state): State<AppState>,
    Path((client_id, project_id, methodology)): Path<(String, String, String)>,
    Json(body): Json<SingleEntryBody>,
) -> Result<Response, EngineError> {
    let methodology = parse_methodology(&methodology)?;
    let req = IngestRequest {
        client_id: &client_id,
        project_id: &project_id,
        methodology,
        input_type: InputType::Api,
        original_input_type: "API",
        source: SourceDetails { uploaded_by: None, data_source: "API".to_string(), api_endpoint: None, iot_device_id: None, file_name: None },
        date: body.date.as_deref(),
        time: body.time.as_deref(),
        entry_input: to_entry_input(&body),
    };
    let entry = entry_store::ingest_entry(state.repo.as_ref(), &state.cache, &state.bus, req)?;
    Ok(envelope::ok(StatusCode::CREATED, "entry recorded", entry))
}

pub async fn iot_entry(
    State(state): State<AppState>,
    Path((client_id, project_id, methodology)): Path<(String, String, String)>,
    Json(body): Json<SingleEntryBody>,
) -> Result<Response, EngineError> {
    let methodology = parse_methodology(&methodology)?;
    let req = IngestRequest {
        client_id: &client_id,
        project_id: &project_id,
        methodology,
        input_type: InputType::Iot,
        original_input_type: "IOT",
        source: SourceDetails { uploaded_by: None, data_source: "IOT".to_string(), api_endpoint: None, iot_device_id: None, file_name: None },
        date: body.date.as_deref(),
        time: body.time.as_deref(),
        entry_input: to_entry_input(&body),
    };
    let entry = entry_store::ingest_entry(state.repo.as_ref(), &state.cache, &state.bus, req)?;
    Ok(envelope::ok(StatusCode::CREATED, "entry recorded", entry))
}

#[derive(Debug, Deserialize)]
pub struct EditEntryBody {
    pub value: Option<f64>,
    #[serde(default)]
    pub variables: BTreeMap<String, f64>,
    #[serde(default)]
    pub entry: BTreeMap<String, BTreeMap<String, f64>>,
}

pub async fn edit_manual_entry(
    State(state): State<AppState>,
    ActorExtractor(actor): ActorExtractor,
    Path((client_id, _project_id, _methodology, entry_id)): Path<(String, String, String, String)>,
    Json(body): Json<EditEntryBody>,
) -> Result<impl IntoResponse, EngineError> {
    state.oracle.can_write(&actor, &client_id)?;
    let input = EntryInput {
        input_value: body.value,
        variables: body.variables,
        m3_manual: body.entry,
    };
    let entry = entry_store::edit_manual_entry(state.repo.as_ref(), &state.cache, &state.bus, &client_id, &entry_id, input)?;
    Ok(envelope::ok(StatusCode::OK, "entry updated", entry))
}

pub async fn delete_manual_entry(
    State(state): State<AppState>,
    ActorExtractor(actor): ActorExtractor,
    Path((client_id, _project_id, _methodology, entry_id)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, EngineError> {
    state.oracle.can_write(&actor, &client_id)?;
    entry_store::delete_manual_entry(state.repo.as_ref(), &state.bus, &client_id, &entry_id)?;
    Ok(envelope::ok_empty(StatusCode::OK, "entry deleted"))
}
