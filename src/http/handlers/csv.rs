use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde_json::json;

use crate::csv_import;
use crate::engine::entry_store::{self, IngestRequest};
use crate::engine::model::{InputType, SourceDetails};
use crate::error::EngineError;
use crate::http::actor::ActorExtractor;
use crate::http::envelope;
use crate::http::state::AppState;

/// Multipart CSV upload (§6). Staged upload cleanup is best-effort: since
/// the body is read fully into memory here, there is no temp file to clean
/// up, but a failure in row commit must never fail the overall response.
pub async fn upload_csv(
    State(state): State<AppState>,
    ActorExtractor(actor): ActorExtractor,
    Path((client_id, project_id, methodology)): Path<(String, String, String)>,
    mut multipart: Multipart,
) -> Result<Response, EngineError> {
    state.oracle.can_write(&actor, &client_id)?;
    let methodology: crate::engine::model::Methodology =
        methodology.parse().map_err(EngineError::ValidationError)?;

    let mut file_name = None;
    let mut csv_text = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| EngineError::ValidationError(e.to_string()))? {
        if field.name() == Some("file") {
            file_name = field.file_name().map(|s| s.to_string());
            let bytes = field.bytes().await.map_err(|e| EngineError::ValidationError(e.to_string()))?;
            csv_text = Some(String::from_utf8_lossy(&bytes).into_owned());
        }
    }
    let csv_text = csv_text.ok_or_else(|| EngineError::ValidationError("missing file field".to_string()))?;

    let project = state.repo.load_project(&client_id, &project_id)?;
    let batch = csv_import::parse_for_methodology(&csv_text, methodology, &project);

    let mut saved = Vec::new();
    let mut errors: Vec<_> = batch.errors.iter().map(|e| json!({ "row": e.row, "error": e.error })).collect();

    for row in &batch.rows {
        let req = IngestRequest {
            client_id: &client_id,
            project_id: &project_id,
            methodology,
            input_type: InputType::Manual,
            original_input_type: "CSV",
            source: SourceDetails {
                uploaded_by: Some(actor.id.clone()),
                data_source: "CSV".to_string(),
                api_endpoint: None,
                iot_device_id: None,
                file_name: file_name.clone(),
            },
            date: row.date.as_deref(),
            time: row.time.as_deref(),
            entry_input: row.input.clone(),
        };
        match entry_store::ingest_entry(state.repo.as_ref(), &state.cache, &state.bus, req) {
            Ok(entry) => saved.push(entry),
            Err(e) => errors.push(json!({ "row": row.row, "error": e.to_string() })),
        }
    }

    state.bus.publish_to_client(
        &client_id,
        crate::engine::events::ReductionEvent {
            event_type: "net-reduction:csv-processed",
            timestamp: chrono::Utc::now(),
            client_id: client_id.clone(),
            payload: json!({ "projectId": project_id, "saved": saved.len(), "errors": errors.len() }),
        },
    );

    Ok(envelope::ok(StatusCode::OK, "csv processed", json!({ "saved": saved, "errors": errors })))
}
