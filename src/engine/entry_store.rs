use chrono::Utc;
use uuid::Uuid;

use super::channel;
use super::events::{EventBus, ReductionEvent};
use super::expr::FormulaCache;
use super::methodology::{self, EntryInput};
use super::model::{InputType, Methodology, NetReductionEntry, Project, SourceDetails};
use super::repository::ReductionRepository;
use super::series;
use super::summary;
use super::time_normalizer;
use crate::error::{EngineError, EngineResult};

/// Everything needed to append one entry, independent of transport.
pub struct IngestRequest<'a> {
    pub client_id: &'a str,
    pub project_id: &'a str,
    pub methodology: Methodology,
    pub input_type: InputType,
    pub original_input_type: &'a str,
    pub source: SourceDetails,
    pub date: Option<&'a str>,
    pub time: Option<&'a str>,
    pub entry_input: EntryInput,
}

fn require_active_project(project: &Project) -> EngineResult<()> {
    if project.is_deleted {
        return Err(EngineError::NotFound(format!("project {} is deleted", project.project_id)));
    }
    Ok(())
}

/// Full write path for one entry, per the §2 data flow: channel check →
/// time normalize → methodology evaluate → append → series recompute →
/// summary recompute → event publish. Recompute/summary failures after a
/// successful append are logged, not surfaced (§7 propagation rule).
pub fn ingest_entry<R: ReductionRepository + ?Sized>(
    repo: &R,
    cache: &FormulaCache,
    bus: &EventBus,
    req: IngestRequest,
) -> EngineResult<NetReductionEntry> {
    let project = repo.load_project(req.client_id, req.project_id)?;
    require_active_project(&project)?;

    channel::assert_channel_matches(&project, req.input_type)?;

    let normalized = time_normalizer::normalize(req.date, req.time);

    let formula_ids = collect_formula_ids(&project);
    let formulas = repo.load_formulas(&formula_ids)?;

    let result = methodology::evaluate(&project, &formulas, cache, &req.entry_input, normalized.timestamp)?;

    let entry = NetReductionEntry {
        id: Uuid::new_v4().to_string(),
        client_id: req.client_id.to_string(),
        project_id: req.project_id.to_string(),
        methodology: req.methodology,
        input_type: req.input_type,
        original_input_type: req.original_input_type.to_string(),
        source: req.source,
        date: normalized.date,
        time: normalized.time,
        timestamp: normalized.timestamp,
        payload: result.payload,
        net_reduction: result.net_reduction,
        cumulative_net_reduction: result.net_reduction,
        high_net_reduction: result.net_reduction,
        low_net_reduction: result.net_reduction,
        is_deleted: false,
    };

    repo.append_entry(&entry)?;

    recompute_and_notify(repo, bus, req.client_id, req.project_id, req.methodology, entry_event_type(req.input_type));

    Ok(entry)
}

fn entry_event_type(input_type: InputType) -> &'static str {
    match input_type {
        InputType::Manual => "net-reduction:manual-updated",
        InputType::Api => "net-reduction:api-saved",
        InputType::Iot => "net-reduction:iot-saved",
    }
}

fn collect_formula_ids(project: &Project) -> Vec<String> {
    let mut ids = Vec::new();
    if let Some(fr) = &project.m2.formula_ref {
        ids.push(fr.formula_id.clone());
    }
    for item in project.m3.baseline.iter().chain(&project.m3.project).chain(&project.m3.leakage) {
        ids.push(item.formula_id.clone());
    }
    ids.sort();
    ids.dedup();
    ids
}

/// Manual edit: replaces an existing entry's payload/value in place (the
/// entry keeps its id and provenance), then recomputes the series.
pub fn edit_manual_entry<R: ReductionRepository + ?Sized>(
    repo: &R,
    cache: &FormulaCache,
    bus: &EventBus,
    client_id: &str,
    entry_id: &str,
    entry_input: EntryInput,
) -> EngineResult<NetReductionEntry> {
    let mut existing = repo.load_entry(client_id, entry_id)?;
    if existing.input_type != InputType::Manual {
        return Err(EngineError::ValidationError("only manual entries may be edited".to_string()));
    }

    let project = repo.load_project(client_id, &existing.project_id)?;
    let formula_ids = collect_formula_ids(&project);
    let formulas = repo.load_formulas(&formula_ids)?;

    let result = methodology::evaluate(&project, &formulas, cache, &entry_input, existing.timestamp)?;
    existing.payload = result.payload;
    existing.net_reduction = result.net_reduction;

    repo.replace_entry_payload(&existing)?;
    recompute_and_notify(repo, bus, client_id, &existing.project_id, existing.methodology, "net-reduction:manual-updated");

    Ok(existing)
}

pub fn delete_manual_entry<R: ReductionRepository + ?Sized>(
    repo: &R,
    bus: &EventBus,
    client_id: &str,
    entry_id: &str,
) -> EngineResult<()> {
    let existing = repo.load_entry(client_id, entry_id)?;
    if existing.input_type != InputType::Manual {
        return Err(EngineError::ValidationError("only manual entries may be deleted".to_string()));
    }
    repo.soft_delete_entry(client_id, entry_id)?;
    recompute_and_notify(repo, bus, client_id, &existing.project_id, existing.methodology, "net-reduction:manual-deleted");
    Ok(())
}

fn recompute_and_notify<R: ReductionRepository + ?Sized>(
    repo: &R,
    bus: &EventBus,
    client_id: &str,
    project_id: &str,
    methodology: Methodology,
    event_type: &'static str,
) {
    match series::recompute_and_persist(repo, client_id, project_id, methodology) {
        Ok(_) => {}
        Err(e) => tracing::error!("series recompute failed for {client_id}/{project_id}: {e}"),
    }

    match summary::recompute_client_summaries(repo, client_id, Utc::now()) {
        Ok(_) => bus.publish_to_summaries(
            client_id,
            ReductionEvent {
                event_type: "net-reduction-summary-updated",
                timestamp: Utc::now(),
                client_id: client_id.to_string(),
                payload: serde_json::json!({ "projectId": project_id }),
            },
        ),
        Err(e) => tracing::error!("summary recompute failed for {client_id}: {e}"),
    }

    bus.publish_to_client(
        client_id,
        ReductionEvent {
            event_type,
            timestamp: Utc::now(),
            client_id: client_id.to_string(),
            payload: serde_json::json!({ "projectId": project_id }),
        },
    );
}
