use std::collections::BTreeMap;

use super::model::{Formula, Methodology, NetReductionEntry, Project};
use super::series::DerivedUpdate;
use super::summary::{ClientSummaryDocument, LegacyClientSummary, PeriodKind, PeriodSummary};
use crate::error::EngineResult;

/// Boundary interface for project/entry/formula/summary persistence (C12).
/// The engine never speaks SQL directly outside of `repository::sqlite`;
/// every evaluator, recomputer, and HTTP handler depends on this trait so
/// an in-memory fake can stand in for tests.
pub trait ReductionRepository: Send + Sync {
    fn load_project(&self, client_id: &str, project_id: &str) -> EngineResult<Project>;
    fn save_project(&self, project: &Project) -> EngineResult<()>;
    fn list_projects_for_client(&self, client_id: &str) -> EngineResult<Vec<Project>>;
    fn next_project_sequence(&self, client_id: &str) -> EngineResult<u32>;

    /// Every distinct client id with at least one project, for the sweeper
    /// worker to iterate over.
    fn list_known_clients(&self) -> EngineResult<Vec<String>>;

    fn load_formula(&self, formula_id: &str) -> EngineResult<Formula>;
    fn load_formulas(&self, ids: &[String]) -> EngineResult<BTreeMap<String, Formula>>;

    fn append_entry(&self, entry: &NetReductionEntry) -> EngineResult<()>;
    fn load_entry(&self, client_id: &str, entry_id: &str) -> EngineResult<NetReductionEntry>;
    fn replace_entry_payload(&self, entry: &NetReductionEntry) -> EngineResult<()>;
    fn soft_delete_entry(&self, client_id: &str, entry_id: &str) -> EngineResult<()>;

    /// All non-deleted entries for `(clientId, projectId, methodology)`, in
    /// no particular order — callers sort via `series::sorted_ascending`.
    fn list_series(
        &self,
        client_id: &str,
        project_id: &str,
        methodology: Methodology,
    ) -> EngineResult<Vec<NetReductionEntry>>;

    fn bulk_update_derived(
        &self,
        client_id: &str,
        project_id: &str,
        methodology: Methodology,
        updates: &[DerivedUpdate],
    ) -> EngineResult<()>;

    /// All non-deleted entries for a client within `[from, to]` inclusive,
    /// for Summary Engine windowing.
    fn list_entries_in_window(
        &self,
        client_id: &str,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
    ) -> EngineResult<Vec<NetReductionEntry>>;

    fn list_entries_for_client(&self, client_id: &str) -> EngineResult<Vec<NetReductionEntry>>;

    fn upsert_period_summary(
        &self,
        client_id: &str,
        period: PeriodKind,
        summary: &PeriodSummary,
    ) -> EngineResult<()>;

    fn load_client_summary(&self, client_id: &str) -> EngineResult<Option<ClientSummaryDocument>>;

    fn upsert_legacy_summary(&self, summary: &LegacyClientSummary) -> EngineResult<()>;
    fn load_legacy_summary(&self, client_id: &str) -> EngineResult<Option<LegacyClientSummary>>;
}
