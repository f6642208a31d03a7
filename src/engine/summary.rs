use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::model::{NetReductionEntry, Project, ProjectActivity, ProjectMetadata};
use super::round6::round6;
use crate::error::EngineResult;

fn project_offset() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 30 * 60).expect("valid fixed offset")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    AllTime,
}

impl PeriodKind {
    pub const ALL: [PeriodKind; 5] = [
        PeriodKind::Daily,
        PeriodKind::Weekly,
        PeriodKind::Monthly,
        PeriodKind::Yearly,
        PeriodKind::AllTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Daily => "daily",
            PeriodKind::Weekly => "weekly",
            PeriodKind::Monthly => "monthly",
            PeriodKind::Yearly => "yearly",
            PeriodKind::AllTime => "all-time",
        }
    }
}

/// `[from, to]` inclusive window for `period`, anchored at `reference`
/// (usually "now"). Daily/weekly use the fixed `+05:30` offset per §4.7;
/// monthly/yearly/all-time use UTC calendar boundaries.
pub fn window_for(period: PeriodKind, reference: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    match period {
        PeriodKind::Daily => {
            let local = reference.with_timezone(&project_offset());
            let start_local = local
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .expect("valid midnight");
            let end_local = local
                .date_naive()
                .and_hms_milli_opt(23, 59, 59, 999)
                .expect("valid end of day");
            let offset = project_offset();
            (
                offset.from_local_datetime(&start_local).single().unwrap().with_timezone(&Utc),
                offset.from_local_datetime(&end_local).single().unwrap().with_timezone(&Utc),
            )
        }
        PeriodKind::Weekly => {
            let local = reference.with_timezone(&project_offset());
            let weekday = local.weekday().num_days_from_monday() as i64;
            let monday = local.date_naive() - Duration::days(weekday);
            let start_local = monday.and_hms_opt(0, 0, 0).expect("valid midnight");
            let end_local = (monday + Duration::days(6))
                .and_hms_milli_opt(23, 59, 59, 999)
                .expect("valid end of day");
            let offset = project_offset();
            (
                offset.from_local_datetime(&start_local).single().unwrap().with_timezone(&Utc),
                offset.from_local_datetime(&end_local).single().unwrap().with_timezone(&Utc),
            )
        }
        PeriodKind::Monthly => {
            let year = reference.year();
            let month = reference.month();
            let start = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single().unwrap();
            let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
            let end = Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0).single().unwrap()
                - Duration::milliseconds(1);
            (start, end)
        }
        PeriodKind::Yearly => {
            let year = reference.year();
            let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single().unwrap();
            let end = Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single().unwrap() - Duration::milliseconds(1);
            (start, end)
        }
        PeriodKind::AllTime => {
            let start = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single().unwrap();
            (start, reference)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateRow {
    pub total_net_reduction: f64,
    pub entries_count: u64,
}

impl AggregateRow {
    fn add(&mut self, net_reduction: f64) {
        self.total_net_reduction = round6(self.total_net_reduction + net_reduction);
        self.entries_count += 1;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummaryRow {
    pub project_id: String,
    pub metadata: ProjectMetadata,
    pub total_net_reduction: f64,
    pub entries_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub total_net_reduction: f64,
    pub entries_count: u64,
    pub by_project: Vec<ProjectSummaryRow>,
    pub by_category: BTreeMap<String, AggregateRow>,
    pub by_scope: BTreeMap<String, AggregateRow>,
    pub by_location: BTreeMap<String, AggregateRow>,
    pub by_project_activity: BTreeMap<String, AggregateRow>,
    pub by_methodology: BTreeMap<String, AggregateRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSummaryDocument {
    pub client_id: String,
    pub periods: BTreeMap<PeriodKind, PeriodSummary>,
    pub has_reduction_summary: bool,
    pub last_reduction_summary_calculated_at: DateTime<Utc>,
}

/// The legacy `SummaryNetReduction`-backed rollup: 7/30-day windows plus a
/// per-project daily time series (§9 design note — both summary bodies are
/// treated as required, each feeding a different dashboard).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyClientSummary {
    pub client_id: String,
    pub last_7_days: f64,
    pub last_30_days: f64,
    pub per_project_daily: BTreeMap<String, Vec<(String, f64)>>,
    pub calculated_at: DateTime<Utc>,
}

fn unknown_or(value: &Option<String>) -> String {
    value.clone().filter(|s| !s.is_empty()).unwrap_or_else(|| "Unknown".to_string())
}

fn project_activity_key(project: &Project) -> String {
    match project.m3.project_activity {
        Some(ProjectActivity::Reduction) => "Reduction".to_string(),
        Some(ProjectActivity::Removal) => "Removal".to_string(),
        None => "Unknown".to_string(),
    }
}

/// Aggregate `entries` (already window-filtered) against their owning
/// project metadata, per §4.7 step 2-3.
pub fn compute_period_summary(
    entries: &[NetReductionEntry],
    projects: &BTreeMap<String, Project>,
) -> PeriodSummary {
    let mut summary = PeriodSummary::default();
    let mut by_project: BTreeMap<String, ProjectSummaryRow> = BTreeMap::new();

    for entry in entries {
        summary.total_net_reduction = round6(summary.total_net_reduction + entry.net_reduction);
        summary.entries_count += 1;

        let methodology_key = entry.methodology.as_str().to_string();
        summary.by_methodology.entry(methodology_key).or_default().add(entry.net_reduction);

        let Some(project) = projects.get(&entry.project_id) else {
            continue;
        };

        let category_key = unknown_or(&project.metadata.category);
        let scope_key = unknown_or(&project.metadata.scope);
        let location_key = project.metadata.location_key();

        summary.by_category.entry(category_key).or_default().add(entry.net_reduction);
        summary.by_scope.entry(scope_key).or_default().add(entry.net_reduction);
        summary.by_location.entry(location_key).or_default().add(entry.net_reduction);
        summary.by_project_activity.entry(project_activity_key(project)).or_default().add(entry.net_reduction);

        let row = by_project.entry(project.project_id.clone()).or_insert_with(|| ProjectSummaryRow {
            project_id: project.project_id.clone(),
            metadata: project.metadata.clone(),
            total_net_reduction: 0.0,
            entries_count: 0,
        });
        row.total_net_reduction = round6(row.total_net_reduction + entry.net_reduction);
        row.entries_count += 1;
    }

    summary.by_project = by_project.into_values().collect();
    summary
}

/// Drive both co-existing summary engines (§9). Recomputes all five
/// periods into the `EmissionSummary`-shaped document and the legacy
/// `SummaryNetReduction` rollup, and persists both via the repository.
pub fn recompute_client_summaries<R: super::repository::ReductionRepository + ?Sized>(
    repo: &R,
    client_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<ClientSummaryDocument> {
    let projects: BTreeMap<String, Project> = repo
        .list_projects_for_client(client_id)?
        .into_iter()
        .map(|p| (p.project_id.clone(), p))
        .collect();

    let mut periods = BTreeMap::new();
    for period in PeriodKind::ALL {
        let (from, to) = window_for(period, now);
        let entries = repo.list_entries_in_window(client_id, from, to)?;
        let period_summary = compute_period_summary(&entries, &projects);
        repo.upsert_period_summary(client_id, period, &period_summary)?;
        periods.insert(period, period_summary);
    }

    let doc = ClientSummaryDocument {
        client_id: client_id.to_string(),
        periods,
        has_reduction_summary: true,
        last_reduction_summary_calculated_at: now,
    };

    let all_entries = repo.list_entries_for_client(client_id)?;
    let (from7, _) = (now - Duration::days(7), now);
    let (from30, _) = (now - Duration::days(30), now);
    let mut last_7_days = 0.0;
    let mut last_30_days = 0.0;
    let mut per_project_daily: BTreeMap<String, Vec<(String, f64)>> = BTreeMap::new();
    for entry in &all_entries {
        if entry.timestamp >= from7 {
            last_7_days = round6(last_7_days + entry.net_reduction);
        }
        if entry.timestamp >= from30 {
            last_30_days = round6(last_30_days + entry.net_reduction);
            let day_key = entry.timestamp.with_timezone(&project_offset()).format("%Y-%m-%d").to_string();
            per_project_daily.entry(entry.project_id.clone()).or_default().push((day_key, entry.net_reduction));
        }
    }
    let legacy = LegacyClientSummary {
        client_id: client_id.to_string(),
        last_7_days,
        last_30_days,
        per_project_daily,
        calculated_at: now,
    };
    repo.upsert_legacy_summary(&legacy)?;

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{EntryPayload, InputType, Methodology, ProjectMetadata, SourceDetails};

    fn proj(id: &str, category: Option<&str>) -> Project {
        Project {
            client_id: "C1".into(),
            project_id: id.into(),
            methodology: Methodology::M1,
            metadata: ProjectMetadata {
                project_name: "P".into(),
                category: category.map(|s| s.to_string()),
                scope: None,
                location_place: None,
                location_address: None,
                location_lat_lon: None,
            },
            m1: Default::default(),
            m2: Default::default(),
            m3: Default::default(),
            channel: Default::default(),
            is_deleted: false,
        }
    }

    fn entry(project_id: &str, net: f64, ts: DateTime<Utc>) -> NetReductionEntry {
        NetReductionEntry {
            id: uuid::Uuid::new_v4().to_string(),
            client_id: "C1".into(),
            project_id: project_id.into(),
            methodology: Methodology::M1,
            input_type: InputType::Manual,
            original_input_type: "manual".into(),
            source: SourceDetails { uploaded_by: None, data_source: "manual".into(), api_endpoint: None, iot_device_id: None, file_name: None },
            date: ts.format("%d/%m/%Y").to_string(),
            time: ts.format("%H:%M").to_string(),
            timestamp: ts,
            payload: EntryPayload::M1 { input_value: 0.0, emission_reduction_rate: 0.0 },
            net_reduction: net,
            cumulative_net_reduction: 0.0,
            high_net_reduction: 0.0,
            low_net_reduction: 0.0,
            is_deleted: false,
        }
    }

    #[test]
    fn s8_all_time_total_equals_sum_of_entries() {
        let now = Utc::now();
        let mut projects = BTreeMap::new();
        projects.insert("P1".to_string(), proj("P1", Some("Energy")));
        let entries = vec![entry("P1", 5.0, now), entry("P1", 3.0, now)];
        let summary = compute_period_summary(&entries, &projects);
        assert_eq!(summary.total_net_reduction, 8.0);
        assert_eq!(summary.entries_count, 2);
        assert_eq!(summary.by_category.get("Energy").unwrap().total_net_reduction, 8.0);
    }

    #[test]
    fn missing_category_buckets_as_unknown() {
        let mut projects = BTreeMap::new();
        projects.insert("P1".to_string(), proj("P1", None));
        let entries = vec![entry("P1", 2.0, Utc::now())];
        let summary = compute_period_summary(&entries, &projects);
        assert!(summary.by_category.contains_key("Unknown"));
    }

    #[test]
    fn m3_project_activity_buckets_by_reduction_or_removal() {
        let mut reduction_project = proj("P1", None);
        reduction_project.m3.project_activity = Some(ProjectActivity::Reduction);
        let mut removal_project = proj("P2", None);
        removal_project.m3.project_activity = Some(ProjectActivity::Removal);

        let mut projects = BTreeMap::new();
        projects.insert("P1".to_string(), reduction_project);
        projects.insert("P2".to_string(), removal_project);

        let now = Utc::now();
        let entries = vec![entry("P1", 4.0, now), entry("P2", 6.0, now)];
        let summary = compute_period_summary(&entries, &projects);

        assert_eq!(summary.by_project_activity.get("Reduction").unwrap().total_net_reduction, 4.0);
        assert_eq!(summary.by_project_activity.get("Removal").unwrap().total_net_reduction, 6.0);
    }

    #[test]
    fn daily_window_spans_full_local_day() {
        let reference = Utc.with_ymd_and_hms(2025, 8, 14, 12, 0, 0).unwrap();
        let (from, to) = window_for(PeriodKind::Daily, reference);
        assert!(from <= reference && reference <= to);
        assert_eq!((to - from).num_seconds(), 86399);
    }

    #[test]
    fn weekly_window_is_monday_to_sunday() {
        // 2025-08-14 is a Thursday.
        let reference = Utc.with_ymd_and_hms(2025, 8, 14, 12, 0, 0).unwrap();
        let (from, _to) = window_for(PeriodKind::Weekly, reference);
        let local = from.with_timezone(&project_offset());
        assert_eq!(local.weekday(), chrono::Weekday::Mon);
    }
}
