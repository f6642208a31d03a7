use super::model::{Methodology, NetReductionEntry};
use super::round6::round6;
use crate::error::EngineResult;

/// One row's recomputed derived columns, keyed by entry id.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedUpdate {
    pub entry_id: String,
    pub cumulative_net_reduction: f64,
    pub high_net_reduction: f64,
    pub low_net_reduction: f64,
}

/// Walk `entries` (already sorted ascending by `(timestamp, id)` by the
/// caller) once and produce the cumulative-based watermark sequence
/// mandated by §4.6. This is the sole writer of these three columns; the
/// legacy per-entry watermark variant (`recomputeProjectCumulative` in the
/// source) is deliberately not implemented here (§9 design note).
pub fn recompute(entries: &[NetReductionEntry]) -> Vec<DerivedUpdate> {
    let mut cum = 0.0;
    let mut hi: Option<f64> = None;
    let mut lo: Option<f64> = None;
    let mut out = Vec::with_capacity(entries.len());

    for entry in entries {
        cum = round6(cum + entry.net_reduction);
        hi = Some(match hi {
            None => cum,
            Some(h) => h.max(cum),
        });
        lo = Some(match lo {
            None => cum,
            Some(l) => l.min(cum),
        });
        out.push(DerivedUpdate {
            entry_id: entry.id.clone(),
            cumulative_net_reduction: cum,
            high_net_reduction: hi.unwrap(),
            low_net_reduction: lo.unwrap(),
        });
    }
    out
}

/// Sort a series by `(timestamp, id)` — ties broken by insertion order via
/// the entry id, which is assigned monotonically by the Entry Store.
pub fn sorted_ascending(mut entries: Vec<NetReductionEntry>) -> Vec<NetReductionEntry> {
    entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    entries
}

/// Recompute every derived column for `(clientId, projectId, methodology)`
/// and bulk-write the result via the repository. Invoked after every
/// successful create, manual edit, manual delete, or CSV batch commit.
pub fn recompute_and_persist<R: super::repository::ReductionRepository + ?Sized>(
    repo: &R,
    client_id: &str,
    project_id: &str,
    methodology: Methodology,
) -> EngineResult<Vec<DerivedUpdate>> {
    let series = repo.list_series(client_id, project_id, methodology)?;
    let series = sorted_ascending(series);
    let updates = recompute(&series);
    repo.bulk_update_derived(client_id, project_id, methodology, &updates)?;
    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{EntryPayload, InputType, Methodology, SourceDetails};
    use chrono::{TimeZone, Utc};

    fn entry(id: &str, ts: chrono::DateTime<Utc>, net: f64) -> NetReductionEntry {
        NetReductionEntry {
            id: id.to_string(),
            client_id: "C1".into(),
            project_id: "C1-RED-C1-0001".into(),
            methodology: Methodology::M1,
            input_type: InputType::Manual,
            original_input_type: "manual".into(),
            source: SourceDetails {
                uploaded_by: None,
                data_source: "manual".into(),
                api_endpoint: None,
                iot_device_id: None,
                file_name: None,
            },
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
    fn s1_single_insert() {
        let t = Utc.with_ymd_and_hms(2025, 8, 14, 11, 0, 0).unwrap();
        let rows = vec![entry("e1", t, 5.0)];
        let out = recompute(&rows);
        assert_eq!(out[0].cumulative_net_reduction, 5.0);
        assert_eq!(out[0].high_net_reduction, 5.0);
        assert_eq!(out[0].low_net_reduction, 5.0);
    }

    #[test]
    fn s2_retroactive_insert_reorders_by_timestamp() {
        let t13 = Utc.with_ymd_and_hms(2025, 8, 13, 9, 0, 0).unwrap();
        let t14 = Utc.with_ymd_and_hms(2025, 8, 14, 11, 0, 0).unwrap();
        let rows = sorted_ascending(vec![entry("e2", t14, 5.0), entry("e1", t13, 2.0)]);
        let out = recompute(&rows);
        assert_eq!(out[0].entry_id, "e1");
        assert_eq!(out[0].cumulative_net_reduction, 2.0);
        assert_eq!(out[1].cumulative_net_reduction, 7.0);
        assert_eq!(out[1].high_net_reduction, 7.0);
        assert_eq!(out[0].low_net_reduction, 2.0);
        assert_eq!(out[1].low_net_reduction, 2.0);
    }

    #[test]
    fn watermarks_are_monotone_even_with_negative_rows() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let rows = vec![
            entry("a", base, 10.0),
            entry("b", base + chrono::Duration::hours(1), -20.0),
            entry("c", base + chrono::Duration::hours(2), 5.0),
        ];
        let out = recompute(&rows);
        assert_eq!(out[0].cumulative_net_reduction, 10.0);
        assert_eq!(out[1].cumulative_net_reduction, -10.0);
        assert_eq!(out[2].cumulative_net_reduction, -5.0);
        assert_eq!(out[1].high_net_reduction, 10.0);
        assert_eq!(out[2].high_net_reduction, 10.0);
        assert_eq!(out[1].low_net_reduction, -10.0);
        assert_eq!(out[2].low_net_reduction, -10.0);
    }

    #[test]
    fn idempotent_on_repeated_recompute() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let rows = vec![entry("a", t, 3.0)];
        let first = recompute(&rows);
        let second = recompute(&rows);
        assert_eq!(first, second);
    }
}
