use chrono::{DateTime, Datelike, TimeZone, Utc};

use super::model::{FormulaRef, HistoryEntry, ScheduleFrequency};
use crate::error::EngineError;

/// Floor `t` to the start of its UTC period for `freq`.
fn period_start(t: DateTime<Utc>, freq: ScheduleFrequency) -> DateTime<Utc> {
    let year = t.year();
    let month0 = t.month0(); // 0-based
    let start_month0 = match freq {
        ScheduleFrequency::Monthly => month0,
        ScheduleFrequency::Quarterly => (month0 / 3) * 3,
        ScheduleFrequency::Semiannual => (month0 / 6) * 6,
        ScheduleFrequency::Yearly => 0,
    };
    Utc.with_ymd_and_hms(year, start_month0 + 1, 1, 0, 0, 0)
        .single()
        .expect("valid period start")
}

fn history_contains(entry: &HistoryEntry, period_start: DateTime<Utc>, period_end_exclusive: DateTime<Utc>) -> bool {
    let end = entry.to.unwrap_or(period_end_exclusive);
    entry.from <= period_start && period_start < end
}

/// Resolve the value of a frozen variable `s` on project formula ref `fv` at
/// instant `t`, per §4.3.
pub fn resolve(fv: &FormulaRef, symbol: &str, t: DateTime<Utc>) -> Result<f64, EngineError> {
    let var = fv
        .variables
        .get(symbol)
        .ok_or_else(|| EngineError::FrozenVariableMissing(symbol.to_string()))?;

    if var.policy.is_constant {
        return Ok(var.value);
    }

    let schedule = match &var.policy.schedule {
        Some(s) => s,
        None => return Ok(var.value),
    };

    if let Some(from_date) = schedule.from_date {
        if t < from_date {
            return Ok(var.value);
        }
    }

    if let Some(to_date) = schedule.to_date {
        if t > to_date {
            let mut candidates: Vec<&HistoryEntry> =
                var.history.iter().filter(|h| h.from <= to_date).collect();
            candidates.sort_by_key(|h| h.from);
            return Ok(candidates.last().map(|h| h.value).unwrap_or(var.value));
        }
    }

    let start = period_start(t, schedule.frequency);
    let next_period_start = match schedule.frequency {
        ScheduleFrequency::Monthly => advance_months(start, 1),
        ScheduleFrequency::Quarterly => advance_months(start, 3),
        ScheduleFrequency::Semiannual => advance_months(start, 6),
        ScheduleFrequency::Yearly => advance_months(start, 12),
    };

    let mut period_candidates: Vec<&HistoryEntry> =
        var.history.iter().filter(|h| history_contains(h, start, next_period_start)).collect();
    period_candidates.sort_by_key(|h| h.from);
    if let Some(latest) = period_candidates.last() {
        return Ok(latest.value);
    }

    let mut carry_candidates: Vec<&HistoryEntry> =
        var.history.iter().filter(|h| h.from <= start).collect();
    carry_candidates.sort_by_key(|h| h.from);
    if let Some(latest) = carry_candidates.last() {
        return Ok(latest.value);
    }

    Ok(var.value)
}

fn advance_months(t: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let total = t.month0() + months;
    let year = t.year() + (total / 12) as i32;
    let month0 = total % 12;
    Utc.with_ymd_and_hms(year, month0 + 1, 1, 0, 0, 0)
        .single()
        .expect("valid month boundary")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{FrozenVar, SchedulePolicy, VariablePolicy, VariableRole};
    use std::collections::BTreeMap;

    fn dt(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn carry_forward_ref() -> FormulaRef {
        let mut variables = BTreeMap::new();
        variables.insert(
            "A".to_string(),
            FrozenVar {
                value: 5.0,
                policy: VariablePolicy {
                    is_constant: false,
                    schedule: Some(SchedulePolicy {
                        frequency: ScheduleFrequency::Monthly,
                        from_date: Some(dt(2025, 1, 1)),
                        to_date: None,
                    }),
                },
                history: vec![
                    HistoryEntry { value: 10.0, from: dt(2025, 1, 1), to: None },
                    HistoryEntry { value: 20.0, from: dt(2025, 6, 1), to: None },
                ],
            },
        );
        let mut kinds = BTreeMap::new();
        kinds.insert("A".to_string(), VariableRole::Frozen);
        FormulaRef {
            formula_id: "f1".to_string(),
            version: 1,
            variable_kinds: kinds,
            variables,
        }
    }

    #[test]
    fn s3_carry_forward_resolves_correct_history_window() {
        let fv = carry_forward_ref();
        let v = resolve(&fv, "A", dt(2025, 3, 15)).unwrap();
        assert_eq!(v, 10.0);
        let v2 = resolve(&fv, "A", dt(2025, 7, 1)).unwrap();
        assert_eq!(v2, 20.0);
    }

    #[test]
    fn before_from_date_returns_base_value() {
        let fv = carry_forward_ref();
        let v = resolve(&fv, "A", dt(2024, 12, 1)).unwrap();
        assert_eq!(v, 5.0);
    }

    #[test]
    fn missing_symbol_fails() {
        let fv = carry_forward_ref();
        let err = resolve(&fv, "B", dt(2025, 3, 1)).unwrap_err();
        matches!(err, EngineError::FrozenVariableMissing(ref n) if n == "B");
    }

    #[test]
    fn carry_forward_is_independent_of_history_storage_order() {
        let mut fv = carry_forward_ref();
        // Store the later history entry first; resolution must still pick
        // the entry with the greatest `from <= t`, not the first match.
        fv.variables.get_mut("A").unwrap().history = vec![
            HistoryEntry { value: 20.0, from: dt(2025, 6, 1), to: None },
            HistoryEntry { value: 10.0, from: dt(2025, 1, 1), to: None },
        ];
        let v = resolve(&fv, "A", dt(2025, 7, 1)).unwrap();
        assert_eq!(v, 20.0);
    }

    #[test]
    fn constant_policy_ignores_schedule() {
        let mut fv = carry_forward_ref();
        fv.variables.get_mut("A").unwrap().policy.is_constant = true;
        let v = resolve(&fv, "A", dt(2025, 7, 1)).unwrap();
        assert_eq!(v, 5.0);
    }
}
