use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use super::model::NormalizedTime;

/// Fixed `+05:30` offset every timestamp is anchored to (see §4.1).
fn project_offset() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 30 * 60).expect("valid fixed offset")
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Parse an optional date/time pair into the canonical `{date, time,
/// timestamp}` triple. Total function — never fails. Missing or
/// unparseable inputs fall back to "now" in the fixed `+05:30` offset.
pub fn normalize(date: Option<&str>, time: Option<&str>) -> NormalizedTime {
    let offset = project_offset();
    let now_local = Utc::now().with_timezone(&offset);

    let naive_date = date.and_then(parse_date).unwrap_or_else(|| now_local.date_naive());
    let naive_time = time.and_then(parse_time).unwrap_or_else(|| now_local.time());

    let naive_dt = naive_date.and_time(naive_time);
    let local_dt = offset
        .from_local_datetime(&naive_dt)
        .single()
        .unwrap_or_else(|| offset.from_utc_datetime(&naive_dt));

    NormalizedTime {
        date: local_dt.format("%d/%m/%Y").to_string(),
        time: local_dt.format("%H:%M").to_string(),
        timestamp: local_dt.with_timezone(&Utc),
    }
}

/// Convenience for call sites that already hold a concrete instant (CSV rows
/// sharing one upload timestamp, tests).
pub fn from_timestamp(ts: DateTime<Utc>) -> NormalizedTime {
    let local = ts.with_timezone(&project_offset());
    NormalizedTime {
        date: local.format("%d/%m/%Y").to_string(),
        time: local.format("%H:%M").to_string(),
        timestamp: ts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ddmmyyyy_and_hhmm() {
        let n = normalize(Some("14/08/2025"), Some("11:00"));
        assert_eq!(n.date, "14/08/2025");
        assert_eq!(n.time, "11:00");
    }

    #[test]
    fn accepts_iso_date_and_hhmmss() {
        let n = normalize(Some("2025-08-14"), Some("11:00:30"));
        assert_eq!(n.date, "14/08/2025");
        assert_eq!(n.time, "11:00");
    }

    #[test]
    fn falls_back_to_now_on_missing_or_bad_input() {
        let n = normalize(None, None);
        assert!(!n.date.is_empty());
        let n2 = normalize(Some("not-a-date"), Some("nope"));
        assert!(!n2.date.is_empty());
    }

    #[test]
    fn timestamp_reconstructs_from_canonical_fields_in_fixed_offset() {
        let n = normalize(Some("01/01/2025"), Some("00:00"));
        // 00:00 local (+05:30) is the previous UTC day at 18:30.
        assert_eq!(n.timestamp.format("%Y-%m-%d %H:%M").to_string(), "2024-12-31 18:30");
    }
}
