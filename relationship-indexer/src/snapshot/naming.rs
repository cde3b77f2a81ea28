//! File names used inside the snapshot directory.
//!
//! Names are derived deterministically from their content key so that a
//! lexicographic sort of the directory is also a sort by range or time.

use chrono::{DateTime, Utc};

pub const PAGE_PREFIX: &str = "events_";
pub const SNAPSHOT_PREFIX: &str = "graph_snapshot_";
pub const PROGRESS_FILE: &str = "backfill.meta.json";
const JSON_SUFFIX: &str = ".json";

/// `events_{from}_to_{to}.json` with both bounds zero-padded to 12 digits.
pub fn page_file_name(from: u64, to: u64) -> String {
    format!("{PAGE_PREFIX}{from:012}_to_{to:012}{JSON_SUFFIX}")
}

/// Inclusive `(from, to)` range of a page file name.
pub fn parse_page_file_name(file_name: &str) -> Option<(u64, u64)> {
    let stem = file_name
        .strip_prefix(PAGE_PREFIX)?
        .strip_suffix(JSON_SUFFIX)?;
    let (from, to) = stem.split_once("_to_")?;
    Some((from.parse().ok()?, to.parse().ok()?))
}

/// Filesystem-safe name of a capture: `:` and `.` of the ISO time become `-`.
pub fn snapshot_file_name(timestamp: DateTime<Utc>) -> String {
    format!(
        "{SNAPSHOT_PREFIX}{}{JSON_SUFFIX}",
        timestamp.format("%Y-%m-%dT%H-%M-%S-%3fZ")
    )
}

pub fn is_snapshot_file_name(file_name: &str) -> bool {
    file_name.starts_with(SNAPSHOT_PREFIX) && file_name.ends_with(JSON_SUFFIX)
}

/// Timestamp encoded in a capture file name, `None` if it does not parse.
pub fn parse_snapshot_file_name(file_name: &str) -> Option<DateTime<Utc>> {
    let stem = file_name
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(JSON_SUFFIX)?;
    let (date, time) = stem.split_once('T')?;
    let parts: Vec<&str> = time.strip_suffix('Z')?.split('-').collect();
    let [hours, minutes, seconds, millis] = parts.as_slice() else {
        return None;
    };

    let iso = format!("{date}T{hours}:{minutes}:{seconds}.{millis}Z");
    DateTime::parse_from_rfc3339(&iso)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_page_file_name() {
        let name = page_file_name(100_000, 199_999);
        assert_eq!(name, "events_000000100000_to_000000199999.json");
        assert_eq!(parse_page_file_name(&name), Some((100_000, 199_999)));
        assert_eq!(parse_page_file_name("events_abc_to_1.json"), None);
        assert_eq!(parse_page_file_name("graph_snapshot_x.json"), None);
    }

    #[test]
    fn test_snapshot_file_name() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
            + chrono::Duration::milliseconds(42);
        let name = snapshot_file_name(ts);

        assert_eq!(name, "graph_snapshot_2024-03-09T07-05-01-042Z.json");
        assert!(is_snapshot_file_name(&name));
        assert_eq!(parse_snapshot_file_name(&name), Some(ts));
    }

    #[test]
    fn test_names_sort_chronologically() {
        let early = snapshot_file_name(Utc.with_ymd_and_hms(2024, 1, 1, 9, 59, 59).unwrap());
        let late = snapshot_file_name(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        assert!(early < late);
        assert!(page_file_name(9, 10) < page_file_name(10, 11));
    }

    #[test]
    fn test_invalid_snapshot_names() {
        assert_eq!(parse_snapshot_file_name("graph_snapshot_garbage.json"), None);
        assert_eq!(
            parse_snapshot_file_name("graph_snapshot_2024-13-01T00-00-00-000Z.json"),
            None
        );
        assert_eq!(parse_snapshot_file_name("graph_snapshot_2024-01-01T00-00-00Z.json"), None);
        assert!(!is_snapshot_file_name("backfill.meta.json"));
    }
}
