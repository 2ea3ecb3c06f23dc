use chrono::{DateTime, Duration, Utc};

/// One date range processed as a unit of resumability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWindow {
    pub range_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn updated_since(&self) -> String {
        self.start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }
}

/// Splits `[start, end]` into inclusive windows of `days_per_chunk` days.
/// The last window is clamped to `end`.
pub fn date_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    days_per_chunk: i64,
) -> Vec<DateWindow> {
    let mut windows = Vec::new();
    if start >= end || days_per_chunk <= 0 {
        return windows;
    }

    let mut current = start;
    while current < end {
        let range_end = (current + Duration::days(days_per_chunk)).min(end);
        windows.push(DateWindow {
            range_id: format!(
                "{}_{}",
                current.format("%Y-%m-%d"),
                range_end.format("%Y-%m-%d")
            ),
            start: current,
            end: range_end,
        });
        current = range_end;
    }
    windows
}

/// Default collection start when no `start_date` was configured.
pub fn default_start() -> DateTime<Utc> {
    Utc::now() - Duration::days(365 * 10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn splits_into_thirty_day_windows() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("date");
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).single().expect("date");

        let windows = date_windows(start, end, 30);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].range_id, "2024-01-01_2024-01-31");
        assert_eq!(windows[1].start, windows[0].end);
        assert_eq!(windows[1].end, end, "last window clamps to end");
    }

    #[test]
    fn windows_cover_range_without_gaps() {
        let start = Utc.with_ymd_and_hms(2023, 6, 15, 12, 0, 0).single().expect("date");
        let end = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).single().expect("date");

        let windows = date_windows(start, end, 30);
        assert_eq!(windows.first().map(|w| w.start), Some(start));
        assert_eq!(windows.last().map(|w| w.end), Some(end));
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn empty_or_inverted_ranges_yield_nothing() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("date");
        assert!(date_windows(t, t, 30).is_empty());
        assert!(date_windows(t, t - Duration::days(1), 30).is_empty());
        assert!(date_windows(t, t + Duration::days(5), 0).is_empty());
    }
}
