//! Creation-date windows for repository discovery.
//!
//! The search endpoint only exposes the first 1,000 results of any query,
//! so discovery slices the requested date range into calendar months and
//! each month into four sub-windows: days 1–7, 8–14, 15–21 and 22 to the
//! end of the month. Windows at the edges of the range are clamped to
//! the range itself.

use std::fmt;

use chrono::{Datelike, NaiveDate};

/// Day ranges inside a month. The last upper bound is clamped to the
/// month's real last day.
const SUB_WINDOWS: [(u32, u32); 4] = [(1, 7), (8, 14), (15, 21), (22, 31)];

/// An inclusive range of creation dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Search query for repositories with at least `min_stars` stars
    /// created inside this window.
    pub fn query(&self, min_stars: u64) -> String {
        format!(
            "stars:>={} created:{}..{}",
            min_stars,
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// Last calendar day of the given month.
pub fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Partition `[start, end]` into month sub-windows in calendar order.
///
/// Returns an empty list when `start > end`.
pub fn month_windows(start: NaiveDate, end: NaiveDate) -> Vec<DateWindow> {
    let mut windows = Vec::new();
    if start > end {
        return windows;
    }

    let (mut year, mut month) = (start.year(), start.month());
    loop {
        let last = last_day_of_month(year, month);
        for (from, to) in SUB_WINDOWS {
            let to = to.min(last);
            let (Some(ws), Some(we)) = (
                NaiveDate::from_ymd_opt(year, month, from),
                NaiveDate::from_ymd_opt(year, month, to),
            ) else {
                continue;
            };
            if we < start || ws > end {
                continue;
            }
            windows.push(DateWindow {
                start: ws.max(start),
                end: we.min(end),
            });
        }

        if (year, month) == (end.year(), end.month()) {
            break;
        }
        (year, month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn assert_tiles(windows: &[DateWindow], start: NaiveDate, end: NaiveDate) {
        assert_eq!(windows.first().unwrap().start, start);
        assert_eq!(windows.last().unwrap().end, end);
        for pair in windows.windows(2) {
            assert!(pair[0].start <= pair[0].end);
            assert_eq!(
                pair[0].end.succ_opt().unwrap(),
                pair[1].start,
                "gap or overlap between {} and {}",
                pair[0],
                pair[1]
            );
        }
        let covered: i64 = windows.iter().map(DateWindow::days).sum();
        assert_eq!(covered, (end - start).num_days() + 1);
    }

    #[test]
    fn two_months_tile_without_gaps() {
        let (start, end) = (day(2024, 1, 1), day(2024, 2, 29));
        let windows = month_windows(start, end);
        assert_eq!(windows.len(), 8);
        assert_tiles(&windows, start, end);
        assert_eq!(windows[3], DateWindow { start: day(2024, 1, 22), end: day(2024, 1, 31) });
        assert_eq!(windows[7], DateWindow { start: day(2024, 2, 22), end: day(2024, 2, 29) });
    }

    #[test]
    fn february_ends_at_real_month_end() {
        let windows = month_windows(day(2023, 2, 1), day(2023, 2, 28));
        assert_eq!(windows.last().unwrap().end, day(2023, 2, 28));
        let windows = month_windows(day(2024, 4, 1), day(2024, 4, 30));
        assert_eq!(windows.last().unwrap().end, day(2024, 4, 30));
    }

    #[test]
    fn boundary_windows_are_clamped() {
        let (start, end) = (day(2024, 1, 10), day(2024, 2, 16));
        let windows = month_windows(start, end);
        assert_tiles(&windows, start, end);
        assert_eq!(windows[0], DateWindow { start: day(2024, 1, 10), end: day(2024, 1, 14) });
        assert_eq!(windows.last().unwrap(), &DateWindow { start: day(2024, 2, 15), end: day(2024, 2, 16) });
        // Jan 1-7 lies entirely before the start and is dropped.
        assert!(windows.iter().all(|w| w.start >= start));
    }

    #[test]
    fn crosses_year_boundary() {
        let (start, end) = (day(2023, 12, 20), day(2024, 1, 3));
        let windows = month_windows(start, end);
        assert_tiles(&windows, start, end);
        assert_eq!(windows.len(), 3);
    }

    #[test]
    fn single_day_and_inverted_ranges() {
        let d = day(2024, 6, 9);
        assert_eq!(month_windows(d, d), vec![DateWindow { start: d, end: d }]);
        assert!(month_windows(day(2024, 6, 10), d).is_empty());
    }

    #[test]
    fn query_string_format() {
        let w = DateWindow { start: day(2024, 1, 1), end: day(2024, 1, 7) };
        assert_eq!(w.query(100), "stars:>=100 created:2024-01-01..2024-01-07");
    }

    #[test]
    fn last_day_handles_leap_years() {
        assert_eq!(last_day_of_month(2024, 2), 29);
        assert_eq!(last_day_of_month(2023, 2), 28);
        assert_eq!(last_day_of_month(2023, 12), 31);
        assert_eq!(last_day_of_month(2023, 11), 30);
    }
}
