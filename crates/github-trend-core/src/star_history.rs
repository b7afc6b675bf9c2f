//! Per-day star counts.
//!
//! A [`StarHistory`] maps a calendar day to the number of stargazers
//! gained on that day. Only per-day deltas are stored; running totals
//! are derived on demand with [`StarHistory::cumulative`].

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

/// New stars per calendar day, serialized as `{"YYYY-MM-DD": n}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StarHistory(BTreeMap<NaiveDate, u32>);

/// One row of the cumulative view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StarPoint {
    pub date: NaiveDate,
    pub stars: u32,
    pub cumulative: u64,
}

impl StarHistory {
    /// Bucket `starred_at` timestamps (RFC 3339) by UTC day.
    ///
    /// Unparseable timestamps are skipped.
    pub fn from_timestamps<'a, I>(timestamps: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut history = Self::default();
        for ts in timestamps {
            history.record_timestamp(ts);
        }
        history
    }

    /// Count one stargazer on `date`.
    pub fn record(&mut self, date: NaiveDate) {
        *self.0.entry(date).or_insert(0) += 1;
    }

    /// Count one stargazer from an RFC 3339 timestamp. Returns `false` if
    /// the timestamp could not be parsed.
    pub fn record_timestamp(&mut self, ts: &str) -> bool {
        match parse_day(ts) {
            Some(day) => {
                self.record(day);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, date: &NaiveDate) -> Option<u32> {
        self.0.get(date).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &u32)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all per-day counts.
    pub fn total(&self) -> u64 {
        self.0.values().map(|&n| n as u64).sum()
    }

    /// Running totals in date order.
    pub fn cumulative(&self) -> Vec<StarPoint> {
        let mut running = 0u64;
        self.0
            .iter()
            .map(|(&date, &stars)| {
                running += stars as u64;
                StarPoint {
                    date,
                    stars,
                    cumulative: running,
                }
            })
            .collect()
    }

    /// Evenly spaced sample of at most `max_points` days. The first and
    /// the most recent day are always included when `max_points >= 2`.
    pub fn sample(&self, max_points: usize) -> Vec<(NaiveDate, u32)> {
        let all: Vec<(NaiveDate, u32)> = self.0.iter().map(|(&d, &n)| (d, n)).collect();
        if all.len() <= max_points {
            return all;
        }
        match max_points {
            0 => Vec::new(),
            1 => all.last().copied().into_iter().collect(),
            n => (0..n)
                .map(|i| all[i * (all.len() - 1) / (n - 1)])
                .collect(),
        }
    }
}

impl FromIterator<(NaiveDate, u32)> for StarHistory {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, u32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn parse_day(ts: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.naive_utc().date());
    }
    ts.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

/// Number of pages needed to list `total` items at `per_page` per page.
pub fn pages_needed(total: u64, per_page: u32) -> u64 {
    if per_page == 0 {
        return 0;
    }
    total.div_ceil(per_page as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn buckets_events_per_day_without_accumulating() {
        let events = [
            "2024-05-01T08:00:00Z",
            "2024-05-01T23:59:59Z",
            "2024-05-03T12:00:00Z",
            "2024-05-07T00:00:01Z",
            "2024-05-07T10:00:00Z",
            "2024-05-07T22:30:00Z",
        ];
        let history = StarHistory::from_timestamps(events);

        assert_eq!(history.len(), 3);
        assert_eq!(history.get(&day(2024, 5, 1)), Some(2));
        assert_eq!(history.get(&day(2024, 5, 3)), Some(1));
        assert_eq!(history.get(&day(2024, 5, 7)), Some(3));
        assert_eq!(history.total(), 6);
    }

    #[test]
    fn cumulative_is_a_derived_view() {
        let history: StarHistory = [(day(2024, 1, 2), 3), (day(2024, 1, 1), 2)]
            .into_iter()
            .collect();
        let points = history.cumulative();
        assert_eq!(points[0].date, day(2024, 1, 1));
        assert_eq!(points[0].cumulative, 2);
        assert_eq!(points[1].cumulative, 5);
        // Stored values are untouched.
        assert_eq!(history.get(&day(2024, 1, 2)), Some(3));
    }

    #[test]
    fn serializes_as_date_keyed_object() {
        let history: StarHistory = [(day(2024, 2, 29), 4)].into_iter().collect();
        let json = serde_json::to_string(&history).unwrap();
        assert_eq!(json, r#"{"2024-02-29":4}"#);
        let back: StarHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, history);
    }

    #[test]
    fn sample_keeps_last_point() {
        let history: StarHistory = (1..=20).map(|d| (day(2024, 1, d), d)).collect();
        let sampled = history.sample(5);
        assert_eq!(sampled.len(), 5);
        assert_eq!(sampled.first().unwrap().0, day(2024, 1, 1));
        assert_eq!(sampled.last().unwrap().0, day(2024, 1, 20));
        assert_eq!(history.sample(1), vec![(day(2024, 1, 20), 20)]);
        assert_eq!(history.sample(50).len(), 20);
    }

    #[test]
    fn pages_needed_rounds_up() {
        assert_eq!(pages_needed(0, 100), 0);
        assert_eq!(pages_needed(1, 100), 1);
        assert_eq!(pages_needed(100, 100), 1);
        assert_eq!(pages_needed(101, 100), 2);
    }
}
