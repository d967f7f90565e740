//! Sweep-line utilities for interval timelines.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Value of a series at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: u32,
}

/// Maximum number of intervals active at the same time.
///
/// Each interval contributes +1 at its start and -1 at its end; deltas are
/// sorted by time (stable, so equal timestamps keep arrival order) and the
/// peak prefix sum is returned.
pub fn high_watermark<I>(intervals: I) -> u32
where
    I: IntoIterator<Item = (DateTime<Utc>, DateTime<Utc>)>,
{
    let mut deltas: Vec<(DateTime<Utc>, i64)> = intervals
        .into_iter()
        .flat_map(|(from, to)| [(from, 1), (to, -1)])
        .collect();
    deltas.sort_by_key(|(timestamp, _)| *timestamp);

    let mut balance = 0i64;
    let mut peak = 0i64;
    for (_, delta) in deltas {
        balance += delta;
        debug_assert!(balance >= 0, "interval ended before it started");
        peak = peak.max(balance);
    }
    debug_assert_eq!(balance, 0, "interval never ended");

    peak as u32
}

fn start_of_day(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// For every UTC day intersecting `[window_start, window_end)`, the maximum
/// number of intervals active at once during that day.
///
/// Intervals are treated as half-open, so one ending at midnight does not
/// count towards the following day. Zero-length intervals are ignored.
pub fn daily_high_watermarks(
    intervals: &[(DateTime<Utc>, DateTime<Utc>)],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<DataPoint> {
    let mut deltas: Vec<(DateTime<Utc>, i64)> = intervals
        .iter()
        .filter(|(from, to)| from < to)
        .flat_map(|(from, to)| [(*from, 1), (*to, -1)])
        .collect();
    // Ends before starts at equal timestamps
    deltas.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut points = Vec::new();
    let mut balance = 0i64;
    let mut next_delta = 0;
    let mut day = start_of_day(window_start);

    while day < window_end {
        let next_day = day + Duration::days(1);

        while next_delta < deltas.len() && deltas[next_delta].0 <= day {
            balance += deltas[next_delta].1;
            next_delta += 1;
        }

        let mut peak = balance;
        while next_delta < deltas.len() && deltas[next_delta].0 < next_day {
            balance += deltas[next_delta].1;
            next_delta += 1;
            peak = peak.max(balance);
        }

        points.push(DataPoint {
            timestamp: day,
            value: peak as u32,
        });
        day = next_day;
    }

    points
}
