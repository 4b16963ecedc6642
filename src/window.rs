use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::ConnlogError;
use crate::record::LogRecord;

/// Window length in milliseconds. Overridable per aggregator so tests can run
/// with shortened windows.
pub const HOUR_MS: i64 = 3_600_000;

/// Tolerance for records arriving slightly out of timestamp order, in
/// milliseconds. A window is only considered closed once a record (or the
/// wall clock) passes the window end by this much.
pub const TIMESTAMP_MARGIN_MS: i64 = 300_000;

/// Upper bound on record-driven catch-up, in windows (ten years of hours).
/// A well-formed line whose timestamp sits further ahead of the current
/// window than this indicates a corrupt clock, not a quiet decade.
pub const MAX_CATCHUP_WINDOWS: usize = 87_600;

/// Accumulated connection activity for one hourly window.
#[derive(Debug, Default, Clone, Serialize)]
pub struct WindowState {
    /// Hosts that opened a connection to the end host.
    pub connected_to: HashSet<String>,
    /// Hosts the origin host opened a connection to.
    pub connected_from: HashSet<String>,
    /// Occurrences of every host seen as either side of a connection.
    pub connection_counts: HashMap<String, u64>,
}

impl WindowState {
    fn fold(&mut self, record: &LogRecord, origin_host: &str, end_host: &str) {
        if record.origin == origin_host {
            self.connected_from.insert(record.destination.clone());
        }
        if record.destination == end_host {
            self.connected_to.insert(record.origin.clone());
        }
        *self
            .connection_counts
            .entry(record.origin.clone())
            .or_insert(0) += 1;
        *self
            .connection_counts
            .entry(record.destination.clone())
            .or_insert(0) += 1;
    }

    /// Host with the most connections in this window. Ties resolve to the
    /// lexicographically smallest name so reports are deterministic.
    pub fn busiest_host(&self) -> Option<(&str, u64)> {
        self.connection_counts
            .iter()
            .max_by(|(host_a, count_a), (host_b, count_b)| {
                count_a.cmp(count_b).then_with(|| host_b.cmp(host_a))
            })
            .map(|(host, count)| (host.as_str(), *count))
    }

    pub fn is_empty(&self) -> bool {
        self.connection_counts.is_empty()
    }
}

/// Hourly aggregation state machine for the tailing pipeline.
///
/// Holds two windows at once: `current`, being finalized, and `next`,
/// pre-filled by records that arrive inside the margin band past the window
/// end. On flush `next` is moved into `current`'s slot and a fresh empty
/// state takes its place; no cloning, no aliasing.
#[derive(Debug)]
pub struct HourlyAggregator {
    origin_host: String,
    end_host: String,
    window_start: i64,
    hour_ms: i64,
    margin_ms: i64,
    current: WindowState,
    next: WindowState,
}

impl HourlyAggregator {
    pub fn new(
        origin_host: String,
        end_host: String,
        init_timestamp: i64,
        hour_ms: i64,
        margin_ms: i64,
    ) -> Self {
        Self {
            origin_host,
            end_host,
            window_start: init_timestamp,
            hour_ms,
            margin_ms,
            current: WindowState::default(),
            next: WindowState::default(),
        }
    }

    pub fn window_start(&self) -> i64 {
        self.window_start
    }

    fn rotate(&mut self) -> (i64, WindowState) {
        let flushed_start = self.window_start;
        let flushed = std::mem::replace(&mut self.current, std::mem::take(&mut self.next));
        self.window_start = self.window_start.saturating_add(self.hour_ms);
        (flushed_start, flushed)
    }

    /// Timestamp at which the current window is considered closed. Saturates
    /// at `i64::MAX` when the window end is beyond representable time.
    fn close_boundary(&self) -> i64 {
        self.window_start
            .checked_add(self.hour_ms)
            .and_then(|end| end.checked_add(self.margin_ms))
            .unwrap_or(i64::MAX)
    }

    /// Fold one record, returning the windows it closed, oldest first.
    ///
    /// A record past `window_start + hour + margin` flushes repeatedly until
    /// it lands in the current window or the margin band, so a multi-hour
    /// quiet gap in the log emits one summary per elapsed hour (empty hours
    /// included). Records older than `window_start` are dropped silently;
    /// a record more than `MAX_CATCHUP_WINDOWS` windows ahead is rejected as
    /// corrupt rather than ground through one rotation per elapsed hour.
    pub fn observe(&mut self, record: &LogRecord) -> Result<Vec<(i64, WindowState)>, ConnlogError> {
        let mut flushed = Vec::new();
        if record.timestamp < self.window_start {
            return Ok(flushed);
        }
        let gap_windows = record.timestamp.saturating_sub(self.window_start) / self.hour_ms;
        if gap_windows > MAX_CATCHUP_WINDOWS as i64 {
            return Err(ConnlogError::ImplausibleTimestamp {
                timestamp: record.timestamp,
                window_start: self.window_start,
            });
        }
        while record.timestamp >= self.close_boundary() {
            flushed.push(self.rotate());
        }
        if record.timestamp >= self.window_start.saturating_add(self.hour_ms) {
            // Early arrival for the following hour.
            self.next.fold(record, &self.origin_host, &self.end_host);
        } else {
            self.current.fold(record, &self.origin_host, &self.end_host);
        }
        Ok(flushed)
    }

    /// Wall-clock driven flush for quiet periods: closes the current window
    /// if `now_ms` has passed its end plus the margin. At most one rotation
    /// per call; the tailing loop catches up across multiple polls.
    pub fn idle_flush(&mut self, now_ms: i64) -> Option<(i64, WindowState)> {
        if now_ms >= self.close_boundary() {
            Some(self.rotate())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 100;
    const MARGIN: i64 = 10;

    fn record(timestamp: i64, origin: &str, destination: &str) -> LogRecord {
        LogRecord {
            timestamp,
            origin: origin.to_string(),
            destination: destination.to_string(),
        }
    }

    fn aggregator(init: i64) -> HourlyAggregator {
        HourlyAggregator::new("origin".into(), "end".into(), init, HOUR, MARGIN)
    }

    #[test]
    fn folds_into_current_window() {
        let mut agg = aggregator(0);
        assert!(agg.observe(&record(10, "origin", "host-x")).unwrap().is_empty());
        assert!(agg.observe(&record(20, "host-y", "end")).unwrap().is_empty());
        assert!(agg.observe(&record(30, "host-a", "host-b")).unwrap().is_empty());

        // Crossing the boundary closes the window.
        let flushed = agg.observe(&record(HOUR + MARGIN, "host-z", "end")).unwrap();
        assert_eq!(flushed.len(), 1);
        let (start, state) = &flushed[0];
        assert_eq!(*start, 0);
        assert_eq!(
            state.connected_from,
            HashSet::from(["host-x".to_string()])
        );
        assert_eq!(state.connected_to, HashSet::from(["host-y".to_string()]));
        assert_eq!(state.connection_counts.len(), 6);
        assert_eq!(state.connection_counts["origin"], 1);
        assert_eq!(state.connection_counts["end"], 1);
        assert_eq!(agg.window_start(), HOUR);
    }

    #[test]
    fn early_arrival_lands_in_next_window() {
        let mut agg = aggregator(0);
        // Inside the margin band past the window end: belongs to the next hour.
        assert!(agg.observe(&record(HOUR + MARGIN - 1, "host-n", "end")).unwrap().is_empty());
        let flushed = agg.observe(&record(HOUR + MARGIN, "host-c", "host-d")).unwrap();
        assert_eq!(flushed.len(), 1);
        assert!(flushed[0].1.is_empty());

        // The rotated-in window carries the early arrival.
        let flushed = agg.observe(&record(2 * HOUR + MARGIN, "host-e", "host-f")).unwrap();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, HOUR);
        assert_eq!(
            flushed[0].1.connected_to,
            HashSet::from(["host-n".to_string()])
        );
    }

    #[test]
    fn multi_hour_gap_flushes_each_elapsed_hour() {
        let mut agg = aggregator(0);
        assert!(agg.observe(&record(5, "host-a", "end")).unwrap().is_empty());

        let flushed = agg.observe(&record(3 * HOUR, "host-b", "end")).unwrap();
        let starts: Vec<i64> = flushed.iter().map(|(start, _)| *start).collect();
        assert_eq!(starts, vec![0, HOUR]);
        assert!(!flushed[0].1.is_empty());
        assert!(flushed[1].1.is_empty());
        // Record at 3*HOUR sits in the margin band of window [2h, 3h): next.
        assert_eq!(agg.window_start(), 2 * HOUR);
    }

    #[test]
    fn discards_records_before_window_start() {
        let mut agg = aggregator(1000);
        assert!(agg.observe(&record(999, "host-a", "end")).unwrap().is_empty());
        let flushed = agg.observe(&record(1000 + HOUR + MARGIN, "host-b", "host-c")).unwrap();
        assert_eq!(flushed.len(), 1);
        assert!(flushed[0].1.is_empty());
    }

    #[test]
    fn idle_flush_respects_margin() {
        let mut agg = aggregator(0);
        agg.observe(&record(1, "host-a", "end")).unwrap();
        assert!(agg.idle_flush(HOUR + MARGIN - 1).is_none());

        let (start, state) = agg.idle_flush(HOUR + MARGIN).unwrap();
        assert_eq!(start, 0);
        assert_eq!(state.connected_to, HashSet::from(["host-a".to_string()]));
        assert_eq!(agg.window_start(), HOUR);
        // One rotation per call.
        assert!(agg.idle_flush(HOUR + MARGIN).is_none());
    }

    #[test]
    fn empty_window_reports_no_connections() {
        let mut agg = aggregator(0);
        let (_, state) = agg.idle_flush(HOUR + MARGIN).unwrap();
        assert!(state.is_empty());
        assert!(state.connected_to.is_empty());
        assert!(state.connected_from.is_empty());
        assert!(state.busiest_host().is_none());
    }

    #[test]
    fn implausibly_distant_timestamp_is_rejected() {
        let mut agg = aggregator(0);
        agg.observe(&record(1, "host-a", "end")).unwrap();

        let too_far = (MAX_CATCHUP_WINDOWS as i64 + 1) * HOUR;
        let err = agg.observe(&record(too_far, "host-b", "end")).unwrap_err();
        assert!(matches!(
            err,
            ConnlogError::ImplausibleTimestamp { window_start: 0, .. }
        ));
        // The rejection leaves the machine untouched.
        assert_eq!(agg.window_start(), 0);
        let (_, state) = agg.idle_flush(HOUR + MARGIN).unwrap();
        assert_eq!(state.connected_to, HashSet::from(["host-a".to_string()]));
    }

    #[test]
    fn maximum_timestamp_does_not_overflow_or_spin() {
        let mut agg = aggregator(0);
        assert!(agg
            .observe(&record(i64::MAX, "host-a", "end"))
            .is_err());

        // A near-saturated window start must not overflow the boundary math:
        // the window end saturates and the clock below it never flushes.
        let mut agg = aggregator(i64::MAX - HOUR / 2);
        assert!(agg.idle_flush(i64::MAX - 1).is_none());
    }

    #[test]
    fn long_but_plausible_gap_flushes_every_hour() {
        let mut agg = aggregator(0);
        agg.observe(&record(1, "host-a", "end")).unwrap();

        let flushed = agg.observe(&record(1_000 * HOUR, "host-b", "end")).unwrap();
        assert_eq!(flushed.len(), 999);
        assert!(!flushed[0].1.is_empty());
        assert!(flushed[1..].iter().all(|(_, state)| state.is_empty()));
        let starts: Vec<i64> = flushed.iter().map(|(start, _)| *start).collect();
        assert!(starts.windows(2).all(|pair| pair[1] == pair[0] + HOUR));
    }

    #[test]
    fn busiest_host_breaks_ties_by_name() {
        let mut agg = aggregator(0);
        agg.observe(&record(1, "host-b", "host-c")).unwrap();
        agg.observe(&record(2, "host-a", "host-c")).unwrap();
        let (host, count) = {
            let (_, state) = agg.idle_flush(HOUR + MARGIN).unwrap();
            let (host, count) = state.busiest_host().unwrap();
            (host.to_string(), count)
        };
        assert_eq!((host.as_str(), count), ("host-c", 2));

        let mut agg = aggregator(0);
        agg.observe(&record(1, "host-b", "host-a")).unwrap();
        let (_, state) = agg.idle_flush(HOUR + MARGIN).unwrap();
        // host-a and host-b both have one connection; smallest name wins.
        assert_eq!(state.busiest_host().unwrap(), ("host-a", 1));
    }
}
