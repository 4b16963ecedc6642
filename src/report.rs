use std::collections::{HashMap, HashSet};

use chrono::{TimeZone, Utc};
use serde::Serialize;
use tracing::error;

use crate::window::{WindowState, HOUR_MS};

/// Reporting collaborator. The core hands results to it and has no knowledge
/// of how they are rendered.
pub trait Reporter: Send + Sync {
    fn report_range_result(&self, target_host: &str, hostnames: &HashSet<String>);

    fn report_hourly_summary(
        &self,
        window_start: i64,
        origin_host: &str,
        end_host: &str,
        state: &WindowState,
    );
}

fn sorted<'a>(hostnames: &'a HashSet<String>) -> Vec<&'a String> {
    let mut hostnames: Vec<&String> = hostnames.iter().collect();
    hostnames.sort();
    hostnames
}

fn format_ms(timestamp: i64) -> String {
    match Utc.timestamp_millis_opt(timestamp).single() {
        Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => timestamp.to_string(),
    }
}

/// Plain-text renderer matching the historical report layout.
pub struct ConsoleReporter {
    hour_ms: i64,
}

impl ConsoleReporter {
    pub fn new(hour_ms: i64) -> Self {
        Self { hour_ms }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new(HOUR_MS)
    }
}

const BANNER_WIDTH: usize = 100;

impl Reporter for ConsoleReporter {
    fn report_range_result(&self, target_host: &str, hostnames: &HashSet<String>) {
        println!("{}", "#".repeat(BANNER_WIDTH));
        println!("The hostnames connected to {target_host} are:");
        for hostname in sorted(hostnames) {
            println!("- {hostname}");
        }
        println!("{}", "#".repeat(BANNER_WIDTH));
    }

    fn report_hourly_summary(
        &self,
        window_start: i64,
        origin_host: &str,
        end_host: &str,
        state: &WindowState,
    ) {
        println!("{}", "#".repeat(BANNER_WIDTH));
        println!(
            "From {} to {}",
            format_ms(window_start),
            format_ms(window_start + self.hour_ms)
        );
        println!("The hostnames connected to {end_host} are:");
        for hostname in sorted(&state.connected_to) {
            println!("- {hostname}");
        }
        println!("{}", "-".repeat(10));
        println!("The hostnames that have been connected from {origin_host} are:");
        for hostname in sorted(&state.connected_from) {
            println!("- {hostname}");
        }
        println!("{}", "-".repeat(10));
        match state.busiest_host() {
            Some((hostname, _)) => println!("The hostname with more connections is {hostname}"),
            None => println!("There is no connections in the last hour"),
        }
        println!("{}", "#".repeat(BANNER_WIDTH));
    }
}

#[derive(Serialize)]
struct RangeReport<'a> {
    target_host: &'a str,
    connected_hostnames: Vec<&'a String>,
}

#[derive(Serialize)]
struct HourlyReport<'a> {
    window_start: i64,
    window_end: i64,
    origin_host: &'a str,
    end_host: &'a str,
    connected_to: Vec<&'a String>,
    connected_from: Vec<&'a String>,
    busiest_host: Option<&'a str>,
    connection_counts: &'a HashMap<String, u64>,
}

/// JSON-lines renderer: one object per report.
pub struct JsonReporter {
    hour_ms: i64,
}

impl JsonReporter {
    pub fn new(hour_ms: i64) -> Self {
        Self { hour_ms }
    }

    fn emit<T: Serialize>(&self, report: &T) {
        match serde_json::to_string(report) {
            Ok(json) => println!("{json}"),
            Err(err) => error!("failed to serialize report: {err}"),
        }
    }
}

impl Default for JsonReporter {
    fn default() -> Self {
        Self::new(HOUR_MS)
    }
}

impl Reporter for JsonReporter {
    fn report_range_result(&self, target_host: &str, hostnames: &HashSet<String>) {
        self.emit(&RangeReport {
            target_host,
            connected_hostnames: sorted(hostnames),
        });
    }

    fn report_hourly_summary(
        &self,
        window_start: i64,
        origin_host: &str,
        end_host: &str,
        state: &WindowState,
    ) {
        self.emit(&HourlyReport {
            window_start,
            window_end: window_start + self.hour_ms,
            origin_host,
            end_host,
            connected_to: sorted(&state.connected_to),
            connected_from: sorted(&state.connected_from),
            busiest_host: state.busiest_host().map(|(hostname, _)| hostname),
            connection_counts: &state.connection_counts,
        });
    }
}
