use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tracing::info;

use crate::error::ConnlogError;
use crate::record::LogRecord;
use crate::report::Reporter;
use crate::window::{HourlyAggregator, HOUR_MS, TIMESTAMP_MARGIN_MS};

/// How long to wait before re-reading when the log has no new lines. Policy
/// only; correctness never depends on this value.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Parameters for the unbounded tailing pipeline.
#[derive(Debug, Clone)]
pub struct TailParams {
    /// Host whose outbound connections are summarized.
    pub origin_host: String,
    /// Host whose inbound connections are summarized.
    pub end_host: String,
    /// Start of the first window (ms since epoch); defaults to now.
    pub init_timestamp: Option<i64>,
    pub hour_ms: i64,
    pub margin_ms: i64,
    pub poll_interval: Duration,
}

impl TailParams {
    pub fn new(origin_host: String, end_host: String) -> Self {
        Self {
            origin_host,
            end_host,
            init_timestamp: None,
            hour_ms: HOUR_MS,
            margin_ms: TIMESTAMP_MARGIN_MS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn validate(&self) -> Result<(), ConnlogError> {
        if self.hour_ms < 1 {
            return Err(ConnlogError::Config(
                "window length must be at least 1 ms".into(),
            ));
        }
        if self.margin_ms < 0 {
            return Err(ConnlogError::Config("margin must not be negative".into()));
        }
        Ok(())
    }
}

/// Follow a live log file forever, reporting one summary per elapsed hour.
///
/// Windows close either because a record crossed the hour boundary (plus
/// margin) or because the wall clock did while no data arrived, so summaries
/// keep flowing through quiet periods. Runs until the shutdown flag is set;
/// parse and I/O failures are fatal and surface to the caller.
pub async fn run(
    path: &Path,
    params: &TailParams,
    reporter: &dyn Reporter,
    shutdown: &AtomicBool,
) -> Result<(), ConnlogError> {
    params.validate()?;
    let init_timestamp = params
        .init_timestamp
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    let mut aggregator = HourlyAggregator::new(
        params.origin_host.clone(),
        params.end_host.clone(),
        init_timestamp,
        params.hour_ms,
        params.margin_ms,
    );
    let file = File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut line_no = 0usize;
    info!(
        path = %path.display(),
        origin_host = %params.origin_host,
        end_host = %params.end_host,
        init_timestamp,
        "tailing connection log"
    );

    while !shutdown.load(Ordering::SeqCst) {
        let read = reader.read_line(&mut line).await?;
        if read > 0 && line.ends_with('\n') {
            line_no += 1;
            let trimmed = line.trim();
            // A blank line is as malformed as any other bad line; the log is
            // corrupt and masking that would poison the windowing math.
            let record = LogRecord::parse(trimmed).ok_or_else(|| ConnlogError::Parse {
                offset: line_no - 1,
                line: trimmed.to_string(),
            })?;
            for (window_start, state) in aggregator.observe(&record)? {
                reporter.report_hourly_summary(
                    window_start,
                    &params.origin_host,
                    &params.end_host,
                    &state,
                );
            }
            line.clear();
            continue;
        }

        // No complete line available: either EOF, or a final line still being
        // written, which stays buffered until its newline arrives. Advance on
        // wall clock alone so quiet hours still flush, then wait for data.
        if let Some((window_start, state)) = aggregator.idle_flush(Utc::now().timestamp_millis()) {
            reporter.report_hourly_summary(
                window_start,
                &params.origin_host,
                &params.end_host,
                &state,
            );
        }
        sleep(params.poll_interval).await;
    }
    info!("shutdown requested, stopping tail");
    Ok(())
}
