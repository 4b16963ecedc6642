use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::thread;

use crossbeam_channel::{bounded, unbounded};
use tracing::debug;

use crate::error::ConnlogError;
use crate::record::LogRecord;
use crate::window::TIMESTAMP_MARGIN_MS;

pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_BATCH_SIZE: usize = 200_000;

/// Parameters for a bounded range scan over a finite log file.
#[derive(Debug, Clone)]
pub struct ScanParams {
    /// Lower bound of the period, inclusive (ms since epoch).
    pub start: i64,
    /// Upper bound of the period, exclusive (ms since epoch).
    pub end: i64,
    /// Host whose inbound connections are collected.
    pub target_host: String,
    pub workers: usize,
    pub batch_size: usize,
    pub margin_ms: i64,
}

impl ScanParams {
    pub fn new(start: i64, end: i64, target_host: String) -> Self {
        Self {
            start,
            end,
            target_host,
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            margin_ms: TIMESTAMP_MARGIN_MS,
        }
    }

    pub fn validate(&self) -> Result<(), ConnlogError> {
        if self.start > self.end {
            return Err(ConnlogError::Config(format!(
                "start timestamp {} is after end timestamp {}",
                self.start, self.end
            )));
        }
        if self.workers < 1 {
            return Err(ConnlogError::Config("workers must be at least 1".into()));
        }
        if self.batch_size < 1 {
            return Err(ConnlogError::Config("batch size must be at least 1".into()));
        }
        if self.margin_ms < 0 {
            return Err(ConnlogError::Config("margin must not be negative".into()));
        }
        Ok(())
    }
}

/// Collect hosts that connected to the target inside `[start, end)` from one
/// batch of lines. The final batch is padded to size with `None` markers;
/// iteration stops at the first one. Timestamps are monotone within a batch
/// (up to the margin), so a record past `end + margin` ends the batch early.
pub fn process_batch(
    lines: &[Option<String>],
    params: &ScanParams,
) -> Result<HashSet<String>, ConnlogError> {
    let mut hostnames = HashSet::new();
    for (offset, slot) in lines.iter().enumerate() {
        let line = match slot {
            Some(line) => line,
            None => break,
        };
        let record = LogRecord::parse(line).ok_or_else(|| ConnlogError::Parse {
            offset,
            line: line.clone(),
        })?;
        if record.timestamp > params.end + params.margin_ms {
            break;
        }
        if record.timestamp < params.start {
            continue;
        }
        if record.destination == params.target_host && record.timestamp < params.end {
            hostnames.insert(record.origin);
        }
    }
    Ok(hostnames)
}

/// Scan a log file for hosts that connected to the target during the period.
///
/// The sequential and parallel modes return identical sets; parallelism only
/// changes how the work is scheduled, never which records match.
pub fn scan(
    path: &Path,
    params: &ScanParams,
    parallel: bool,
) -> Result<HashSet<String>, ConnlogError> {
    params.validate()?;
    if parallel {
        scan_parallel(path, params)
    } else {
        scan_sequential(path, params)
    }
}

fn scan_sequential(path: &Path, params: &ScanParams) -> Result<HashSet<String>, ConnlogError> {
    let reader = BufReader::new(File::open(path)?);
    let mut hostnames = HashSet::new();
    for (offset, line) in reader.lines().enumerate() {
        let line = line?;
        let record = LogRecord::parse(&line).ok_or_else(|| ConnlogError::Parse {
            offset,
            line: line.clone(),
        })?;
        if record.timestamp > params.end + params.margin_ms {
            break;
        }
        if record.timestamp < params.start {
            continue;
        }
        if record.destination == params.target_host && record.timestamp < params.end {
            hostnames.insert(record.origin);
        }
    }
    Ok(hostnames)
}

/// Fan batches out to a fixed pool of worker threads over a bounded channel
/// and union their partial sets. Batches carry no cross-batch state, so the
/// union is deterministic regardless of scheduling.
fn scan_parallel(path: &Path, params: &ScanParams) -> Result<HashSet<String>, ConnlogError> {
    let reader = BufReader::new(File::open(path)?);
    thread::scope(|scope| {
        let (batch_tx, batch_rx) = bounded::<Vec<Option<String>>>(params.workers * 2);
        let (result_tx, result_rx) = unbounded::<Result<HashSet<String>, ConnlogError>>();

        for _ in 0..params.workers {
            let batch_rx = batch_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for batch in batch_rx.iter() {
                    let result = process_batch(&batch, params);
                    let failed = result.is_err();
                    if result_tx.send(result).is_err() || failed {
                        break;
                    }
                }
            });
        }
        drop(batch_rx);
        drop(result_tx);

        let mut hostnames = HashSet::new();
        let mut first_error: Option<ConnlogError> = None;
        let mut batch = Vec::with_capacity(params.batch_size);
        let mut dispatched = 0usize;

        'feed: for line in reader.lines() {
            // Drain finished batches as we go; a failed batch aborts feeding.
            loop {
                match result_rx.try_recv() {
                    Ok(Ok(partial)) => hostnames.extend(partial),
                    Ok(Err(err)) => {
                        first_error = Some(err);
                        break 'feed;
                    }
                    Err(_) => break,
                }
            }
            match line {
                Ok(line) => {
                    batch.push(Some(line));
                    if batch.len() == params.batch_size {
                        let full =
                            std::mem::replace(&mut batch, Vec::with_capacity(params.batch_size));
                        if batch_tx.send(full).is_err() {
                            break 'feed;
                        }
                        dispatched += 1;
                    }
                }
                Err(err) => {
                    first_error = Some(ConnlogError::Io(err));
                    break 'feed;
                }
            }
        }
        if first_error.is_none() && !batch.is_empty() {
            // Pad the tail of the final batch with explicit no-record markers.
            batch.resize(params.batch_size, None);
            if batch_tx.send(batch).is_ok() {
                dispatched += 1;
            }
        }
        drop(batch_tx);
        debug!(dispatched, workers = params.workers, "scan batches dispatched");

        for result in result_rx.iter() {
            match result {
                Ok(partial) => hostnames.extend(partial),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(hostnames),
        }
    })
}
