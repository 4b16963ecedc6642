use thiserror::Error;

/// Error types for log scanning and aggregation.
#[derive(Error, Debug)]
pub enum ConnlogError {
    #[error("Parse Error: bad log line at offset {offset}: {line:?}")]
    Parse { offset: usize, line: String },

    #[error("Parse Error: record timestamp {timestamp} is implausibly far ahead of the window starting at {window_start}")]
    ImplausibleTimestamp { timestamp: i64, window_start: i64 },

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config Error: {0}")]
    Config(String),
}
