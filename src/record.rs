/// A single parsed connection log line: `timestamp origin destination`.
///
/// Timestamps are milliseconds since the epoch. Records are folded into
/// aggregation state as they are read and never retained individually.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: i64,
    pub origin: String,
    pub destination: String,
}

impl LogRecord {
    /// Parse one log line. Returns `None` unless the line is exactly three
    /// whitespace-separated fields with a numeric timestamp; callers attach
    /// the line offset and surface a parse error, since a malformed line
    /// means the log itself is corrupt.
    pub fn parse(line: &str) -> Option<LogRecord> {
        let mut fields = line.split_whitespace();
        let timestamp = fields.next()?.parse::<i64>().ok()?;
        let origin = fields.next()?;
        let destination = fields.next()?;
        if fields.next().is_some() {
            return None;
        }
        Some(LogRecord {
            timestamp,
            origin: origin.to_string(),
            destination: destination.to_string(),
        })
    }
}
