//! Connection log analysis: bounded range queries over finite logs and
//! continuously updated hourly summaries over live ones.

pub mod error;
pub mod record;
pub mod report;
pub mod scanner;
pub mod tail;
pub mod window;
