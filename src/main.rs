use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use connlog::error::ConnlogError;
use connlog::report::{ConsoleReporter, JsonReporter, Reporter};
use connlog::scanner::{self, ScanParams, DEFAULT_BATCH_SIZE, DEFAULT_WORKERS};
use connlog::tail::{self, TailParams};
use connlog::window::{HOUR_MS, TIMESTAMP_MARGIN_MS};

#[derive(Parser)]
#[command(name = "connlog", version, about = "Analyze host connection logs")]
struct Cli {
    /// Input file to read
    input_file: PathBuf,

    /// Emit reports as JSON lines instead of plain text
    #[arg(long, global = true)]
    json: bool,

    /// Out-of-order tolerance in milliseconds
    #[arg(long, global = true, default_value_t = TIMESTAMP_MARGIN_MS)]
    margin: i64,

    /// Window length in milliseconds (shortened in tests, never in production)
    #[arg(long, global = true, hide = true, default_value_t = HOUR_MS)]
    hour: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report the hostnames connected to a host during a period
    Connected {
        /// The beginning of the period (ms since epoch)
        init_timestamp: i64,
        /// The end of the period (ms since epoch, exclusive)
        end_timestamp: i64,
        /// The host to check connections to
        hostname: String,
        /// Process the file with a parallel worker pool
        #[arg(short = 'm', long = "parallel")]
        parallel: bool,
        /// Number of workers to use
        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,
        /// Number of lines in each batch
        #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
    /// Follow the log and summarize connections to/from two hosts hourly
    Unlimited {
        /// Host to report outbound connections for
        origin_host: String,
        /// Host to report inbound connections for
        end_host: String,
        /// Timestamp to start the first window at (defaults to now)
        #[arg(short, long)]
        init_timestamp: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        error!("{err}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ConnlogError> {
    let reporter: Box<dyn Reporter> = if cli.json {
        Box::new(JsonReporter::new(cli.hour))
    } else {
        Box::new(ConsoleReporter::new(cli.hour))
    };

    match cli.command {
        Command::Connected {
            init_timestamp,
            end_timestamp,
            hostname,
            parallel,
            workers,
            batch_size,
        } => {
            let mut params = ScanParams::new(init_timestamp, end_timestamp, hostname);
            params.workers = workers;
            params.batch_size = batch_size;
            params.margin_ms = cli.margin;
            let hostnames = scanner::scan(&cli.input_file, &params, parallel)?;
            reporter.report_range_result(&params.target_host, &hostnames);
        }
        Command::Unlimited {
            origin_host,
            end_host,
            init_timestamp,
        } => {
            let mut params = TailParams::new(origin_host, end_host);
            params.init_timestamp = init_timestamp;
            params.hour_ms = cli.hour;
            params.margin_ms = cli.margin;

            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = shutdown.clone();
            ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).map_err(|err| {
                ConnlogError::Config(format!("cannot install Ctrl-C handler: {err}"))
            })?;

            tail::run(&cli.input_file, &params, reporter.as_ref(), &shutdown).await?;
        }
    }
    Ok(())
}
