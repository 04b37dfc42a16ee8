use clap::{Parser, Subcommand};
use metron_ocr::{ReadingExtractor, TesseractCli};
use metron_storage::CsvReadingLog;
use rust_decimal::Decimal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::SummaryArgs;
use config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "metron", version, about = "Read utility meters from photos and report consumption")]
struct Cli {
    #[arg(long, global = true, help = "Config file (defaults to $METRON_CONFIG or metron.toml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read the meter in a photo and append it to the log.
    Ingest { image: PathBuf },
    /// Report consumption per day, week or month.
    Summary {
        #[arg(long, default_value = "daily", help = "daily, weekly or monthly")]
        period: String,
        #[arg(long, help = "Earliest reading to include (date or timestamp)")]
        start: Option<String>,
        #[arg(long, help = "Latest reading to include (date or timestamp)")]
        end: Option<String>,
        #[arg(long, default_value_t = false, help = "Fail on unparseable --start/--end instead of ignoring them")]
        strict_bounds: bool,
        #[arg(long, help = "Register value at which the meter wraps to zero")]
        rollover_at: Option<Decimal>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("metron=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = AppConfig::load(cli.config.as_deref())?;
    let log = CsvReadingLog::open(&cfg.log.path)?;

    match cli.command {
        Commands::Ingest { image } => {
            let extractor = ReadingExtractor::new(TesseractCli::new(cfg.tesseract.clone()), cfg.ocr.clone());
            let now = chrono::Local::now().naive_local();
            let reading = commands::ingest(&extractor, &log, &cfg.site, &image, now)?;
            println!("{}", commands::render_reading(&reading, cli.json)?);
        }
        Commands::Summary { period, start, end, strict_bounds, rollover_at } => {
            let args = SummaryArgs { period, start, end, strict_bounds, rollover_at };
            let rows = commands::summary(&log, &args)?;
            println!("{}", commands::render_summary(&rows, cli.json)?);
        }
    }

    Ok(())
}
