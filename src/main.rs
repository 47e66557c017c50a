use clap::Parser;
use color_eyre::Result;
use ledgerline::app::App;
use ledgerline::commands::Command;
use ledgerline::config::Config;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE: &str = "ledgerline.log";

#[derive(Parser, Debug)]
#[command(name = "ledgerline")]
#[command(about = "Donations and expenses tracker that keeps working offline")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/ledgerline/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Start offline: reads come from the local cache, new records are queued
  #[arg(long, global = true)]
  offline: bool,

  /// Year to read or write (default: current year, or the record's date)
  #[arg(short, long, global = true)]
  year: Option<i32>,

  #[command(subcommand)]
  command: Command,
}

/// Log to a file in the data directory so stdout stays clean for output.
/// Use RUST_LOG to change the level (e.g. RUST_LOG=ledgerline=debug).
fn init_tracing(data_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(data_dir)?;
  let appender = tracing_appender::rolling::never(data_dir, LOG_FILE);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(filter)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&config.data_dir()?)?;

  let app = App::new(config, args.offline, args.year).await?;
  app.run(args.command).await?;

  Ok(())
}
