//! Shrinekeeper CLI entry point.

mod archive;
mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use shrine_db::ShrineDb;
use std::path::PathBuf;

use cli::config::ConfigCommand;

#[derive(Parser)]
#[command(
    name = "shrinekeeper",
    about = "Sticker-event scan & reconciliation",
    version
)]
struct Cli {
    /// Guild whose event is being managed
    #[arg(long, global = true, env = "SHRINEKEEPER_GUILD", default_value = "")]
    guild: String,

    /// Database path (defaults to ~/.shrinekeeper/shrinekeeper.sqlite3)
    #[arg(long, global = true, env = "SHRINEKEEPER_DB")]
    db: Option<PathBuf>,

    /// Mirror the full log to stderr
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the event configuration and participation count
    Status,
    /// Activate the event (requires channel and sticker configured)
    Activate,
    /// Deactivate the event
    Deactivate,
    /// Inspect or update the event configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Scan an exported channel history and reconcile the ledger
    Scan {
        /// Channel export (JSON) to scan
        archive: PathBuf,
        /// Where to write the report (defaults to the home reports dir)
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    shrine_logging::init_logging("shrinekeeper", cli.verbose)?;

    if cli.guild.is_empty() {
        anyhow::bail!("A guild id is required: pass --guild or set SHRINEKEEPER_GUILD");
    }

    let db_path = cli.db.unwrap_or_else(shrine_logging::default_db_path);
    let db = ShrineDb::open(&db_path).await?;

    match cli.command {
        Command::Status => cli::event::status(&db, &cli.guild).await,
        Command::Activate => cli::event::activate(&db, &cli.guild).await,
        Command::Deactivate => cli::event::deactivate(&db, &cli.guild).await,
        Command::Config { command } => cli::config::run(&db, &cli.guild, command).await,
        Command::Scan {
            archive,
            report_dir,
        } => {
            cli::scan::run(
                &db,
                &cli.guild,
                cli::scan::ScanArgs {
                    archive,
                    report_dir,
                },
            )
            .await
        }
    }
}
