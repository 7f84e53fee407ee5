//! Duet - merge a downloaded study database into the local one.

use clap::{Parser, Subcommand};
use duet_sync::commands::{self, MergeOptions};
use duet_sync::{Config, ConfigError, ConflictMode};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "duet")]
#[command(about = "Reconcile a local study database with a downloaded snapshot")]
#[command(version)]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge the remote snapshot into the local database.
    Merge {
        /// Local database (default: DUET_LOCAL_DB or flashcards.db).
        #[arg(short, long)]
        local: Option<PathBuf>,

        /// Downloaded snapshot (default: DUET_REMOTE_DB).
        #[arg(short, long)]
        remote: Option<PathBuf>,

        /// Treat rows modified after this time as changed, instead of the
        /// recorded last sync.
        #[arg(long)]
        since: Option<String>,

        /// How to settle conflicts (default: DUET_CONFLICT_MODE or ask).
        #[arg(long, value_enum)]
        on_conflict: Option<ConflictMode>,

        /// Skip copying the local database to <local>.backup.
        #[arg(long)]
        no_backup: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the last sync time and row counts of a database.
    Status {
        /// Database to inspect (default: DUET_LOCAL_DB or flashcards.db).
        #[arg(short, long)]
        local: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "duet_sync=debug,duet_engine=debug"
    } else {
        "duet_sync=info,duet_engine=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Merge {
            local,
            remote,
            since,
            on_conflict,
            no_backup,
            json,
        } => {
            let options = MergeOptions {
                local: local.unwrap_or(config.local_db),
                remote: remote
                    .or(config.remote_db)
                    .ok_or(ConfigError::MissingRemoteDb)?,
                since,
                backup: config.backup && !no_backup,
            };
            let mode = on_conflict.unwrap_or(config.conflict_mode);

            let outcome = match commands::merge(&options, commands::arbiter_for(mode)).await {
                Ok(outcome) => outcome,
                Err(err) if err.is_cancellation() => {
                    eprintln!("Sync cancelled: {}", err);
                    eprintln!("Tables merged before the cancel were kept; run again to finish.");
                    std::process::exit(1);
                }
                Err(err) => return Err(err.into()),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print!("{}", commands::summary(&outcome));
            }
        }
        Commands::Status { local } => {
            let path = local.unwrap_or(config.local_db);
            let report = commands::status(&path).await?;
            print!("{}", report);
        }
    }

    Ok(())
}
