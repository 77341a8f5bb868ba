//! # osintwatch CLI
//!
//! ## Usage
//!
//! ```bash
//! osintwatch --config ./config/osintwatch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `osintwatch init` | Create the SQLite database and run schema migrations |
//! | `osintwatch sources` | List configured sources |
//! | `osintwatch once` | Run every source once and exit |
//! | `osintwatch daemon` | Run every source on its interval until Ctrl-C |
//! | `osintwatch recent` | Show the newest evidence |
//! | `osintwatch get <id>` | Show one evidence row with its history |
//! | `osintwatch verify` | Verify the evidence hash chain |
//! | `osintwatch serve` | Start the reporting HTTP API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use osintwatch::{config, db, ingest, logging, migrate, report, server, sources};

/// osintwatch: source monitoring with a hash-chained evidence ledger.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/osintwatch.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "osintwatch",
    about = "Monitor configured sources, match indicators, and keep a tamper-evident evidence log",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/osintwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// List configured sources with their kind, interval and URL.
    Sources,

    /// Fetch every source once, store evidence, send alerts, and exit.
    ///
    /// A failing source is reported and the rest still run; the exit status
    /// is non-zero if any source failed.
    Once,

    /// Schedule every source at its interval and run until Ctrl-C.
    Daemon,

    /// Show the most recent evidence.
    Recent {
        /// Number of rows to show.
        #[arg(long, default_value_t = 25)]
        limit: i64,
    },

    /// Show one evidence row, its content history and latest change.
    Get {
        /// Evidence id.
        id: i64,
    },

    /// Recompute the evidence hash chain and report the first break.
    Verify,

    /// Start the read-only reporting API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.app.log_level);

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized: {}", cfg.app.db_path.display());
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Once => {
            ingest::run_once(&cfg).await?;
        }
        Commands::Daemon => {
            ingest::run_daemon(&cfg).await?;
        }
        Commands::Recent { limit } => {
            report::run_recent(&cfg, limit).await?;
        }
        Commands::Get { id } => {
            report::run_get(&cfg, id).await?;
        }
        Commands::Verify => {
            report::run_verify(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
