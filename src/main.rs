//! # Postcode Locator CLI (`pcl`)
//!
//! The `pcl` binary is the primary interface for Postcode Locator. It
//! provides commands for database initialization, quarterly data updates,
//! one-shot queries, and starting the HTTP query service.
//!
//! ## Usage
//!
//! ```bash
//! pcl --config ./config/pcl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pcl init` | Create the SQLite database and run schema migrations |
//! | `pcl update` | Download, convert and load the postcode archive |
//! | `pcl lookup <postcode>` | Print the coordinates of one postcode |
//! | `pcl radius <postcode> <meters>` | Print postcodes within a radius, nearest first |
//! | `pcl distance <from> <to>` | Print the great-circle distance in meters |
//! | `pcl serve` | Start the HTTP query service |
//! | `pcl stats` | Show counts and recent update runs |
//!
//! ## Examples
//!
//! ```bash
//! # Load from a previously downloaded archive
//! pcl update --archive ./codepo_gb.zip
//!
//! # Cron-friendly: only runs on configured update days
//! pcl update --scheduled --progress off
//!
//! pcl radius "SW1A 1AA" 1500
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use postcode_locator::progress::ProgressMode;
use postcode_locator::{config, ingest, migrate, query, server, stats};

/// Postcode Locator CLI: UK postcode to WGS84 resolution with radius and
/// distance queries.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pcl.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "pcl",
    about = "Postcode Locator: resolve UK postcodes to WGS84 coordinates",
    version,
    long_about = "Postcode Locator converts the national-grid postcode archive into WGS84 \
    coordinates, stores them in SQLite with a spatial index, and answers lookup, radius and \
    distance queries from the command line or over HTTP."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/pcl.toml`.
    #[arg(long, global = true, default_value = "./config/pcl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, the postcode table, its spatial
    /// index, and the ingest run ledger. Safe to run repeatedly.
    Init,

    /// Fetch the postcode archive and load it into the database.
    ///
    /// The whole load is one transaction: on failure the previous data is
    /// kept and the downloaded archive is left in the work directory.
    Update {
        /// Load this local archive instead of downloading `[ingest].source_url`.
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Only run when today is a configured `[schedule]` day.
        #[arg(long)]
        scheduled: bool,

        /// Progress on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` when stderr is a terminal, otherwise `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print the coordinates of a postcode as JSON.
    Lookup {
        /// Postcode in any spacing or case, e.g. `sw1a1aa`.
        postcode: String,
    },

    /// Print every postcode within a radius of another, nearest first.
    Radius {
        /// Center postcode.
        postcode: String,

        /// Radius in meters (1 to 50000).
        #[arg(value_parser = clap::value_parser!(u32).range(1..=50_000))]
        meters: u32,
    },

    /// Print the great-circle distance between two postcodes in meters.
    Distance {
        from: String,
        to: String,
    },

    /// Start the HTTP query service on `[server].bind`.
    Serve,

    /// Show database size, postcode counts, and recent update runs.
    Stats,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Update {
            archive,
            scheduled,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_update(&cfg, archive, scheduled, mode).await?;
        }
        Commands::Lookup { postcode } => {
            query::run_lookup(&cfg, &postcode).await?;
        }
        Commands::Radius { postcode, meters } => {
            query::run_radius(&cfg, &postcode, meters).await?;
        }
        Commands::Distance { from, to } => {
            query::run_distance(&cfg, &from, &to).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
