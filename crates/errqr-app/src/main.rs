//! errqr command line.
//!
//! Drives the offline cache controller against a persistent cache store and
//! runs the error-report flow against the data store.
//!
//! ## Usage
//!
//! ```bash
//! # Pre-cache the offline page and manifest, then take over
//! errqr --origin https://errqr.example.com install
//!
//! # Load a page the way the worker would answer it
//! errqr fetch / --navigate
//!
//! # Report an error for a scanned order
//! errqr report --order SO-1001 --category packing --sub-category "wrong item" \
//!     --description "Blue mug instead of red" --photo mug.jpg
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use errqr_common::{init_logging, LogFormat};

mod commands;
mod config;

use commands::{App, ReportArgs};
use config::{AppConfig, Overrides};

#[derive(Parser)]
#[command(name = "errqr")]
#[command(about = "Offline cache and error reports for the errqr scanner app")]
#[command(version)]
struct Cli {
    /// Config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// App origin that asset paths resolve against
    #[arg(long, global = true, env = "ERRQR_ORIGIN")]
    origin: Option<String>,

    /// Cache database path
    #[arg(long, global = true, env = "ERRQR_CACHE_DB")]
    cache_db: Option<PathBuf>,

    /// Log format: pretty, compact or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the current cache version (pre-caches static assets)
    Install,

    /// Delete every cache but the current version
    Activate,

    /// Fetch a URL through the offline cache controller
    Fetch {
        /// Absolute URL or path relative to the origin
        url: String,
        /// Treat as a page navigation (network first, offline fallback)
        #[arg(long)]
        navigate: bool,
        /// Print status line and headers before the body
        #[arg(short = 'i', long)]
        include: bool,
    },

    /// List caches and their entries
    Caches,

    /// List error categories, or the sub-categories of one
    Options {
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Use decoded QR text as the order number
    Scan {
        /// Decoded text
        text: String,
    },

    /// Submit an error report
    Report {
        #[arg(long)]
        order: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        sub_category: String,
        #[arg(long)]
        description: String,
        /// Photo to attach (PNG or JPEG)
        #[arg(long)]
        photo: Option<PathBuf>,
        /// Photo content type; guessed from the file name if omitted
        #[arg(long, requires = "photo")]
        photo_type: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(
        cli.config.as_deref(),
        Overrides {
            origin: cli.origin,
            cache_db: cli.cache_db,
            log_format: cli.log_format,
            verbosity: cli.verbose,
        },
    )?;
    init_logging(config.log.clone());

    let app = App::new(config)?;
    match cli.command {
        Commands::Install => app.install().await?,
        Commands::Activate => app.activate().await?,
        Commands::Fetch {
            url,
            navigate,
            include,
        } => app.fetch(&url, navigate, include).await?,
        Commands::Caches => app.caches_list().await?,
        Commands::Options { category } => app.options(category.as_deref()).await?,
        Commands::Scan { text } => app.scan(&text),
        Commands::Report {
            order,
            category,
            sub_category,
            description,
            photo,
            photo_type,
        } => {
            app.report(ReportArgs {
                order,
                category,
                sub_category,
                description,
                photo,
                photo_type,
            })
            .await?
        }
    }

    Ok(())
}
