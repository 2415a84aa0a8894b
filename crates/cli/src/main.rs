//! Loja CLI - Database migrations and catalog tools.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront migrations (schema + session table)
//! loja-cli migrate
//!
//! # Insert or update products from a YAML file
//! loja-cli seed products catalog.yaml
//!
//! # Delete guest cart merge records older than 30 days
//! loja-cli prune merge-ledger --older-than-days 30
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "loja-cli")]
#[command(author, version, about = "Loja CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Seed the database
    Seed {
        #[command(subcommand)]
        target: SeedTarget,
    },
    /// Delete records no longer needed
    Prune {
        #[command(subcommand)]
        target: PruneTarget,
    },
}

#[derive(Subcommand)]
enum SeedTarget {
    /// Insert or update catalog products (matched by handle)
    Products {
        /// Path to the YAML product list
        file: String,
    },
}

#[derive(Subcommand)]
enum PruneTarget {
    /// Guest cart merge records of carts no session can still hold
    MergeLedger {
        /// Keep records written within this many days
        #[arg(long, default_value_t = commands::prune::DEFAULT_LEDGER_RETENTION_DAYS)]
        older_than_days: u32,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::Seed { target } => match target {
            SeedTarget::Products { file } => commands::seed::products(&file).await?,
        },
        Commands::Prune { target } => match target {
            PruneTarget::MergeLedger { older_than_days } => {
                commands::prune::merge_ledger(older_than_days).await?;
            }
        },
    }
    Ok(())
}
