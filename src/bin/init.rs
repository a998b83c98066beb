//! rbacd_init - One-time database initialization tool
//!
//! Creates a fresh access control database with the built-in catalog and,
//! optionally, an initial administrator.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// rbacd database initialization tool
#[derive(Parser, Debug)]
#[command(
    name = "rbacd_init",
    version,
    about = "Initialize a new access control database"
)]
struct Args {
    /// Path to SQLite database file to create (must not exist)
    #[arg(short, long)]
    database: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rbacd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let args = Args::parse();

    // Optional initial administrator
    let admin_username = std::env::var("RBACD_ADMIN_USERNAME").ok();

    rbacd::init::init_database(&args.database, admin_username.as_deref()).await?;

    Ok(())
}
