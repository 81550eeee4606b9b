//! `gatehouse` administration binary.

// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use clap::Parser;
use cli::{Cli, Commands};

mod cli;
mod commands;
mod logging;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!("{}", e);
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init()?;

    let args = Cli::parse();

    match &args.command {
        Commands::Version => {
            println!(
                "{} {} (core {})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                gatehouse_core::version()
            );
        }
        Commands::Migrate { db } => commands::migrate(db).await?,
        Commands::Sweep { db } => commands::sweep(db).await?,
        Commands::Maintain { db, interval_secs } => commands::maintain(db, *interval_secs).await?,
        Commands::Unlock {
            db,
            account,
            origin,
        } => commands::unlock(db, account, origin).await?,
        Commands::SyncRoles {
            db,
            principal,
            roles,
        } => commands::sync_roles(db, *principal, roles).await?,
        Commands::Check {
            db,
            principal,
            path,
            method,
        } => commands::check(db, *principal, path, method).await?,
    }

    Ok(())
}
