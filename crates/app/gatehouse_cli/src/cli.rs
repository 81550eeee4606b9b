use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "gatehouse",
    version,
    about = "Administration and maintenance for the Gatehouse auth core"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Database connection options.
#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/gatehouse"
    )]
    pub database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    pub max_connections: u32,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply the embedded database migrations.
    Migrate {
        #[command(flatten)]
        db: DbArgs,
    },

    /// Run one maintenance pass: sweep expired revocations and purge stale
    /// login attempts.
    Sweep {
        #[command(flatten)]
        db: DbArgs,
    },

    /// Run maintenance periodically until interrupted.
    Maintain {
        #[command(flatten)]
        db: DbArgs,

        /// Seconds between passes (defaults to MAINTENANCE_INTERVAL_SECS).
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Clear the failed-login state of an account and origin.
    Unlock {
        #[command(flatten)]
        db: DbArgs,

        #[arg(long)]
        account: String,

        #[arg(long)]
        origin: String,
    },

    /// Replace the roles of a principal.
    SyncRoles {
        #[command(flatten)]
        db: DbArgs,

        #[arg(long)]
        principal: i64,

        /// Role ID; repeat for several roles, omit to clear.
        #[arg(long = "role")]
        roles: Vec<i64>,
    },

    /// Evaluate an authorization decision.
    Check {
        #[command(flatten)]
        db: DbArgs,

        #[arg(long)]
        principal: i64,

        #[arg(long)]
        path: String,

        #[arg(long, default_value = "GET")]
        method: String,
    },

    /// Print version information.
    Version,
}
