use std::sync::Arc;
use std::time::Duration;

use gatehouse_core::clock::SystemClock;
use gatehouse_core::maintenance::Maintenance;
use gatehouse_core::store::postgres::PgStore;
use gatehouse_core::{AuthConfig, Authenticator, Repositories};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::Result;
use crate::cli::DbArgs;

async fn connect(db: &DbArgs) -> Result<PgPool> {
    info!(max_connections = db.max_connections, "connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&db.database_url)
        .await?;
    Ok(pool)
}

async fn authenticator(db: &DbArgs) -> Result<Authenticator> {
    let config = AuthConfig::from_env()?;
    let pool = connect(db).await?;
    let store = Arc::new(PgStore::new(pool));
    Ok(Authenticator::new(
        config,
        Repositories::from_store(store),
        Arc::new(SystemClock),
    ))
}

pub async fn migrate(db: &DbArgs) -> Result<()> {
    let pool = connect(db).await?;
    info!("running database migrations");
    gatehouse_core::migrate::migrate(&pool).await?;
    println!(
        "{}",
        serde_json::json!({ "migrated": gatehouse_core::migrate::embedded_count() })
    );
    Ok(())
}

pub async fn sweep(db: &DbArgs) -> Result<()> {
    let auth = authenticator(db).await?;
    let report = Maintenance::for_authenticator(&auth).run_once().await;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

pub async fn maintain(db: &DbArgs, interval_secs: Option<u64>) -> Result<()> {
    let auth = authenticator(db).await?;
    let every = interval_secs
        .map(Duration::from_secs)
        .unwrap_or(auth.config().maintenance_interval);
    if every.is_zero() {
        return Err(crate::Error::Custom("interval must be positive".into()));
    }

    info!(interval = ?every, "starting maintenance loop");
    let handle = Maintenance::for_authenticator(&auth).spawn(every);
    tokio::signal::ctrl_c().await?;
    info!("interrupted, stopping maintenance loop");
    handle.abort();
    Ok(())
}

pub async fn unlock(db: &DbArgs, account: &str, origin: &str) -> Result<()> {
    let auth = authenticator(db).await?;
    let reset = auth.guard().reset(account, origin).await?;
    println!(
        "{}",
        serde_json::json!({ "account": account, "origin": origin, "reset": reset })
    );
    Ok(())
}

pub async fn sync_roles(db: &DbArgs, principal: i64, roles: &[i64]) -> Result<()> {
    let auth = authenticator(db).await?;
    auth.engine().sync_user_roles(principal, roles).await?;
    let current = auth.engine().roles_for_principal(principal).await?;
    println!(
        "{}",
        serde_json::json!({ "principal": principal, "roles": current })
    );
    Ok(())
}

pub async fn check(db: &DbArgs, principal: i64, path: &str, method: &str) -> Result<()> {
    let auth = authenticator(db).await?;
    let decision = auth.engine().authorize(principal, path, method).await?;
    println!(
        "{}",
        serde_json::json!({
            "principal": principal,
            "path": path,
            "method": method.to_ascii_uppercase(),
            "decision": decision,
        })
    );
    Ok(())
}
