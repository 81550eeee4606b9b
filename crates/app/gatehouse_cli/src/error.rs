use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{}", .0)]
    Custom(String),

    #[error("IO::{:?}: {}", .0, .0)]
    Io(#[from] std::io::Error),

    #[error("Config: {}", .0)]
    Config(#[from] gatehouse_core::ConfigError),

    #[error("Database: {}", .0)]
    Database(#[from] sqlx::Error),

    #[error("Migration: {}", .0)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Auth: {}", .0)]
    Auth(#[from] gatehouse_core::AuthError),

    #[error("Authorization: {}", .0)]
    Authz(#[from] gatehouse_core::AuthzError),

    #[error("Json: {}", .0)]
    Json(#[from] serde_json::Error),

    #[error("Logging: {}", .0)]
    Logging(String),
}
