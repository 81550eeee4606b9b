use tracing_subscriber::EnvFilter;

use crate::Error;

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,gatehouse_core=debug";

/// Install the global subscriber. Logs go to stderr; stdout carries command
/// output.
pub fn init() -> Result<(), Error> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_FILTER).map_err(|e| Error::Logging(e.to_string()))?,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}
