//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` formatter driven by [`LoggingConfig`].
//! `RUST_LOG` still wins over the configured level when it is set.

use std::sync::OnceLock;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{constants, ProtocolError, Result};

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber once. Later calls are no-ops.
///
/// # Errors
/// Returns `ProtocolError::Custom` if another subscriber was already installed
/// by someone else.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if INITIALIZED.get().is_some() || !config.log_to_console {
        return Ok(());
    }

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ProtocolError::Custom(format!("{}: {e}", constants::ERR_LOGGING_INIT)))?;
    let _ = INITIALIZED.set(());
    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}
