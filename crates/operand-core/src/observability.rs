//! Tracing setup for hosts embedding the engine.
//!
//! Pass and operand spans are emitted under the `operand_core` target.
//! [`LoggingSettings::level`] sets the level of that target only; every
//! other target follows `RUST_LOG`, falling back to `warn`.

use std::sync::OnceLock;

use tracing::debug;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::settings::LoggingSettings;

/// Target of every span and event the engine emits.
pub const ENGINE_TARGET: &str = "operand_core";

static ENGINE_FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Directive pinning [`ENGINE_TARGET`] to the configured level.
pub fn engine_directive(logging: &LoggingSettings) -> Result<Directive, String> {
    let level: LevelFilter = logging
        .level
        .parse()
        .map_err(|_| format!("invalid engine log level: {}", logging.level))?;
    format!("{ENGINE_TARGET}={level}")
        .parse()
        .map_err(|e| format!("invalid engine log directive: {e}"))
}

/// `RUST_LOG` (default `warn`) with the engine target overridden from settings.
pub fn engine_filter(logging: &LoggingSettings) -> Result<EnvFilter, String> {
    let directive = engine_directive(logging)?;
    Ok(EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy()
        .add_directive(directive))
}

/// Install a global fmt subscriber filtered by [`engine_filter`].
///
/// Returns `Ok(false)` when the host already installed its own subscriber;
/// the engine level then cannot be changed through [`set_engine_level`].
pub fn init_tracing(logging: &LoggingSettings) -> Result<bool, String> {
    let filter = engine_filter(logging)?;
    let (reload_layer, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok();
    if installed {
        let _ = ENGINE_FILTER.set(handle);
    }
    Ok(installed)
}

/// Whether [`init_tracing`] installed the engine's subscriber.
pub fn is_installed() -> bool {
    ENGINE_FILTER.get().is_some()
}

/// Change the engine target level at runtime.
///
/// Returns `Ok(false)` when no engine subscriber is installed.
pub fn set_engine_level(logging: &LoggingSettings) -> Result<bool, String> {
    let Some(handle) = ENGINE_FILTER.get() else {
        return Ok(false);
    };
    let filter = engine_filter(logging)?;
    handle
        .reload(filter)
        .map_err(|e| format!("engine filter reload failed: {e}"))?;
    debug!(level = %logging.level, "Engine log level updated");
    Ok(true)
}
