use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

pub type FileFmtLayer =
    fmt::Layer<tracing_subscriber::Registry, fmt::format::DefaultFields, fmt::format::Format, BoxMakeWriter>;

pub type LogReloadHandle = reload::Handle<FileFmtLayer, tracing_subscriber::Registry>;

const DEFAULT_LOG_FILTER: &str = "info";
pub const ENV_VAR_LOG_FILE: &str = "SHIELD_LINK_LOG_FILE";

/// Creates a [`FileFmtLayer`] appending to the file at `log_path`.
///
/// ANSI colors are disabled for file output. Also used on `SIGHUP` to reopen the
/// file after it was rotated by an external tool.
pub fn make_file_fmt_layer(log_path: &Path) -> Result<FileFmtLayer, io::Error> {
    let file = OpenOptions::new().create(true).append(true).open(log_path)?;
    Ok(fmt::layer().with_writer(BoxMakeWriter::new(file)).with_ansi(false))
}

/// Initializes the global `tracing` subscriber with a reloadable file logging layer.
///
/// Verbosity is read from `RUST_LOG` and defaults to `"info"`.
/// The returned [`LogReloadHandle`] swaps the file layer at runtime, see [`reopen_log_file`].
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn setup_log_file(log_path: &Path) -> Result<LogReloadHandle, io::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (reload_layer, reload_handle): (
        reload::Layer<FileFmtLayer, tracing_subscriber::Registry>,
        LogReloadHandle,
    ) = reload::Layer::new(make_file_fmt_layer(log_path)?);
    tracing_subscriber::registry().with(reload_layer).with(filter).init();
    tracing::debug!("logging initialized with file output: {}", log_path.display());
    Ok(reload_handle)
}

/// Replaces the file layer behind `handle` with a freshly opened one.
pub fn reopen_log_file(handle: &LogReloadHandle, log_path: &Path) -> Result<(), io::Error> {
    let layer = make_file_fmt_layer(log_path)?;
    handle.reload(layer).map_err(io::Error::other)?;
    tracing::debug!("log file reopened: {}", log_path.display());
    Ok(())
}

/// Initializes the global `tracing` subscriber with stdout logging.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn setup_stdout() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(true))
        .with(filter)
        .init();
    tracing::debug!("logging initialized with stdout/stderr output");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_layer_creates_missing_log_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("shield_link.log");
        make_file_fmt_layer(&path)?;
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn file_layer_fails_for_missing_directory() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nope").join("shield_link.log");
        assert!(make_file_fmt_layer(&path).is_err());
        Ok(())
    }
}
