//! Tracing subscriber setup
//!
//! The library only emits `tracing` events. Whatever drives a fleet run
//! installs one subscriber per process, either writing to stderr or
//! captured by the test harness.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::{Error, Result};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_DIRECTIVE: &str = "fleet_core=info,fleet_chain=warn";

/// Where formatted events go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Stderr,
    /// Through the test harness, so output only shows for failing tests
    Captured,
}

/// Install the operator subscriber
pub fn init() -> Result<()> {
    init_with(DEFAULT_DIRECTIVE, Output::Stderr)
}

/// Install a debug-level, captured subscriber unless one is already installed
pub fn init_for_tests() {
    let _ = init_with("fleet_core=debug,fleet_chain=debug", Output::Captured);
}

/// Install a subscriber filtered by `RUST_LOG`, falling back to `directive`
pub fn init_with(directive: &str, output: Output) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .map_err(|e| Error::Logging(e.to_string()))?;
    let layer = fmt::layer().with_target(true).compact();

    let installed = match output {
        Output::Stderr => tracing_subscriber::registry()
            .with(filter)
            .with(layer.with_writer(std::io::stderr))
            .try_init(),
        Output::Captured => tracing_subscriber::registry()
            .with(filter)
            .with(layer.with_test_writer())
            .try_init(),
    };
    installed.map_err(|e| Error::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_an_error() {
        init_for_tests();
        init_for_tests();
        assert!(matches!(init(), Err(Error::Logging(_))));

        tracing::info!(endpoint = "alpha", "captured by the harness");
    }
}
