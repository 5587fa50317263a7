//! Logging setup
//!
//! Components log through `tracing` with per-component targets
//! (`bindery::reflect`, `bindery::resolve`, ...). [`init`] installs a fmt
//! subscriber filtered by `BINDERY_LOG` (default `warn`).

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directives
pub const ENV_LOG: &str = "BINDERY_LOG";

/// Install the global subscriber. Safe to call more than once; only the
/// first call (or a subscriber installed by the embedder) wins.
pub fn init() {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        tracing::warn!(target: "bindery::bridge", "logging initialised twice");
    }
}
