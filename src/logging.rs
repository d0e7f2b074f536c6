//! Status-line logging for the CLI.
//!
//! Every workflow step reports through `tracing`; this module installs the
//! subscriber that renders those events on stderr.

use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "disk_migration=info,warn";

/// Builds the filter from `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
#[must_use]
pub fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber. Returns `false` when one is already set.
#[must_use]
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_existing_subscriber() {
        let _first = init();
        assert!(!init(), "a second subscriber must not replace the first");
    }

    #[test]
    fn default_filter_parses() {
        let rendered = EnvFilter::new(DEFAULT_FILTER).to_string();
        assert!(rendered.contains("disk_migration=info"), "rendered: {rendered}");
    }
}
