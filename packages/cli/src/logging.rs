// ABOUTME: Tracing subscriber setup for the CLI
// ABOUTME: Logs go to stderr so stdout stays clean for tables and JSON

use taskbox_config::constants::RUST_LOG;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "info"
    } else {
        "warn"
    }
}

pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env(RUST_LOG)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
