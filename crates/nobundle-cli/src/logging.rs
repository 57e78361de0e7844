//! Logging initialization for the CLI.
//!
//! Library crates only emit `tracing` events; the subscriber is installed here.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter honouring `RUST_LOG`, with `-v`/`-vv` raising the `nobundle` targets.
pub fn filter(verbosity: u8) -> EnvFilter {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    for target in ["nobundle", "nobundle_core", "nobundle_cli"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialize the tracing subscriber.
///
/// # Arguments
/// * `verbosity` - 0 = INFO, 1 = DEBUG, 2+ = TRACE
/// * `json` - If true, output JSON lines to stderr
pub fn init(verbosity: u8, json: bool) {
    let subscriber = tracing_subscriber::registry().with(filter(verbosity));

    if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
