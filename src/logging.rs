// Tracing initialization
//
// Operational diagnostics go through `tracing`; operator-visible output
// goes through the event bus only.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `verbosity` is the count of `-v` flags: 0 = info for pentecter / warn
/// elsewhere, 1 = debug, 2+ = trace. `RUST_LOG` overrides everything.
pub fn init(verbosity: u8) {
    let default_directive = match verbosity {
        0 => "warn,pentecter=info",
        1 => "warn,pentecter=debug",
        _ => "info,pentecter=trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
