//! Logging setup shared by every binary

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter string for `crate_target` at `level`; noisy
/// dependencies are capped at warn
pub fn filter_directives(crate_target: &str, level: &str) -> String {
    format!("{}={},hyper=warn,h2=warn,rustls=warn,tokio=warn", crate_target, level)
}

/// Initialize logging with the specified level. `RUST_LOG` overrides it.
pub fn init_logging(crate_target: &str, level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut filter_str = filter_directives(crate_target, level);

    if let Ok(env_filter) = std::env::var("RUST_LOG") {
        filter_str = env_filter;
    }

    let filter = EnvFilter::try_new(&filter_str)
        .map_err(|e| format!("Invalid log filter '{}': {}", filter_str, e))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_ansi(atty::is(atty::Stream::Stdout))
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    info!("Logging initialized with level: {}", level);
    info!("Log filter: {}", filter_str);

    Ok(())
}
