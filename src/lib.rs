mod tooling;

pub use tooling::*;

/// Install the process-wide logger. `RUST_LOG` overrides `level` when set;
/// calling this twice is harmless.
pub fn init_logging(level: log::LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .filter_module("ureq", log::LevelFilter::Warn)
        .filter_module("rustls", log::LevelFilter::Warn)
        .format_timestamp_millis();
    if let Ok(directives) = std::env::var("RUST_LOG") {
        builder.parse_filters(&directives);
    }
    if builder.try_init().is_err() {
        log::debug!("Logger was already initialized");
    }
}
