//! Tracing subscriber setup
//!
//! - `RUST_LOG` filter, default `info`; `--debug` forces `debug`
//! - JSON lines when `VIDPROBE_LOG_FORMAT=json`, human-readable otherwise
//! - Always written to stderr

use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_ENV: &str = "VIDPROBE_LOG_FORMAT";

fn wants_json(value: Option<&str>) -> bool {
    value.map(|v| v.trim().eq_ignore_ascii_case("json")).unwrap_or(false)
}

fn filter(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(debug: bool) {
    let json = wants_json(std::env::var(LOG_FORMAT_ENV).ok().as_deref());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(debug))
        .with_writer(std::io::stderr)
        .with_target(true);

    if json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}
