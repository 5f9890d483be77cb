use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "weather_core=info,weather_cli=info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter;
/// JSON output is used when `json` is set or `WEATHER_LOG_JSON` is present.
pub fn init(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json_logging = json || std::env::var("WEATHER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
