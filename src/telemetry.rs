//! Telemetry initialization (tracing/tracing-subscriber).
//!
//! - LOG_LEVEL controls the filter, either a bare level ("debug") or full
//!   directives; defaults to `DEFAULT_DIRECTIVES`.
//! - LOG_FORMAT selects "pretty" (default), "compact" or "json".
//!
//! Targets:
//! - `generation`: planner, orchestrator attempts, duplicate rejections.
//! - `taskforge_backend`: service lifecycle, store and request summaries.
//!
//! Tower HTTP TraceLayer still adds per-request spans; this complements it.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_DIRECTIVES: &str = "info,generation=debug,taskforge_backend=debug,tower_http=info,axum=info";

#[derive(Debug, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

fn parse_format(raw: Option<&str>) -> LogFormat {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        _ => LogFormat::Pretty,
    }
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    // Each format is a different subscriber type, so init in each arm.
    match parse_format(std::env::var("LOG_FORMAT").ok().as_deref()) {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_selection() {
        assert_eq!(parse_format(Some("JSON")), LogFormat::Json);
        assert_eq!(parse_format(Some("compact")), LogFormat::Compact);
        assert_eq!(parse_format(Some("whatever")), LogFormat::Pretty);
        assert_eq!(parse_format(None), LogFormat::Pretty);
    }

    #[test]
    fn default_directives_parse() {
        assert!(DEFAULT_DIRECTIVES.parse::<EnvFilter>().is_ok());
    }
}
