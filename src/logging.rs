use axum::http::HeaderMap;
use tracing::Span;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::ServiceInfo;

pub const REDACTED: &str = "[REDACTED]";

/// Install the global subscriber. `level` is an `EnvFilter` directive; an
/// unparseable one falls back to `info` rather than silencing everything.
pub fn init(level: &str, format: LogFormat) -> Result<(), TryInitError> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
            .try_init(),
    }
}

/// Root span for process-level work (start-up, shutdown). Request spans run
/// on connection tasks with no parent, so they stamp the same two fields
/// themselves.
pub fn service_span(service: &ServiceInfo) -> Span {
    tracing::info_span!(
        "service",
        service = %service.name,
        env = %service.environment,
    )
}

fn is_sensitive(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == "authorization"
        || name == "proxy-authorization"
        || name == "cookie"
        || name == "set-cookie"
        || name.contains("secret")
        || name.contains("token")
        || name.contains("password")
}

/// Render headers for a log line with credentials masked.
pub fn redact_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if is_sensitive(name.as_str()) {
                REDACTED
            } else {
                value.to_str().unwrap_or("<binary>")
            };
            format!("{}={}", name, value)
        })
        .collect::<Vec<_>>()
        .join(" ")
}
