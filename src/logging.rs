use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable console output
    Pretty,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Reads `LOG_FORMAT`; anything other than `json` means pretty output.
    pub fn from_env() -> Self {
        Self::from_value(std::env::var("LOG_FORMAT").ok().as_deref())
    }

    fn from_value(value: Option<&str>) -> Self {
        match value {
            Some(value) if value.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,kv_rate_limiter=trace
pub fn init() {
    init_with(LogFormat::from_env(), "info");
}

/// Initialize logging with an explicit format and a fallback filter used
/// when RUST_LOG is not set.
pub fn init_with(format: LogFormat, default_filter: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));

        let registry = tracing_subscriber::registry().with(filter);

        match format {
            LogFormat::Pretty => registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_line_number(true),
                )
                .init(),
            LogFormat::Json => registry
                .with(fmt::layer().json().with_current_span(false))
                .init(),
        }

        tracing::debug!(?format, "Logging initialized");
    });
}

/// Macro for logging rate limiting decisions
#[macro_export]
macro_rules! rate_limit_event {
    ($action:expr, $identifier:expr, $result:expr) => {
        tracing::debug!(
            action = $action,
            identifier = $identifier,
            allowed = $result.allowed,
            remaining = $result.remaining,
            retry_after = ?$result.retry_after_seconds,
            "Rate limit check"
        )
    };
}

/// Macro for logging storage operations with timing
#[macro_export]
macro_rules! storage_op {
    ($operation:expr, $key:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            key = $key,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Storage operation"
        )
    };
}
