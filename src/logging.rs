//! # Structured Logging Module
//!
//! Environment-aware structured logging for throttling, retry, queue and
//! checkpoint operations. Console output is human readable by default and JSON
//! when `CONDUIT_LOG_FORMAT=json`.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let json_output = std::env::var("CONDUIT_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        // RUST_LOG wins over the environment default
        let filter = || {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)))
        };

        let json_layer = json_output.then(|| {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter())
        });
        let console_layer = (!json_output).then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter())
        });

        let subscriber = tracing_subscriber::registry()
            .with(json_layer)
            .with(console_layer);

        // Use try_init to avoid panic if a global subscriber is already set
        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json_output,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
pub fn get_environment() -> String {
    resolve_environment(
        std::env::var("CONDUIT_ENV").ok(),
        std::env::var("APP_ENV").ok(),
    )
}

fn resolve_environment(conduit_env: Option<String>, app_env: Option<String>) -> String {
    conduit_env
        .or(app_env)
        .filter(|env| !env.trim().is_empty())
        .unwrap_or_else(|| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log a rate limiter admission event
pub fn log_rate_limit_event(event: &str, current_count: usize, limit: u32, utilization: f64) {
    tracing::info!(
        event = %event,
        current_count = current_count,
        limit = limit,
        utilization = utilization,
        timestamp = %Utc::now().to_rfc3339(),
        "🚦 RATE_LIMIT_EVENT"
    );
}

/// Log structured data for queue operations
pub fn log_queue_operation(operation: &str, item_id: &str, queue_size: usize, status: &str) {
    tracing::info!(
        operation = %operation,
        item_id = %item_id,
        queue_size = queue_size,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "📥 QUEUE_OPERATION"
    );
}

/// Log a retry attempt outcome
pub fn log_retry_attempt(
    request_id: &str,
    attempt: u32,
    category: &str,
    delay_ms: Option<u64>,
    status: &str,
) {
    tracing::info!(
        request_id = %request_id,
        attempt = attempt,
        category = %category,
        delay_ms = delay_ms,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "🔁 RETRY_ATTEMPT"
    );
}

/// Log structured data for database operations
pub fn log_database_operation(
    operation: &str,
    table: Option<&str>,
    record_id: Option<&str>,
    status: &str,
    duration_ms: Option<u64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        table = table,
        record_id = record_id,
        status = %status,
        duration_ms = duration_ms,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "💾 DATABASE_OPERATION"
    );
}

/// Log structured data for batch job progress
pub fn log_batch_operation(
    operation: &str,
    job_id: &str,
    completed: usize,
    failed: usize,
    total: usize,
    status: &str,
) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        completed = completed,
        failed = failed,
        total = total,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "📦 BATCH_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
