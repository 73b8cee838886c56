use std::sync::Once;
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over `default_level`. Later calls are no-ops, so tests
/// may call this freely.
pub fn init_tracing(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}

/// Log one executed statement with its row count and duration.
pub fn log_statement(sql: &str, rows: u64, started: Instant) {
    let duration = started.elapsed();
    debug!(
        target: "sql_log",
        rows,
        elapsed_ms = duration.as_millis() as u64,
        "{}",
        format_statement(sql)
    );
}

/// Collapse whitespace so multi-line statements log on one line.
fn format_statement(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
