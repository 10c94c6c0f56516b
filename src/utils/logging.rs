use std::{path::Path, sync::LazyLock};

use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::{format::FmtSpan, writer::MakeWriterExt};

pub const CLI_PREFIX: &str = "cli";

/// Installs the global subscriber. Logs always go to stdout when `show_std` is set, and are
/// additionally written into daily rotated files when a log directory is given.
pub fn enable_logging(
    prefix: &str,
    log_dir: Option<&Path>,
    log_level: Option<LevelFilter>,
    show_std: bool,
) -> Result<()> {
    let level = log_level
        .map(|v| v.to_string())
        .unwrap_or_else(|| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));

    let filter = tracing_subscriber::EnvFilter::new(format!(
        "{}={level}",
        env!("CARGO_PKG_NAME").replace("-", "_"),
    ));

    let stdout = std::io::stdout.with_filter(move |_| show_std);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::Builder::new()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix(prefix)
                .build(dir)?;

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(stdout.and(appender))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(stdout)
                .init();
        }
    }
    Ok(())
}

pub static TEST_LOGGING: LazyLock<()> = LazyLock::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .pretty()
        .try_init();
});
