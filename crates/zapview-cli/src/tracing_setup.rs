use std::fs::OpenOptions;

use anyhow::Context;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log to stderr filtered by `RUST_LOG` (default `info`), and additionally at
/// debug level to the file named by `ZAPVIEW_LOG_FILE` when it is set.
pub fn init_tracing() -> anyhow::Result<()> {
    let file_logging = std::env::var("ZAPVIEW_LOG_FILE").ok();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    let registry = tracing_subscriber::registry().with(stderr_layer);

    if let Some(log_path) = file_logging {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file: {log_path}"))?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(tracing_subscriber::filter::LevelFilter::DEBUG);

        registry.with(file_layer).init();
        eprintln!("File logging enabled: {}", log_path);
    } else {
        registry.init();
    }
    Ok(())
}
