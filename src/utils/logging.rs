use crate::models::config::LoggingConfig;
use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Installs the global subscriber: ANSI output on stdout plus a daily
/// rolling file under `config.directory`. The returned guard flushes the
/// file writer and must live until shutdown.
pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.directory)?;

    let file_appender = tracing_appender::rolling::daily(&config.directory, &config.file_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},tower_http=warn,hyper=warn,reqwest=warn", config.level))
    });

    let file_layer = if config.json {
        fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .json()
            .boxed()
    } else {
        fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stdout).with_ansi(true))
        .with(file_layer)
        .try_init()?;

    info!("Logging initialized");
    Ok(guard)
}
