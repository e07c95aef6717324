use anyhow::Result;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pocketchat_core::Config;

/// Route tracing output to a log file so it never lands on the terminal UI.
///
/// `RUST_LOG` wins over the default filter. Keep the returned guard alive
/// until exit or buffered lines are lost.
pub fn init(debug: bool) -> Result<WorkerGuard> {
    let log_dir = Config::config_dir()?.join("logs");
    fs::create_dir_all(&log_dir)?;

    let appender = tracing_appender::rolling::never(&log_dir, "pocketchat.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let default_filter = if debug {
        "pocketchat=debug,pocketchat_core=debug"
    } else {
        "pocketchat=info,pocketchat_core=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .try_init();

    Ok(guard)
}
