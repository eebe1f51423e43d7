//! Diagnostics for the chunk pipeline: a structured `log_metric!` macro and a
//! one-shot `env_logger` installer for callers that have no logger of their own.
//!
//! Metrics go through the `log` facade at debug level, so they cost nothing
//! unless a logger is installed and debug output is enabled.

use log::LevelFilter;
use std::fs::OpenOptions;
use std::sync::Once;

use crate::error::Result;

/// Logs a structured key-value metric line at debug level.
///
/// # Example
/// ```
/// use tambak_array::log_metric;
/// let nchunks = 4;
/// log_metric!("event" = "write_frame", "nchunks" = &nchunks);
/// ```
#[macro_export]
macro_rules! log_metric {
    ($($key:literal = $value:expr),+ $(,)?) => {
        if log::log_enabled!(log::Level::Debug) {
            let mut parts = Vec::new();
            $(
                parts.push(format!("\"{}\": \"{}\"", $key, $value));
            )+
            log::debug!("TAMBAK_METRIC: {{ {} }}", parts.join(", "));
        }
    };
}

static INIT_LOGGER: Once = Once::new();

/// Installs an `env_logger` backend at info level, once per process.
/// With `log_file`, output is appended to that file instead of stderr.
pub fn enable_verbose_logging(log_file: Option<String>) -> Result<()> {
    let target = match log_file {
        Some(filename) => Some(
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(filename)?,
        ),
        None => None,
    };

    INIT_LOGGER.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder.is_test(false);
        builder.filter_level(LevelFilter::Info);

        // Just the level and the message.
        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "[{}] {}", record.level(), record.args())?;
            buf.flush()?;
            Ok(())
        });

        if let Some(file) = target {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }

        // Another logger may already be installed by the host application.
        let _ = builder.try_init();
    });
    Ok(())
}
