use std::{env, io};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};


/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV: &str = "LIFECONFIG_LOG_FORMAT";

/// Shape of log lines written to stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human readable output
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// `json` selects [`LogFormat::Json`]; anything else is pretty.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }

    /// Reads [`LOG_FORMAT_ENV`].
    pub fn from_env() -> Self {
        env::var(LOG_FORMAT_ENV)
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default()
    }
}

/// Installs the global subscriber using the format from [`LOG_FORMAT_ENV`].
///
/// `RUST_LOG` filters events, `info` when unset. Stdout is left to the
/// binary's data output.
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    init_with(LogFormat::from_env())
}

/// Installs the global subscriber with an explicit format.
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init_with(format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init()?,
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_names(true)
                    .with_writer(io::stderr),
            )
            .try_init()?,
    }

    Ok(())
}
