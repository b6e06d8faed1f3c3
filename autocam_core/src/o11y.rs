use crate::{Error, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Output format of the process-wide log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(Error::InvalidInput(format!(
                "AUTOCAM_LOG_FORMAT must be 'json' or 'pretty', got {other:?}"
            ))),
        }
    }

    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        match std::env::var("AUTOCAM_LOG_FORMAT") {
            Ok(raw) => Self::parse(&raw),
            Err(_) => Ok(Self::default()),
        }
    }
}

/// Install the global subscriber using `RUST_LOG` and `AUTOCAM_LOG_FORMAT`.
pub fn init_global_from_env() -> Result<()> {
    init_global(LogFormat::from_env()?)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_global(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_target(true))
            .try_init(),
    };
    installed.map_err(|e| Error::Conflict(format!("tracing already initialized: {e}")))
}
