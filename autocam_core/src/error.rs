use std::error::Error as StdError;

/// Failure raised by the tracker, the stores, or configuration loading.
///
/// The engine only branches on `NotFound` (a missing epic rejects one item);
/// every other variant from the tracker aborts the cycle.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The tracker rejected the configured credentials (HTTP 401/403).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A process-wide resource was already claimed, e.g. the global subscriber.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{context} failed")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("{0}")]
    BackendMessage(String),
}

impl Error {
    /// Wrap a store or transport error, naming the operation that failed.
    #[tracing::instrument(level = "debug", name = "autocam.store_error", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Transport or decoding failure talking to the tracker over HTTP.
    pub fn tracker_http(source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Backend {
            context: "tracker request".into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
