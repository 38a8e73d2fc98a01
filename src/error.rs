//! Error types for the render/capture service

use thiserror::Error;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while authorizing or serving a request
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to initialize the shared browser engine
    #[error("Engine initialization failed: {0}")]
    InitializationError(String),

    /// Failed to load content or navigate
    #[error("Failed to load content: {0}")]
    LoadError(String),

    /// Failed to produce an image
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// An element target matched nothing on the page
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// No Authorization header was presented
    #[error("missing credentials")]
    MissingCredentials,

    /// The bearer token could not be decoded or verified
    #[error("malformed or untrusted token: {0}")]
    InvalidToken(String),

    /// The policy denied the request or evaluation hit a limit.
    ///
    /// The reason is only ever logged.
    #[error("unauthorized")]
    Unauthorized,

    /// Malformed request body or parameters
    #[error("invalid request: {0}")]
    Validation(String),

    /// A route that embeds its target in the path was called without one
    #[error("missing path segment: {0}")]
    MissingPathSegment(&'static str),

    /// No route matches the request
    #[error("route not found: {0}")]
    RouteNotFound(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// An invariant the server relies on did not hold
    #[error("internal error: {0}")]
    Internal(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status code the dispatcher answers with for this error.
    pub fn status(&self) -> u16 {
        match self {
            Error::MissingCredentials | Error::Unauthorized => 401,
            Error::InvalidToken(_) | Error::Validation(_) | Error::MissingPathSegment(_) => 400,
            Error::RouteNotFound(_) => 404,
            _ => 500,
        }
    }

    /// Whether this error is the caller's fault (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}
