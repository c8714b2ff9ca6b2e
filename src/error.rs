use thiserror::Error;

/// Failure reported by the HTTP client for a single attempt
///
/// The variants mirror what a transport can tell apart: the connection never
/// came up, the server answered with an error status, or something in between
/// (proxy handshake, DNS, framing) went wrong.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    Connect { message: String },

    #[error("HTTP {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },
}

impl TransportError {
    pub fn connect(message: impl Into<String>) -> Self {
        TransportError::Connect {
            message: message.into(),
        }
    }

    pub fn status(code: u16, message: impl Into<String>) -> Self {
        TransportError::Status {
            code,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        TransportError::Protocol {
            message: message.into(),
        }
    }

    /// HTTP status code, if the failure carried one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TransportError::Connect { message }
            | TransportError::Status { message, .. }
            | TransportError::Protocol { message } => message,
        }
    }
}

/// Unified error type for the rotating transport
#[derive(Error, Debug)]
pub enum RotaError {
    // Rotation errors
    #[error("No more proxies available: all {pool_size} endpoints are invalid")]
    ExhaustedPool { pool_size: usize },

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Got 429 Too Many Requests")]
    RateLimited,

    #[error("A proxy has failed")]
    ProxyFailed,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Transport errors, surfaced unchanged
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result type alias for rotation operations
pub type Result<T> = std::result::Result<T, RotaError>;

impl RotaError {
    /// The underlying transport failure, if this error wraps one
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            RotaError::Transport(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RotaError::ExhaustedPool { .. })
    }

    /// Check if this error is a configuration problem rather than a runtime failure
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RotaError::InvalidConfig(_) | RotaError::InvalidProxyAddress(_)
        )
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RotaError {
    fn from(err: url::ParseError) -> Self {
        RotaError::InvalidProxyAddress(err.to_string())
    }
}

impl From<serde_json::Error> for RotaError {
    fn from(err: serde_json::Error) -> Self {
        RotaError::InvalidConfig(err.to_string())
    }
}
