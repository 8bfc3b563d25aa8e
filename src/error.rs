//! Error types for wheelhand.

use std::ops::RangeInclusive;

/// Top-level error type for an account's run loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
}

impl Error {
    /// Classify this error for the run loop's backoff table.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Api(e) => e.kind(),
            Error::Auth(AuthError::InvalidSession { .. }) => ErrorKind::InvalidSession,
            Error::Auth(_) | Error::Config(_) => ErrorKind::Unexpected,
        }
    }

    /// Whether this error ends the account's automation permanently.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::InvalidSession
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the game API over HTTP.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("server disconnected: {0}")]
    Disconnected(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("malformed response body: {0}")]
    MalformedBody(String),

    #[error("missing expected field in response: {0}")]
    MissingField(String),

    #[error("invalid proxy {proxy}: {reason}")]
    InvalidProxy { proxy: String, reason: String },
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Connect(_) => ErrorKind::Connect,
            ApiError::Disconnected(_) => ErrorKind::ServerDisconnected,
            ApiError::Status { .. } => ErrorKind::HttpStatus,
            ApiError::Transport(_) | ApiError::InvalidProxy { .. } => ErrorKind::Transport,
            ApiError::Timeout => ErrorKind::Timeout,
            ApiError::MalformedBody(_) => ErrorKind::MalformedBody,
            ApiError::MissingField(_) => ErrorKind::MissingField,
        }
    }

    /// Network-level failures that a retry may cure.
    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connect
                | ErrorKind::ServerDisconnected
                | ErrorKind::HttpStatus
                | ErrorKind::Transport
                | ErrorKind::Timeout
        )
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return ApiError::Timeout;
        }
        if e.is_connect() {
            return ApiError::Connect(e.to_string());
        }
        if let Some(status) = e.status() {
            return ApiError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            };
        }
        if e.is_decode() {
            return ApiError::MalformedBody(e.to_string());
        }
        if (e.is_request() || e.is_body()) && is_disconnect(&e) {
            return ApiError::Disconnected(e.to_string());
        }
        ApiError::Transport(e.to_string())
    }
}

/// Walk the source chain looking for a peer hang-up.
///
/// Typed `io::Error` kinds are checked first. hyper reports an early close
/// only through its message text, so that match depends on hyper's wording
/// and degrades to `Transport` if it changes.
fn is_disconnect(e: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(e);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>()
            && matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            )
        {
            return true;
        }
        let text = err.to_string().to_ascii_lowercase();
        if text.contains("connection closed") || text.contains("incomplete message") {
            return true;
        }
        current = err.source();
    }
    false
}

/// Errors raised by a credential provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("session is not authorized")]
    Unauthorized,

    #[error("account has been deactivated")]
    Deactivated,

    #[error("auth key is not registered")]
    AuthKeyUnregistered,

    #[error("flood wait of {seconds}s requested")]
    FloodWait { seconds: u64 },

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Identity-level failures that no retry will fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::Unauthorized
                | ProviderError::Deactivated
                | ProviderError::AuthKeyUnregistered
        )
    }
}

/// Failure to extract the signed payload from a web-app launch URL.
#[derive(Debug, thiserror::Error)]
pub enum WebAppParseError {
    #[error("invalid launch URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("launch URL has no {0} parameter")]
    MissingParam(&'static str),

    #[error("launch URL parameter {0} is empty")]
    EmptyParam(&'static str),
}

/// Authentication errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid session {session}: {reason}")]
    InvalidSession { session: String, reason: ProviderError },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Web app data error: {0}")]
    WebApp(#[from] WebAppParseError),
}

/// Classification of errors reaching the outermost iteration scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connect,
    ServerDisconnected,
    HttpStatus,
    Transport,
    Timeout,
    MalformedBody,
    MissingField,
    InvalidSession,
    Unexpected,
}

/// Backoff windows in seconds, one row per retryable kind.
const BACKOFF_TABLE: &[(ErrorKind, RangeInclusive<u64>)] = &[
    (ErrorKind::Connect, 1800..=3600),
    (ErrorKind::ServerDisconnected, 900..=1800),
    (ErrorKind::HttpStatus, 3600..=7200),
    (ErrorKind::Transport, 3600..=7200),
    (ErrorKind::Timeout, 7200..=14400),
    (ErrorKind::MalformedBody, 1800..=3600),
    (ErrorKind::MissingField, 1800..=3600),
    (ErrorKind::Unexpected, 7200..=14400),
];

impl ErrorKind {
    /// Backoff window in seconds, or `None` when the kind is fatal.
    pub fn backoff(self) -> Option<RangeInclusive<u64>> {
        BACKOFF_TABLE
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, window)| window.clone())
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Connect => "Connection error",
            ErrorKind::ServerDisconnected => "Server disconnected",
            ErrorKind::HttpStatus => "HTTP response error",
            ErrorKind::Transport => "HTTP client error",
            ErrorKind::Timeout => "Request timed out",
            ErrorKind::MalformedBody => "JSON decode error",
            ErrorKind::MissingField => "Key error",
            ErrorKind::InvalidSession => "Invalid session",
            ErrorKind::Unexpected => "Unexpected error",
        }
    }
}

/// Result type alias for wheelhand.
pub type Result<T> = std::result::Result<T, Error>;
