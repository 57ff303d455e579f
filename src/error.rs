use thiserror::Error;

/// Failure taxonomy shared by every connector.
///
/// Expected conditions the caller may want to branch on get their own
/// variants (`Unauthorized`, `NotFound`, `InvalidOAuthState`) instead of
/// being folded into a generic provider error, so callers pattern-match
/// rather than inspect message strings.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Missing, invalid or expired credentials.
    #[error("not authenticated: {0}")]
    Unauthorized(String),

    /// The requested website, file or provider resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Non-2xx provider response that is neither an auth failure nor a 404.
    /// Carries the HTTP status so the caller can distinguish a 5xx outage
    /// from a 4xx request problem.
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    /// OAuth callback carried a `state` that does not match the one issued
    /// for this session, or arrived before an authorization URL was issued.
    #[error("invalid oauth state: {0}")]
    InvalidOAuthState(String),

    /// The session payload for a connector could not be decoded, or a
    /// required credential field is missing.
    #[error("invalid session data: {0}")]
    Session(String),

    /// Connection-level failure that is not covered by a more specific
    /// source error (e.g. a background task that could not be joined).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ftp error: {0}")]
    Ftp(#[from] suppaftp::FtpError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl ConnectorError {
    /// Map an HTTP status plus provider message into the right variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => ConnectorError::Unauthorized(message),
            404 => ConnectorError::NotFound(message),
            _ => ConnectorError::Api { status, message },
        }
    }

    /// True when the error means "the resource does not exist", which some
    /// flows treat as an expected signal (e.g. the CI-file existence check).
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConnectorError::NotFound(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ConnectorError::Unauthorized(_))
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;
