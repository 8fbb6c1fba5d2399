use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

// Error taxonomy for a single proxied request
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Bad or missing credential. Reported as 404 so existence is not leaked.
    #[error("Unauthorized request")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream returned status code {0}")]
    UpstreamStatus(StatusCode),

    #[error("Upstream HTTP error: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Upstream closed the connection before the body completed")]
    UpstreamClosed,

    #[error("Invalid upstream URL: {0}")]
    UrlError(String),

    #[error("Decode failure: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProxyError {
    /// Status reported to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Unauthorized | ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::UpstreamStatus(status) => *status,
            ProxyError::Upstream(_) | ProxyError::UpstreamClosed | ProxyError::UrlError(_) => {
                StatusCode::NOT_FOUND
            }
            ProxyError::Decode(_) | ProxyError::Io(_) | ProxyError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the error happened while talking to the upstream service.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            ProxyError::UpstreamStatus(_) | ProxyError::Upstream(_) | ProxyError::UpstreamClosed
        )
    }
}

/// Empty response carrying only a status, as every error path does.
pub fn empty_response(status: StatusCode) -> Response {
    (status, [(header::CONTENT_LENGTH, "0")]).into_response()
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        empty_response(self.status())
    }
}
