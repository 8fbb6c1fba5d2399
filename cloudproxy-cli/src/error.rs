use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Proxy error: {0}")]
    Proxy(#[from] cloudproxy_engine::ProxyError),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),
}
