#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unknown handle type: {0}")]
    UnknownHandleType(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
