use thiserror::Error;

pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("remote service error: {0}")]
    Remote(String),

    /// 流以失败结束时的错误；`kind` 为导致失败的原始错误类型
    #[error("{message}")]
    Operation { kind: &'static str, message: String },

    #[error("remote service returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    #[error("pipe error: {0}")]
    Pipe(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("method id {0} is registered twice")]
    DuplicateMethod(u8),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl ProxyError {
    /// 写入错误响应 `Type` 属性的简短稳定名称
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidArgument(_) => "InvalidArgument",
            ProxyError::InvalidState(_) => "InvalidState",
            ProxyError::NotFound(_) => "NotFound",
            ProxyError::Cancelled => "Cancelled",
            ProxyError::Operation { kind, .. } => kind,
            ProxyError::Remote(_) | ProxyError::Http { .. } | ProxyError::Request(_) => "Remote",
            ProxyError::Unauthenticated(_) => "Unauthenticated",
            ProxyError::Pipe(_) | ProxyError::Protocol(_) => "Transport",
            ProxyError::UnknownMethod(_) | ProxyError::DuplicateMethod(_) => "Dispatch",
            ProxyError::Config(_) => "Config",
            ProxyError::Storage(_) | ProxyError::Sqlite(_) => "Storage",
            ProxyError::Io(_) => "Io",
            ProxyError::Json(_) => "Serialization",
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ProxyError::InvalidArgument(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        ProxyError::InvalidState(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProxyError::Cancelled)
            || matches!(self, ProxyError::Io(err) if err.kind() == std::io::ErrorKind::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_groups_transport_errors() {
        assert_eq!(ProxyError::Pipe("x".into()).kind(), "Transport");
        assert_eq!(ProxyError::Protocol("x".into()).kind(), "Transport");
        assert_eq!(ProxyError::UnknownMethod("Nope".into()).kind(), "Dispatch");
    }

    #[test]
    fn test_interrupted_io_counts_as_cancelled() {
        let err: ProxyError =
            std::io::Error::new(std::io::ErrorKind::Interrupted, "upload cancelled").into();
        assert!(err.is_cancelled());
        assert!(!ProxyError::Remote("boom".into()).is_cancelled());
    }
}
