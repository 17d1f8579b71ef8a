//! Errors - エラー型と分類
//!
//! ClientError はクライアント層のすべての失敗を表します。
//! 合流した呼び出し（single-flight / throttle）が同じ失敗を共有できるように
//! `Clone` を実装しています。

use thiserror::Error;

/// ErrorKind は失敗の運用分類
///
/// # 分類
/// - Transient: 一時的なエラー（レスポンスが返らなかった。リトライ可）
/// - Permanent: 恒久的なエラー（整形済みのエラーレスポンス等。リトライ無意味）
/// - Infrastructure: ローカル基盤のエラー（設定・トークン永続化）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// ClientError はクライアント層のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// No response was received (connect, timeout, reset).
    #[error("network error: {0}")]
    Network(String),

    /// A well-formed error response.
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("token persistence error: {0}")]
    Persistence(String),

    #[error("upload aborted")]
    Aborted,

    #[error("presign ticket expired")]
    TicketExpired,

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Network(_) => ErrorKind::Transient,
            ClientError::Config(_) | ClientError::Persistence(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Permanent,
        }
    }

    /// Only transient failures are eligible for automatic retry.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_transient() {
        assert!(ClientError::Network("reset".into()).is_transient());
        assert!(!ClientError::Unauthorized.is_transient());
        assert!(
            !ClientError::Status {
                status: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn persistence_is_infrastructure() {
        assert_eq!(
            ClientError::Persistence("disk full".into()).kind(),
            ErrorKind::Infrastructure
        );
        assert_eq!(ClientError::Aborted.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn aborted_message_is_stable() {
        assert_eq!(ClientError::Aborted.to_string(), "upload aborted");
    }
}
