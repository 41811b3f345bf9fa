//! Errors - エラー型と分類
//!
//! 失敗は二層に分かれる:
//! - **メッセージ単位**: `DecodeFailure`, `PersistenceError`。その 1 件だけを今回の
//!   cycle から落とし、バッチの他のメッセージには影響しない
//! - **cycle 単位**: `CycleFault`。cycle 全体を中断し、空の結果か 500 になる
//!
//! `ConfigError` はどの操作でも起こりうるが、プロセスを落とすことはない。

use thiserror::Error;

/// ErrorKind は実行エラーの運用分類
///
/// - Transient: 一時的なエラー（次の cycle で回復しうる）
/// - Permanent: 恒久的なエラー（入力か設定を直さない限り再発する）
/// - Infrastructure: インフラエラー（DB / Pub/Sub / Secret Manager の障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// 必要な設定値がない、または解釈できない
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing configuration: {0} is not set")]
    Missing(&'static str),

    #[error("invalid configuration: {var}={value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// queue サービスとの通信の失敗
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// 到達不能、timeout、throttle、5xx など。次の cycle では成功しうる
    #[error("queue service unavailable: {0}")]
    Transient(String),

    /// サービスがリクエストを拒否した（認証、subscription なし、不正なリクエスト）
    #[error("queue service rejected the request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// レスポンスを解釈できない
    #[error("malformed queue response: {0}")]
    Malformed(String),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Transient(_) => ErrorKind::Transient,
            QueueError::Rejected { .. } => ErrorKind::Permanent,
            QueueError::Malformed(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// payload が UTF-8 テキストではない
///
/// fault ではなく分類。その cycle では落とし、queue が後で再配信する。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("payload is not valid UTF-8 (valid up to byte {valid_up_to} of {len})")]
pub struct DecodeFailure {
    pub valid_up_to: usize,
    pub len: usize,
}

/// 1 件分の store 書き込み（またはその接続）の失敗
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store query failed: {0}")]
    Query(String),

    /// store が初期化されていない（設定漏れ、認証情報なし、接続失敗）
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PersistenceError::Connection(_) => ErrorKind::Transient,
            PersistenceError::Query(_) => ErrorKind::Permanent,
            PersistenceError::Unavailable(_) => ErrorKind::Infrastructure,
        }
    }
}

/// secret（データベースの認証情報）の取得の失敗
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("secret store unreachable: {0}")]
    Transport(String),

    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("secret payload is malformed: {0}")]
    Malformed(String),
}

/// cycle 全体を中断させる fault
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleFault {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("pull failed: {0}")]
    Pull(QueueError),

    #[error("cycle aborted: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_and_outages_are_transient() {
        assert!(QueueError::Transient("timeout".into()).is_transient());
        assert!(
            !QueueError::Rejected {
                status: 403,
                message: "denied".into()
            }
            .is_transient()
        );
        assert_eq!(
            QueueError::Malformed("bad json".into()).kind(),
            ErrorKind::Infrastructure
        );
    }

    #[test]
    fn config_errors_name_the_variable() {
        let err = ConfigError::Missing("PUBSUB_TOPIC");
        assert!(err.to_string().contains("PUBSUB_TOPIC"));

        let fault: CycleFault = err.into();
        assert!(matches!(fault, CycleFault::Config(ConfigError::Missing("PUBSUB_TOPIC"))));
    }

    #[test]
    fn decode_failure_reports_the_offset() {
        let failure = DecodeFailure {
            valid_up_to: 2,
            len: 5,
        };
        assert_eq!(
            failure.to_string(),
            "payload is not valid UTF-8 (valid up to byte 2 of 5)"
        );
    }
}
