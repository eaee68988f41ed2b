//! 同步错误分类

use thiserror::Error;

/// 同步过程中的错误
///
/// 只有 `Configuration` 会中止整次运行，其余错误只影响触发它的那个文件。
#[derive(Error, Debug)]
pub enum SyncError {
    /// 凭证缺失、本地目录不存在、上传记录无法读取
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 远程目录探测或创建时返回了意外状态
    #[error("远程目录错误 {path}: {reason}")]
    Protocol { path: String, reason: String },

    /// 上传返回非成功状态，或网络层失败
    #[error("上传失败 {file}: {reason}")]
    Transfer { file: String, reason: String },

    /// 上传成功后删除本地文件失败
    #[error("删除本地文件失败 {file}: {source}")]
    LocalIo {
        file: String,
        #[source]
        source: std::io::Error,
    },

    /// 上传成功后写入上传记录失败
    #[error("写入上传记录失败 {file}: {source}")]
    Ledger {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    /// 是否需要中止整次运行
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Configuration(_))
    }
}

/// 传输层错误（连接失败、超时、DNS 等）
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("请求超时: {0}")]
    Timeout(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("无效的请求: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else if e.is_builder() {
            TransportError::InvalidRequest(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_is_fatal() {
        assert!(SyncError::Configuration("x".into()).is_fatal());
        assert!(!SyncError::Protocol {
            path: "a".into(),
            reason: "b".into()
        }
        .is_fatal());
        assert!(!SyncError::LocalIo {
            file: "a.jpg".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        }
        .is_fatal());
    }
}
