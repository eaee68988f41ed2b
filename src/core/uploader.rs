//! 单文件上传

use crate::core::folder::RemoteFolderPath;
use crate::storage::{DavTransport, LocalFileRef};
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::debug;

/// 上传结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// 201，远程新建
    Created,
    /// 204，覆盖了已存在的远程文件
    Overwritten,
    Skipped(String),
    Failed(String),
}

impl UploadOutcome {
    /// 只有 Created 和 Overwritten 会写入上传记录
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Created | UploadOutcome::Overwritten)
    }

    fn from_status(status: u16, body: &str) -> Self {
        match status {
            201 => UploadOutcome::Created,
            204 => UploadOutcome::Overwritten,
            _ if body.is_empty() => UploadOutcome::Failed(format!("HTTP {}", status)),
            _ => UploadOutcome::Failed(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadOutcome::Created => write!(f, "created"),
            UploadOutcome::Overwritten => write!(f, "overwritten"),
            UploadOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
            UploadOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// 上传器
///
/// 不读写上传记录，也不删除本地文件，这些由同步引擎根据返回结果决定。
pub struct Uploader {
    transport: Arc<dyn DavTransport>,
}

impl Uploader {
    pub fn new(transport: Arc<dyn DavTransport>) -> Self {
        Self { transport }
    }

    /// 上传到已创建好的远程目录
    pub async fn upload(&self, file: &LocalFileRef, folder: &RemoteFolderPath) -> UploadOutcome {
        let remote_path = folder.join_file(&file.name);

        let handle = match tokio::fs::File::open(&file.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return UploadOutcome::Skipped("本地文件已不存在".to_string());
            }
            Err(e) => return UploadOutcome::Failed(format!("无法读取本地文件: {}", e)),
        };

        // 扫描后文件可能被改写，以打开时的大小为准
        let size = match handle.metadata().await {
            Ok(m) => m.len(),
            Err(_) => file.size,
        };

        match self.transport.upload(&remote_path, handle, size).await {
            Ok(response) => {
                debug!("PUT {} -> HTTP {}", remote_path, response.status);
                UploadOutcome::from_status(response.status, &response.body)
            }
            Err(e) => UploadOutcome::Failed(e.to_string()),
        }
    }
}
