pub mod local;
pub mod webdav;

use crate::error::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

pub use local::LocalDirectory;
pub use webdav::WebDavClient;

// ============ 公共常量 ============

/// 连接超时（秒）
pub const OP_TIMEOUT_SECS: u64 = 60;
/// 单个请求的默认超时（秒）- 上传大文件时需要足够长
pub const IO_TIMEOUT_SECS: u64 = 300;
/// 错误信息中保留的响应体长度
pub const BODY_SNIPPET_LEN: usize = 200;

/// 服务器连接参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl ServerConfig {
    /// 返回第一个为空的必填字段名
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.url.trim().is_empty() {
            Some("url")
        } else if self.username.trim().is_empty() {
            Some("username")
        } else if self.password.is_empty() {
            Some("password")
        } else {
            None
        }
    }
}

/// 扫描时获取的本地文件快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileRef {
    pub path: PathBuf,
    pub name: String,
    /// 小写扩展名，不含点；没有扩展名时为空
    pub extension: String,
    pub modified: DateTime<Local>,
    pub size: u64,
}

impl LocalFileRef {
    /// 从路径和元数据构建，文件名不是合法 UTF-8 时返回 None
    pub fn from_metadata(path: &Path, metadata: &std::fs::Metadata) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_string();
        let modified = metadata.modified().ok()?;
        Some(Self {
            path: path.to_path_buf(),
            extension: extension_of(&name),
            name,
            modified: DateTime::<Local>::from(modified),
            size: metadata.len(),
        })
    }
}

/// 提取小写扩展名（不含点）
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// WebDAV 响应：状态码和截断后的响应体
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavResponse {
    pub status: u16,
    pub body: String,
}

impl DavResponse {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            body: snippet(body, BODY_SNIPPET_LEN),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }
}

/// 按字符截断文本，避免把整页 HTML 写进日志
pub fn snippet(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// 远程存储接口
///
/// `path` 是相对于用户根目录、用 `/` 分隔的路径，实现负责编码每一段。
/// 只有网络层失败才返回 `Err`，任何 HTTP 状态码都以 `DavResponse` 返回，
/// 由调用方解释。
#[async_trait]
pub trait DavTransport: Send + Sync {
    /// 存在性探测（PROPFIND, Depth: 0）
    async fn probe(&self, path: &str) -> Result<DavResponse, TransportError>;

    /// 创建单层目录（MKCOL）
    async fn create_folder(&self, path: &str) -> Result<DavResponse, TransportError>;

    /// 流式上传文件内容（PUT）
    async fn upload(
        &self,
        path: &str,
        file: tokio::fs::File,
        size: u64,
    ) -> Result<DavResponse, TransportError>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 本地源目录接口
#[async_trait]
pub trait LocalSource: Send + Sync {
    /// 源目录路径
    fn root(&self) -> &Path;

    /// 列出源目录中的文件（不递归）
    async fn list_files(&self) -> io::Result<Vec<LocalFileRef>>;

    /// 删除本地文件
    async fn delete(&self, file: &LocalFileRef) -> io::Result<()>;
}
