//! 远程目录解析与创建

use crate::error::SyncError;
use crate::storage::{DavTransport, LocalFileRef};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// 远程目录路径（例如 `TermuxUploads/2024/03`）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFolderPath {
    segments: Vec<String>,
}

impl RemoteFolderPath {
    /// 按 `/` 拆分，丢弃空段
    pub fn new(root: &str) -> Self {
        Self {
            segments: root
                .split('/')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// 文件的目标目录：根目录，按修改时间追加 年/月
    pub fn for_file(root: &str, file: &LocalFileRef, partition_by_date: bool) -> Self {
        let mut path = Self::new(root);
        if partition_by_date {
            path.segments.push(file.modified.format("%Y").to_string());
            path.segments.push(file.modified.format("%m").to_string());
        }
        path
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// 逐级前缀：`a`, `a/b`, `a/b/c`
    pub fn prefixes(&self) -> Vec<String> {
        let mut current = String::new();
        self.segments
            .iter()
            .map(|segment| {
                if !current.is_empty() {
                    current.push('/');
                }
                current.push_str(segment);
                current.clone()
            })
            .collect()
    }

    /// 目录下某个文件的完整路径
    pub fn join_file(&self, name: &str) -> String {
        if self.segments.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.segments.join("/"), name)
        }
    }
}

impl fmt::Display for RemoteFolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// PROPFIND 结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeResult {
    Found,
    NotFound,
    Unexpected,
}

impl ProbeResult {
    fn from_status(status: u16) -> Self {
        match status {
            // 207 Multi-Status 是 PROPFIND 的标准成功响应
            200 | 207 => ProbeResult::Found,
            404 => ProbeResult::NotFound,
            _ => ProbeResult::Unexpected,
        }
    }
}

/// MKCOL 成功：201 已创建，405 已存在（可能被并发的其他客户端抢先创建）
fn mkcol_succeeded(status: u16) -> bool {
    matches!(status, 201 | 405)
}

/// 远程目录解析器
///
/// 记录本次运行中已确认存在的前缀，同一目录下的后续文件不再重复探测。
pub struct FolderResolver {
    transport: Arc<dyn DavTransport>,
    confirmed: Mutex<HashSet<String>>,
}

impl FolderResolver {
    pub fn new(transport: Arc<dyn DavTransport>) -> Self {
        Self {
            transport,
            confirmed: Mutex::new(HashSet::new()),
        }
    }

    /// 确保目录链上的每一级都存在
    pub async fn ensure(&self, path: &RemoteFolderPath) -> Result<(), SyncError> {
        // 整条链解析期间持有锁，并发上传时同一目录只探测一次
        let mut confirmed = self.confirmed.lock().await;
        for prefix in path.prefixes() {
            if confirmed.contains(&prefix) {
                continue;
            }

            self.ensure_one(&prefix).await?;
            confirmed.insert(prefix);
        }
        Ok(())
    }

    async fn ensure_one(&self, prefix: &str) -> Result<(), SyncError> {
        let probe = self
            .transport
            .probe(prefix)
            .await
            .map_err(|e| protocol_error(prefix, e.to_string()))?;

        match ProbeResult::from_status(probe.status) {
            ProbeResult::Found => {
                debug!("远程目录已存在: {}", prefix);
                Ok(())
            }
            ProbeResult::NotFound => {
                info!("创建远程目录: {}", prefix);
                let created = self
                    .transport
                    .create_folder(prefix)
                    .await
                    .map_err(|e| protocol_error(prefix, e.to_string()))?;

                if mkcol_succeeded(created.status) {
                    if created.status == 405 {
                        debug!("远程目录已被其他客户端创建: {}", prefix);
                    }
                    Ok(())
                } else {
                    error!(
                        "创建远程目录失败 {}: HTTP {} {}",
                        prefix, created.status, created.body
                    );
                    Err(protocol_error(
                        prefix,
                        format!("MKCOL 返回 HTTP {}: {}", created.status, created.body),
                    ))
                }
            }
            ProbeResult::Unexpected => {
                error!(
                    "探测远程目录返回意外状态 {}: HTTP {} {}",
                    prefix, probe.status, probe.body
                );
                Err(protocol_error(
                    prefix,
                    format!("PROPFIND 返回意外状态 HTTP {}: {}", probe.status, probe.body),
                ))
            }
        }
    }
}

fn protocol_error(path: &str, reason: String) -> SyncError {
    SyncError::Protocol {
        path: path.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::storage::{extension_of, DavResponse};
    use async_trait::async_trait;
    use chrono::{Local, TimeZone};
    use std::collections::HashMap;
    use std::path::PathBuf;

    /// 按路径返回预设状态的传输层，记录所有调用
    #[derive(Default)]
    struct ScriptedDav {
        probe_status: HashMap<String, u16>,
        mkcol_status: HashMap<String, u16>,
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedDav {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DavTransport for ScriptedDav {
        async fn probe(&self, path: &str) -> Result<DavResponse, TransportError> {
            self.calls.lock().unwrap().push(format!("PROPFIND {}", path));
            Ok(DavResponse::status(
                *self.probe_status.get(path).unwrap_or(&404),
            ))
        }

        async fn create_folder(&self, path: &str) -> Result<DavResponse, TransportError> {
            self.calls.lock().unwrap().push(format!("MKCOL {}", path));
            match self.mkcol_status.get(path) {
                Some(0) => Err(TransportError::Network("connection refused".into())),
                Some(status) => Ok(DavResponse::new(*status, "denied")),
                None => Ok(DavResponse::status(201)),
            }
        }

        async fn upload(
            &self,
            _path: &str,
            _file: tokio::fs::File,
            _size: u64,
        ) -> Result<DavResponse, TransportError> {
            unreachable!("resolver never uploads")
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn photo(name: &str) -> LocalFileRef {
        LocalFileRef {
            path: PathBuf::from(name),
            name: name.to_string(),
            extension: extension_of(name),
            modified: Local.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap(),
            size: 1,
        }
    }

    #[test]
    fn path_is_partitioned_by_year_and_month() {
        let path = RemoteFolderPath::for_file("/TermuxUploads/", &photo("IMG_0001.jpg"), true);
        assert_eq!(path.segments(), ["TermuxUploads", "2024", "03"]);
        assert_eq!(
            path.prefixes(),
            vec!["TermuxUploads", "TermuxUploads/2024", "TermuxUploads/2024/03"]
        );
        assert_eq!(
            path.join_file("IMG_0001.jpg"),
            "TermuxUploads/2024/03/IMG_0001.jpg"
        );
    }

    #[test]
    fn flat_path_keeps_only_root() {
        let path = RemoteFolderPath::for_file("Fotos/Movil", &photo("a.jpg"), false);
        assert_eq!(path.to_string(), "Fotos/Movil");
        assert_eq!(path.join_file("a.jpg"), "Fotos/Movil/a.jpg");

        let empty = RemoteFolderPath::for_file("", &photo("a.jpg"), false);
        assert!(empty.is_empty());
        assert_eq!(empty.join_file("a.jpg"), "a.jpg");
    }

    #[tokio::test]
    async fn creates_every_missing_level() {
        let dav = Arc::new(ScriptedDav::default());
        let resolver = FolderResolver::new(dav.clone());

        resolver
            .ensure(&RemoteFolderPath::new("TermuxUploads/2024/03"))
            .await
            .unwrap();

        assert_eq!(
            dav.calls(),
            vec![
                "PROPFIND TermuxUploads",
                "MKCOL TermuxUploads",
                "PROPFIND TermuxUploads/2024",
                "MKCOL TermuxUploads/2024",
                "PROPFIND TermuxUploads/2024/03",
                "MKCOL TermuxUploads/2024/03",
            ]
        );
    }

    #[tokio::test]
    async fn existing_tree_resolves_twice_without_creation() {
        let mut dav = ScriptedDav::default();
        dav.probe_status.insert("Uploads".into(), 207);
        dav.probe_status.insert("Uploads/2024".into(), 200);
        let dav = Arc::new(dav);
        let path = RemoteFolderPath::new("Uploads/2024");

        FolderResolver::new(dav.clone()).ensure(&path).await.unwrap();
        FolderResolver::new(dav.clone()).ensure(&path).await.unwrap();

        assert!(dav.calls().iter().all(|c| c.starts_with("PROPFIND")));
        assert_eq!(dav.calls().len(), 4);
    }

    #[tokio::test]
    async fn confirmed_prefixes_are_not_probed_again() {
        let dav = Arc::new(ScriptedDav::default());
        let resolver = FolderResolver::new(dav.clone());

        resolver.ensure(&RemoteFolderPath::new("A/2024/03")).await.unwrap();
        resolver.ensure(&RemoteFolderPath::new("A/2024/04")).await.unwrap();

        let calls = dav.calls();
        assert_eq!(calls.len(), 8);
        assert_eq!(calls[6], "PROPFIND A/2024/04");
    }

    #[tokio::test]
    async fn mkcol_405_counts_as_success() {
        let mut dav = ScriptedDav::default();
        dav.mkcol_status.insert("Shared".into(), 405);
        let dav = Arc::new(dav);

        FolderResolver::new(dav.clone())
            .ensure(&RemoteFolderPath::new("Shared"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mkcol_failure_stops_deeper_levels() {
        let mut dav = ScriptedDav::default();
        dav.mkcol_status.insert("A/2024".into(), 403);
        let dav = Arc::new(dav);

        let err = FolderResolver::new(dav.clone())
            .ensure(&RemoteFolderPath::new("A/2024/03"))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Protocol { ref path, .. } if path == "A/2024"));
        assert_eq!(dav.calls().last().unwrap(), "MKCOL A/2024");
    }

    #[tokio::test]
    async fn unexpected_probe_status_never_creates() {
        let mut dav = ScriptedDav::default();
        dav.probe_status.insert("A".into(), 401);
        let dav = Arc::new(dav);

        let err = FolderResolver::new(dav.clone())
            .ensure(&RemoteFolderPath::new("A/2024"))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Protocol { .. }));
        assert_eq!(dav.calls(), vec!["PROPFIND A"]);
    }

    #[tokio::test]
    async fn network_error_fails_the_chain() {
        let mut dav = ScriptedDav::default();
        dav.mkcol_status.insert("A".into(), 0);
        let dav = Arc::new(dav);

        let err = FolderResolver::new(dav)
            .ensure(&RemoteFolderPath::new("A"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn empty_path_makes_no_calls() {
        let dav = Arc::new(ScriptedDav::default());
        FolderResolver::new(dav.clone())
            .ensure(&RemoteFolderPath::default())
            .await
            .unwrap();
        assert!(dav.calls().is_empty());
    }
}
