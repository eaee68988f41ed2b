use super::{LocalFileRef, LocalSource};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 本地媒体目录（例如手机相机目录）
pub struct LocalDirectory {
    root: PathBuf,
}

impl LocalDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl LocalSource for LocalDirectory {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn list_files(&self) -> io::Result<Vec<LocalFileRef>> {
        let root = self.root.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in WalkDir::new(&root)
                .min_depth(1)
                .max_depth(1)
                .follow_links(true)
            {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        debug!("跳过无法访问的条目: {}", e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        debug!("读取元数据失败 {:?}: {}", entry.path(), e);
                        continue;
                    }
                };
                match LocalFileRef::from_metadata(entry.path(), &metadata) {
                    Some(file) => files.push(file),
                    None => warn!("跳过文件名无法识别的文件: {:?}", entry.path()),
                }
            }
            files
        })
        .await
        .map_err(io::Error::other)
    }

    async fn delete(&self, file: &LocalFileRef) -> io::Result<()> {
        fs::remove_file(&file.path).await
    }
}
