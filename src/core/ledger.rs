//! 上传记录 - 已确认上传的文件名，每行一个
//!
//! 只追加不删除。文件名是唯一标识，不同目录下的同名文件会被视为同一个。

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// 已上传文件记录
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: HashSet<String>,
}

impl Ledger {
    /// 读取全部记录，文件不存在时视为空记录
    pub async fn load(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path).await {
            // 只去掉行尾的 \r，文件名首尾的空格是名字的一部分
            Ok(content) => content
                .lines()
                .map(|l| l.trim_end_matches('\r'))
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("上传记录不存在，使用空记录: {:?}", path);
                HashSet::new()
            }
            Err(e) => return Err(e),
        };

        Ok(Self { path, entries })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains(name)
    }

    /// 追加一条记录并落盘，返回是否是新记录
    ///
    /// 返回前已 fsync，上传成功后即使进程崩溃记录也不会丢失。
    pub async fn record(&mut self, name: &str) -> io::Result<bool> {
        if name.trim().is_empty() || name.contains(['\n', '\r']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("无效的文件名: {:?}", name),
            ));
        }
        if self.entries.contains(name) {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\n", name).as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;

        self.entries.insert(name.to_string());
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
