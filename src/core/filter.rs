//! 候选文件筛选

use crate::core::ledger::Ledger;
use crate::storage::LocalFileRef;
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::time::Duration;

/// 默认的最近修改时间窗口（30 分钟）
pub const DEFAULT_RECENCY_WINDOW: Duration = Duration::from_secs(30 * 60);

/// 筛选策略
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FilterPolicy {
    /// 文件名不在上传记录中
    #[default]
    Dedup,
    /// 修改时间距今小于窗口（不含边界）
    RecencyWindow { window: Duration },
}

/// 候选文件筛选器
///
/// 只读取上传记录和传入的当前时间，不修改任何状态。
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    policy: FilterPolicy,
    extensions: HashSet<String>,
}

impl CandidateFilter {
    /// 扩展名可以带点也可以不带，大小写不敏感
    pub fn new(policy: FilterPolicy, extensions: &[String]) -> Self {
        let extensions = extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { policy, extensions }
    }

    pub fn policy(&self) -> &FilterPolicy {
        &self.policy
    }

    pub fn extension_allowed(&self, file: &LocalFileRef) -> bool {
        !file.extension.is_empty() && self.extensions.contains(&file.extension)
    }

    pub fn accepts(&self, file: &LocalFileRef, ledger: &Ledger, now: DateTime<Local>) -> bool {
        if !self.extension_allowed(file) {
            return false;
        }

        match &self.policy {
            FilterPolicy::Dedup => !ledger.contains(&file.name),
            FilterPolicy::RecencyWindow { window } => {
                // 修改时间在未来时按 0 计算
                let age = now
                    .signed_duration_since(file.modified)
                    .to_std()
                    .unwrap_or_default();
                age < *window
            }
        }
    }

    /// 筛选候选文件，按文件名排序
    pub fn select(
        &self,
        files: Vec<LocalFileRef>,
        ledger: &Ledger,
        now: DateTime<Local>,
    ) -> Vec<LocalFileRef> {
        let mut candidates: Vec<_> = files
            .into_iter()
            .filter(|f| self.accepts(f, ledger, now))
            .collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        candidates
    }
}
