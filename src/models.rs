use serde::{Deserialize, Serialize};

/// 运行阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Scanning,
    Filtering,
    Uploading,
    Summarizing,
    Done,
}

/// 运行结果状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// 同步进度
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub run_id: String,
    pub phase: RunPhase,
    pub current_file: String,
    pub files_to_sync: u32,
    pub files_completed: u32,
    pub files_failed: u32,
    pub bytes_transferred: u64,
}

impl SyncProgress {
    /// 进度日志文本，`files_completed` 已经包含失败的文件
    pub fn describe(&self) -> String {
        if self.current_file.is_empty() {
            format!("阶段: {:?}", self.phase)
        } else {
            format!(
                "[{}/{}] {} ({} bytes)",
                self.files_completed, self.files_to_sync, self.current_file, self.bytes_transferred
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_does_not_count_failures_twice() {
        let progress = SyncProgress {
            run_id: "r".into(),
            phase: RunPhase::Uploading,
            current_file: "IMG_0003.jpg".into(),
            files_to_sync: 3,
            files_completed: 2,
            files_failed: 1,
            bytes_transferred: 2048,
        };
        assert_eq!(progress.describe(), "[2/3] IMG_0003.jpg (2048 bytes)");
    }

    #[test]
    fn describe_phase_only() {
        let progress = SyncProgress {
            run_id: "r".into(),
            phase: RunPhase::Scanning,
            current_file: String::new(),
            files_to_sync: 0,
            files_completed: 0,
            files_failed: 0,
            bytes_transferred: 0,
        };
        assert_eq!(progress.describe(), "阶段: Scanning");
    }
}
