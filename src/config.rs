//! 应用配置模块
//!
//! 读取顺序：`config.json` → 同目录的 `config.env` → 环境变量（优先级最高）。

use crate::core::engine::{
    SyncConfig, DEFAULT_EXTENSIONS, DEFAULT_LOCAL_DIR, DEFAULT_TARGET_FOLDER, LEDGER_FILE_NAME,
};
use crate::core::FilterPolicy;
use crate::logging::LogConfig;
use crate::storage::{ServerConfig, IO_TIMEOUT_SECS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// 配置文件名
pub const CONFIG_FILE_NAME: &str = "config.json";
/// dotenv 文件名
pub const ENV_FILE_NAME: &str = "config.env";

/// 筛选策略类型
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Dedup,
    Recency,
}

/// 配置文件内容
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_target_folder")]
    pub target_folder: String,
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub delete_after_upload: bool,
    #[serde(default)]
    pub policy: PolicyKind,
    /// 最近修改窗口（分钟），仅 recency 策略使用
    #[serde(default = "default_recency_window_minutes")]
    pub recency_window_minutes: u64,
    #[serde(default = "default_partition_by_date")]
    pub partition_by_date: bool,
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 不设置时放在数据目录下
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_path: Option<PathBuf>,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_target_folder() -> String {
    DEFAULT_TARGET_FOLDER.to_string()
}

fn default_local_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOCAL_DIR)
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn default_recency_window_minutes() -> u64 {
    30
}

fn default_partition_by_date() -> bool {
    true
}

fn default_max_concurrent_uploads() -> usize {
    1
}

fn default_request_timeout_secs() -> u64 {
    IO_TIMEOUT_SECS
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            target_folder: default_target_folder(),
            local_dir: default_local_dir(),
            extensions: default_extensions(),
            delete_after_upload: false,
            policy: PolicyKind::default(),
            recency_window_minutes: default_recency_window_minutes(),
            partition_by_date: default_partition_by_date(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            request_timeout_secs: default_request_timeout_secs(),
            ledger_path: None,
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件加载，再应用 dotenv 文件和环境变量
    pub fn load(config_file: &Path) -> Result<Self> {
        let mut config = Self::from_file(config_file)?;

        let env_file = config_file.with_file_name(ENV_FILE_NAME);
        if env_file.exists() {
            dotenv::from_path(&env_file)
                .with_context(|| format!("无法读取 {:?}", env_file))?;
            debug!("已加载环境文件: {:?}", env_file);
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// 只读取 JSON 配置文件，文件不存在时使用默认值
    pub fn from_file(config_file: &Path) -> Result<Self> {
        if !config_file.exists() {
            debug!("配置文件不存在，使用默认配置: {:?}", config_file);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_file)
            .with_context(|| format!("无法读取配置文件 {:?}", config_file))?;
        serde_json::from_str(&content)
            .with_context(|| format!("配置文件格式错误 {:?}", config_file))
    }

    /// 用环境变量覆盖配置，空值忽略
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("NEXTCLOUD_URL") {
            self.server.url = v;
        }
        if let Some(v) = get("NEXTCLOUD_USER") {
            self.server.username = v;
        }
        if let Some(v) = get("NEXTCLOUD_PASS") {
            self.server.password = v;
        }
        if let Some(v) = get("NEXTCLOUD_TARGET_FOLDER") {
            self.target_folder = v;
        }
        if let Some(v) = get("LOCAL_DIR") {
            self.local_dir = PathBuf::from(v);
        }
        // 兼容旧版 config.env 里的 EXTENSIONES_VALIDAS
        if let Some(v) = get("EXTENSIONES_VALIDAS").or_else(|| get("VALID_EXTENSIONS")) {
            self.extensions = v
                .split(',')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
        }
        if let Some(v) = get("DELETE_AFTER_UPLOAD") {
            self.delete_after_upload = parse_flag(&v);
        }
    }

    /// 保存配置
    pub fn save(&self, config_file: &Path) -> Result<()> {
        if let Some(parent) = config_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(config_file, content)
            .with_context(|| format!("无法写入配置文件 {:?}", config_file))
    }

    pub fn filter_policy(&self) -> FilterPolicy {
        match self.policy {
            PolicyKind::Dedup => FilterPolicy::Dedup,
            PolicyKind::Recency => FilterPolicy::RecencyWindow {
                window: Duration::from_secs(self.recency_window_minutes * 60),
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// 转换为同步引擎使用的配置
    pub fn to_sync_config(&self, data_dir: &Path) -> SyncConfig {
        SyncConfig {
            server: self.server.clone(),
            target_folder: self.target_folder.clone(),
            local_dir: self.local_dir.clone(),
            extensions: self.extensions.clone(),
            delete_after_upload: self.delete_after_upload,
            policy: self.filter_policy(),
            partition_by_date: self.partition_by_date,
            ledger_path: self
                .ledger_path
                .clone()
                .unwrap_or_else(|| data_dir.join(LEDGER_FILE_NAME)),
            max_concurrent_uploads: self.max_concurrent_uploads.max(1),
        }
    }
}

/// `true` / `1` / `t`（大小写不敏感）为真
pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "t")
}
