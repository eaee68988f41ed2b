use std::path::PathBuf;

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod models;
pub mod storage;

pub use config::AppConfig;
pub use core::{SyncConfig, SyncEngine, SyncReport};
pub use error::{SyncError, TransportError};
pub use models::{RunPhase, RunStatus, SyncProgress};
pub use storage::{DavTransport, LocalDirectory, LocalSource, WebDavClient};

/// 应用目录：配置文件、上传记录和日志都放在这里
pub fn app_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("mediasync"))
        .unwrap_or_else(|| PathBuf::from(".mediasync"))
}
