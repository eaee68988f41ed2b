use crate::core::filter::{CandidateFilter, FilterPolicy};
use crate::core::folder::{FolderResolver, RemoteFolderPath};
use crate::core::ledger::Ledger;
use crate::core::uploader::{UploadOutcome, Uploader};
use crate::error::{Result, SyncError};
use crate::models::{RunPhase, RunStatus, SyncProgress};
use crate::storage::{DavTransport, LocalDirectory, LocalFileRef, LocalSource, ServerConfig};
use chrono::Local;
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

/// 默认上传的扩展名
pub const DEFAULT_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "mp4", "mov", "gif"];
/// 默认远程根目录
pub const DEFAULT_TARGET_FOLDER: &str = "TermuxUploads";
/// 默认本地目录（Android 相机目录）
pub const DEFAULT_LOCAL_DIR: &str = "/storage/emulated/0/DCIM/Camera";
/// 默认上传记录文件名
pub const LEDGER_FILE_NAME: &str = "uploaded_files.txt";

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub server: ServerConfig,
    /// 远程根目录，可以包含多级
    pub target_folder: String,
    pub local_dir: PathBuf,
    /// 允许上传的扩展名（大小写不敏感，可带点）
    pub extensions: Vec<String>,
    /// 上传成功后删除本地文件
    pub delete_after_upload: bool,
    pub policy: FilterPolicy,
    /// 是否按 年/月 建立远程子目录
    pub partition_by_date: bool,
    pub ledger_path: PathBuf,
    /// 最大并发上传数，1 表示顺序上传
    pub max_concurrent_uploads: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            target_folder: DEFAULT_TARGET_FOLDER.to_string(),
            local_dir: PathBuf::from(DEFAULT_LOCAL_DIR),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            delete_after_upload: false,
            policy: FilterPolicy::Dedup,
            partition_by_date: true,
            ledger_path: PathBuf::from(LEDGER_FILE_NAME),
            max_concurrent_uploads: 1,
        }
    }
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub status: RunStatus,
    pub files_scanned: u32,
    pub candidates: u32,
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub deleted: u32,
    pub bytes_transferred: u64,
    pub duration: u64,
    pub errors: Vec<String>,
}

/// 传输统计
#[derive(Debug, Default)]
struct TransferStats {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    deleted: AtomicU64,
    bytes_transferred: AtomicU64,
}

impl TransferStats {
    fn get(counter: &AtomicU64) -> u32 {
        counter.load(Ordering::Relaxed) as u32
    }
}

/// 单个候选文件的处理结果
enum CandidateResult {
    Succeeded {
        bytes: u64,
        deleted: bool,
        /// 删除本地文件失败，不影响成功计数
        warning: Option<SyncError>,
    },
    Failed(SyncError),
    Skipped,
}

/// 一次运行内所有上传任务共享的状态
struct RunContext {
    resolver: FolderResolver,
    uploader: Uploader,
    ledger: Mutex<Ledger>,
    source: Arc<dyn LocalSource>,
    target_folder: String,
    partition_by_date: bool,
    delete_after_upload: bool,
}

impl RunContext {
    /// 目录 → 上传 → 记录 → 删除
    async fn process(&self, file: &LocalFileRef) -> CandidateResult {
        let folder = RemoteFolderPath::for_file(&self.target_folder, file, self.partition_by_date);

        if let Err(e) = self.resolver.ensure(&folder).await {
            error!("无法创建远程目录，跳过 {}: {}", file.name, e);
            return CandidateResult::Failed(e);
        }

        let outcome = self.uploader.upload(file, &folder).await;
        match &outcome {
            UploadOutcome::Created | UploadOutcome::Overwritten => {
                info!("上传成功 ({}): {}", outcome, folder.join_file(&file.name));
            }
            UploadOutcome::Skipped(reason) => {
                warn!("跳过 {}: {}", file.name, reason);
                return CandidateResult::Skipped;
            }
            UploadOutcome::Failed(reason) => {
                error!("上传失败 {}: {}", file.name, reason);
                return CandidateResult::Failed(SyncError::Transfer {
                    file: file.name.clone(),
                    reason: reason.clone(),
                });
            }
        }

        let recorded = {
            let mut ledger = self.ledger.lock().await;
            ledger.record(&file.name).await
        };
        if let Err(source) = recorded {
            let e = SyncError::Ledger {
                file: file.name.clone(),
                source,
            };
            error!("{}，保留本地文件", e);
            return CandidateResult::Failed(e);
        }

        let mut deleted = false;
        let mut warning = None;
        if self.delete_after_upload {
            match self.source.delete(file).await {
                Ok(()) => {
                    info!("已删除本地文件: {}", file.name);
                    deleted = true;
                }
                Err(source) => {
                    let e = SyncError::LocalIo {
                        file: file.name.clone(),
                        source,
                    };
                    error!("严重: {}（远程副本已记录，不会重复上传）", e);
                    warning = Some(e);
                }
            }
        }

        CandidateResult::Succeeded {
            bytes: file.size,
            deleted,
            warning,
        }
    }
}

/// 扫描和筛选的结果
struct Prepared {
    ledger: Ledger,
    files_scanned: u32,
    candidates: Vec<LocalFileRef>,
}

/// 同步引擎
pub struct SyncEngine {
    config: SyncConfig,
    transport: Arc<dyn DavTransport>,
    source: Arc<dyn LocalSource>,
    cancelled: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, transport: Arc<dyn DavTransport>) -> Self {
        let source = Arc::new(LocalDirectory::new(config.local_dir.clone()));
        Self::with_source(config, transport, source)
    }

    pub fn with_source(
        config: SyncConfig,
        transport: Arc<dyn DavTransport>,
        source: Arc<dyn LocalSource>,
    ) -> Self {
        Self {
            config,
            transport,
            source,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 取消同步，尚未开始的文件计为跳过
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 获取取消标志，可在信号处理任务中使用
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 只扫描和筛选，不访问网络
    pub async fn plan(&self) -> Result<Vec<LocalFileRef>> {
        let run_id = uuid::Uuid::new_v4().to_string();
        Ok(self.prepare(&run_id, &None).await?.candidates)
    }

    /// 运行一次上传任务
    ///
    /// 只有配置错误会返回 `Err`，单个文件的失败记录在报告中。
    pub async fn run_sync(
        &self,
        progress_tx: Option<mpsc::Sender<SyncProgress>>,
    ) -> Result<SyncReport> {
        let start_time = chrono::Utc::now().timestamp();
        let run_id = uuid::Uuid::new_v4().to_string();

        info!(
            "开始上传任务 {}: {:?} -> {}",
            run_id,
            self.source.root(),
            self.transport.name()
        );

        let prepared = match self.prepare(&run_id, &progress_tx).await {
            Ok(p) => p,
            Err(e) => {
                error!("{}", e);
                return Err(e);
            }
        };

        if self.config.delete_after_upload {
            warn!("删除模式已开启，上传成功的本地文件将被删除");
        } else {
            info!("安全模式，不删除本地文件");
        }

        let candidates = prepared.candidates.len() as u32;
        if candidates == 0 {
            info!("没有新文件需要上传");
        } else {
            info!(
                "发现 {} 个待上传文件（共扫描 {} 个）",
                candidates, prepared.files_scanned
            );
        }

        let (stats, errors) = self
            .execute(&run_id, prepared.ledger, prepared.candidates, &progress_tx)
            .await;

        send_progress(
            &progress_tx,
            snapshot(&run_id, RunPhase::Summarizing, candidates, &stats),
        )
        .await;

        let end_time = chrono::Utc::now().timestamp();
        let failed = TransferStats::get(&stats.failed);
        let status = if failed > 0 {
            RunStatus::Failed
        } else if self.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };

        let report = SyncReport {
            run_id: run_id.clone(),
            start_time,
            end_time,
            status,
            files_scanned: prepared.files_scanned,
            candidates,
            attempted: TransferStats::get(&stats.attempted),
            succeeded: TransferStats::get(&stats.succeeded),
            failed,
            skipped: TransferStats::get(&stats.skipped),
            deleted: TransferStats::get(&stats.deleted),
            bytes_transferred: stats.bytes_transferred.load(Ordering::Relaxed),
            duration: (end_time - start_time).max(0) as u64,
            errors,
        };

        info!(
            "上传任务完成: {}/{} 成功, {} 失败, {} 跳过, {} 删除",
            report.succeeded, report.attempted, report.failed, report.skipped, report.deleted
        );

        send_progress(
            &progress_tx,
            snapshot(&run_id, RunPhase::Done, candidates, &stats),
        )
        .await;

        Ok(report)
    }

    /// 运行前检查：本地目录存在，连接参数完整
    async fn check_preconditions(&self) -> Result<()> {
        if let Some(field) = self.config.server.missing_field() {
            return Err(SyncError::Configuration(format!(
                "服务器配置缺少 {}",
                field
            )));
        }

        let root = self.source.root();
        match tokio::fs::metadata(root).await {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(SyncError::Configuration(format!(
                "本地路径不是文件夹: {:?}",
                root
            ))),
            Err(e) => Err(SyncError::Configuration(format!(
                "本地文件夹不存在: {:?} ({})",
                root, e
            ))),
        }
    }

    async fn prepare(
        &self,
        run_id: &str,
        progress_tx: &Option<mpsc::Sender<SyncProgress>>,
    ) -> Result<Prepared> {
        self.check_preconditions().await?;

        let ledger = Ledger::load(&self.config.ledger_path).await.map_err(|e| {
            SyncError::Configuration(format!(
                "无法读取上传记录 {:?}: {}",
                self.config.ledger_path, e
            ))
        })?;
        info!("上传记录中已有 {} 个文件", ledger.len());

        send_progress(progress_tx, phase_only(run_id, RunPhase::Scanning)).await;
        let files = self.source.list_files().await.map_err(|e| {
            SyncError::Configuration(format!(
                "无法扫描本地文件夹 {:?}: {}",
                self.source.root(),
                e
            ))
        })?;
        let files_scanned = files.len() as u32;
        debug!("扫描到 {} 个文件", files_scanned);

        send_progress(progress_tx, phase_only(run_id, RunPhase::Filtering)).await;
        let filter = CandidateFilter::new(self.config.policy.clone(), &self.config.extensions);
        let candidates = filter.select(files, &ledger, Local::now());
        debug!("筛选策略 {:?}: {} 个候选", filter.policy(), candidates.len());

        Ok(Prepared {
            ledger,
            files_scanned,
            candidates,
        })
    }

    /// 执行上传，并发数由信号量限制
    async fn execute(
        &self,
        run_id: &str,
        ledger: Ledger,
        candidates: Vec<LocalFileRef>,
        progress_tx: &Option<mpsc::Sender<SyncProgress>>,
    ) -> (Arc<TransferStats>, Vec<String>) {
        let ctx = Arc::new(RunContext {
            resolver: FolderResolver::new(self.transport.clone()),
            uploader: Uploader::new(self.transport.clone()),
            ledger: Mutex::new(ledger),
            source: self.source.clone(),
            target_folder: self.config.target_folder.clone(),
            partition_by_date: self.config.partition_by_date,
            delete_after_upload: self.config.delete_after_upload,
        });
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_uploads.max(1)));
        let stats = Arc::new(TransferStats::default());
        let errors = Arc::new(RwLock::new(Vec::<String>::new()));
        let total = candidates.len() as u32;

        let mut handles = Vec::new();

        for file in candidates {
            if self.is_cancelled() {
                stats.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            // 等待期间可能已被取消
            if self.is_cancelled() {
                stats.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let ctx = ctx.clone();
            let stats = stats.clone();
            let errors = errors.clone();
            let progress_tx = progress_tx.clone();
            let run_id = run_id.to_string();

            stats.attempted.fetch_add(1, Ordering::Relaxed);
            send_progress(&progress_tx, {
                let mut p = snapshot(&run_id, RunPhase::Uploading, total, &stats);
                p.current_file = file.name.clone();
                p
            })
            .await;

            let handle = tokio::spawn(async move {
                match ctx.process(&file).await {
                    CandidateResult::Succeeded {
                        bytes,
                        deleted,
                        warning,
                    } => {
                        stats.succeeded.fetch_add(1, Ordering::Relaxed);
                        stats.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
                        if deleted {
                            stats.deleted.fetch_add(1, Ordering::Relaxed);
                        }
                        if let Some(e) = warning {
                            errors.write().await.push(e.to_string());
                        }
                    }
                    CandidateResult::Failed(e) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        errors.write().await.push(e.to_string());
                    }
                    CandidateResult::Skipped => {
                        stats.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                }

                send_progress(
                    &progress_tx,
                    snapshot(&run_id, RunPhase::Uploading, total, &stats),
                )
                .await;

                drop(permit);
            });

            handles.push(handle);
        }

        // 等待所有任务完成
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("上传任务异常退出: {}", e);
                stats.failed.fetch_add(1, Ordering::Relaxed);
                errors.write().await.push(format!("上传任务异常退出: {}", e));
            }
        }

        let error_list = errors.read().await.clone();
        (stats, error_list)
    }
}

fn phase_only(run_id: &str, phase: RunPhase) -> SyncProgress {
    SyncProgress {
        run_id: run_id.to_string(),
        phase,
        current_file: String::new(),
        files_to_sync: 0,
        files_completed: 0,
        files_failed: 0,
        bytes_transferred: 0,
    }
}

fn snapshot(run_id: &str, phase: RunPhase, total: u32, stats: &TransferStats) -> SyncProgress {
    let failed = TransferStats::get(&stats.failed);
    SyncProgress {
        run_id: run_id.to_string(),
        phase,
        current_file: String::new(),
        files_to_sync: total,
        files_completed: TransferStats::get(&stats.succeeded)
            + TransferStats::get(&stats.skipped)
            + failed,
        files_failed: failed,
        bytes_transferred: stats.bytes_transferred.load(Ordering::Relaxed),
    }
}

/// 发送进度更新，接收端关闭时忽略
async fn send_progress(tx: &Option<mpsc::Sender<SyncProgress>>, progress: SyncProgress) {
    if let Some(tx) = tx {
        let _ = tx.send(progress).await;
    }
}
