use clap::Parser;
use mediasync_lib::config::{AppConfig, PolicyKind, CONFIG_FILE_NAME};
use mediasync_lib::core::RemoteFolderPath;
use mediasync_lib::logging::{LogConfig, SizeRotatingWriter};
use mediasync_lib::{app_dir, SyncEngine, SyncProgress, SyncReport, WebDavClient};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const EXIT_FAILED_FILES: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "mediasync")]
#[command(about = "Upload new camera files to a Nextcloud folder", long_about = None)]
struct Cli {
    /// Path to config.json (defaults to the app config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scan and filter only, print what would be uploaded
    #[arg(long)]
    dry_run: bool,

    /// Override the selection policy
    #[arg(long, value_enum)]
    policy: Option<PolicyKind>,

    /// Delete local files after a confirmed upload
    #[arg(long)]
    delete: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Write a default config file and exit
    #[arg(long)]
    init_config: bool,
}

/// 初始化日志系统：控制台始终输出，文件日志按配置开启
fn init_logging(log_dir: &Path, config: &LogConfig, verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.tracing_level()
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,reqwest=warn",
            level.as_str().to_lowercase()
        ))
    });

    let file_layer = if config.enabled {
        match SizeRotatingWriter::new(log_dir, config.max_size_bytes()) {
            Ok(writer) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            ),
            Err(e) => {
                eprintln!("无法创建日志文件 {:?}: {}", log_dir, e);
                None
            }
        }
    } else {
        None
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_file = cli
        .config
        .clone()
        .unwrap_or_else(|| app_dir().join(CONFIG_FILE_NAME));
    let data_dir = config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if cli.init_config {
        return init_config(&config_file);
    }

    let mut config = match AppConfig::load(&config_file) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("配置错误: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Some(policy) = cli.policy {
        config.policy = policy;
    }
    if cli.delete {
        config.delete_after_upload = true;
    }

    init_logging(&data_dir, &config.log, cli.verbose);
    debug!("配置文件: {:?}", config_file);

    let transport = match WebDavClient::new(&config.server, config.request_timeout()) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            error!("无法创建 WebDAV 客户端: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let engine = SyncEngine::new(config.to_sync_config(&data_dir), transport);

    if cli.dry_run {
        return dry_run(&engine).await;
    }

    // Ctrl+C 只停止派发新文件，进行中的上传继续完成
    let cancel_flag = engine.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，等待进行中的上传完成");
            cancel_flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    let (progress_tx, progress_rx) = mpsc::channel::<SyncProgress>(64);
    let progress_task = tokio::spawn(log_progress(progress_rx));

    let result = engine.run_sync(Some(progress_tx)).await;
    let _ = progress_task.await;

    match result {
        Ok(report) => {
            print_report(&report, cli.json);
            if report.failed > 0 {
                ExitCode::from(EXIT_FAILED_FILES)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn init_config(config_file: &Path) -> ExitCode {
    if config_file.exists() {
        eprintln!("配置文件已存在: {:?}", config_file);
        return ExitCode::from(EXIT_CONFIG);
    }
    match AppConfig::default().save(config_file) {
        Ok(()) => {
            println!("已生成配置文件: {}", config_file.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

async fn dry_run(engine: &SyncEngine) -> ExitCode {
    let config = engine.config();
    match engine.plan().await {
        Ok(candidates) => {
            for file in &candidates {
                let folder = RemoteFolderPath::for_file(
                    &config.target_folder,
                    file,
                    config.partition_by_date,
                );
                println!(
                    "{}  {:>10}  {}",
                    file.modified.format("%Y-%m-%d %H:%M"),
                    file.size,
                    folder.join_file(&file.name)
                );
            }
            info!("预览: {} 个文件待上传", candidates.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

async fn log_progress(mut rx: mpsc::Receiver<SyncProgress>) {
    while let Some(p) = rx.recv().await {
        debug!("{}", p.describe());
    }
}

fn print_report(report: &SyncReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(s) => println!("{}", s),
            Err(e) => error!("无法序列化报告: {}", e),
        }
        return;
    }

    println!(
        "扫描 {} / 候选 {} / 成功 {} / 失败 {} / 跳过 {} / 删除 {}",
        report.files_scanned,
        report.candidates,
        report.succeeded,
        report.failed,
        report.skipped,
        report.deleted
    );
    for e in &report.errors {
        println!("  {}", e);
    }
}
