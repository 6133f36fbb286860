//! Tempshare CLI
//!
//! 临时文件共享会话的命令行客户端

mod terminal;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tempshare_core::{
    ClientSettings, DiskCacheStorage, HttpSessionClient, OfflineCacheGuard, PushChannel,
    SyncController, UploadFile, is_valid_filename,
};
use terminal::TerminalView;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tempshare", version, about = "临时文件共享会话客户端")]
struct Cli {
    /// 会话服务器地址 (默认读取配置文件)
    #[arg(short, long, env = "TEMPSHARE_SERVER", global = true)]
    server: Option<String>,
    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 持续显示会话文件列表
    Watch,
    /// 列出会话文件
    List,
    /// 上传文件
    Upload {
        /// 要上传的文件路径
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// 删除会话中的文件
    Remove {
        /// 文件名
        #[arg(required = true)]
        filenames: Vec<String>,
    },
    /// 下载文件
    Download {
        /// 文件名
        filename: String,
        /// 保存目录 (默认: 配置中的下载目录)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 显示会话分享链接
    Link,
    /// 保存会话分享二维码
    Qr {
        /// 输出文件
        #[arg(short, long, default_value = "tempshare-qr.png")]
        output: PathBuf,
    },
    /// 查看或保存客户端设置
    Config {
        /// 把当前设置 (包括 --server) 写入配置文件
        #[arg(long)]
        save: bool,
    },
    /// 管理离线缓存
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// 下载并缓存全部静态资源
    Install,
    /// 删除旧版本缓存
    Activate,
    /// 查看缓存状态
    Status,
    /// 通过缓存策略请求一个路径
    Get {
        /// 相对服务器地址的路径
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = ClientSettings::load();
    if let Some(server) = cli.server {
        settings.server_url = server;
    }
    let client = HttpSessionClient::from_settings(&settings)
        .with_context(|| format!("无效的服务器地址: {}", settings.server_url))?;

    match cli.command {
        Commands::Watch => watch(client, &settings).await?,
        Commands::List => {
            println!("📂 会话文件 ({}):", client.base_url());
            let mut controller = SyncController::new(client, TerminalView::listing());
            controller.bootstrap().await;
            if controller.sink().shown() == 0 {
                println!("   (空)");
            }
        }
        Commands::Upload { files } => {
            let mut controller = SyncController::new(client, TerminalView::listing());
            let mut failed = 0;
            for path in files {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if !is_valid_filename(&name) {
                    eprintln!("❌ 文件名必须带有扩展名: {}", path.display());
                    failed += 1;
                    continue;
                }

                let file = UploadFile::from_path(&path)
                    .await
                    .with_context(|| format!("无法读取文件: {}", path.display()))?;
                println!("📤 上传: {} ({} bytes)", file.filename, file.bytes.len());
                if controller.request_upload(file).await.is_err() {
                    failed += 1;
                }
            }
            if failed > 0 {
                bail!("{} 个文件上传失败", failed);
            }
        }
        Commands::Remove { filenames } => {
            let mut controller = SyncController::new(client, TerminalView::listing());
            let mut failed = 0;
            for name in filenames {
                println!("🗑️  删除: {}", name);
                if controller.request_removal(&name).await.is_err() {
                    failed += 1;
                }
            }
            if failed > 0 {
                bail!("{} 个文件删除失败", failed);
            }
        }
        Commands::Download { filename, output } => {
            let dir = output.unwrap_or_else(|| settings.download_dir.clone());
            let path = client.download(&filename, &dir).await?;
            println!("📥 已保存: {}", path.display());
        }
        Commands::Link => {
            println!("🔗 {}", client.share_url().await?);
        }
        Commands::Qr { output } => {
            let png = client.qr_code().await?;
            tokio::fs::write(&output, &png)
                .await
                .with_context(|| format!("无法写入: {}", output.display()))?;
            println!("✅ 二维码已保存: {}", output.display());
        }
        Commands::Config { save } => {
            let path = ClientSettings::config_path();
            if save {
                settings
                    .save()
                    .with_context(|| format!("无法写入: {}", path.display()))?;
                println!("✅ 设置已保存: {}", path.display());
            }
            println!("配置文件: {}", path.display());
            println!("服务器: {}", settings.server_url);
            println!("下载目录: {}", settings.download_dir.display());
            println!(
                "离线缓存: {}",
                if settings.offline_cache { "开启" } else { "关闭" }
            );
        }
        Commands::Cache { command } => cache(&client, &settings, command).await?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    // 桥接 log crate（tempshare-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let default_filter = if verbose {
        "debug"
    } else {
        "warn,tempshare_core=info"
    };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();
}

fn open_guard(client: &HttpSessionClient, settings: &ClientSettings) -> Result<OfflineCacheGuard> {
    let storage = Arc::new(DiskCacheStorage::new(ClientSettings::cache_dir()));
    let guard = OfflineCacheGuard::from_settings(
        client.base_url(),
        settings,
        storage,
        Arc::new(client.network()),
    )?;
    Ok(guard)
}

async fn watch(client: HttpSessionClient, settings: &ClientSettings) -> Result<()> {
    let client = if settings.offline_cache {
        let guard = Arc::new(open_guard(&client, settings)?);
        if guard.prepare().await {
            tracing::info!("Offline cache ready: {}", guard.cache_name());
        }
        client.with_guard(guard)
    } else {
        client
    };

    let channel = PushChannel::new(client.base_url(), settings)?;
    println!("👀 监视会话: {} (Ctrl+C 退出)", client.base_url());

    // 先订阅再加载快照，加入通道后控制器会再次同步
    let mut controller = SyncController::new(client, TerminalView::watching());
    let signals = controller.subscribe(channel);
    controller.bootstrap().await;

    tokio::select! {
        _ = controller.run(signals) => {
            tracing::warn!("Push channel closed");
        }
        res = tokio::signal::ctrl_c() => {
            res?;
            println!("\n⏹️  停止监视");
        }
    }

    Ok(())
}

async fn cache(
    client: &HttpSessionClient,
    settings: &ClientSettings,
    command: CacheCommand,
) -> Result<()> {
    let guard = open_guard(client, settings)?;

    match command {
        CacheCommand::Install => {
            let count = guard.install().await?;
            println!("✅ 已缓存 {} 个资源: {}", count, guard.cache_name());
        }
        CacheCommand::Activate => {
            let removed = guard.activate().await?;
            if removed.is_empty() {
                println!("没有旧版本缓存");
            }
            for name in removed {
                println!("🗑️  已删除: {}", name);
            }
        }
        CacheCommand::Status => {
            println!("当前缓存: {}", guard.cache_name());
            println!("已缓存条目: {}", guard.cached_entries().await?);
            println!("资源清单:");
            for url in guard.manifest().urls() {
                println!("   {}", url);
            }
            println!("全部缓存:");
            for name in guard.generations().await? {
                let marker = if name == guard.cache_name() { "*" } else { " " };
                println!(" {} {}", marker, name);
            }
        }
        CacheCommand::Get { path } => {
            let url = client.base_url().join(&path)?;
            let route = if guard.should_bypass(&url) {
                "network"
            } else {
                "cache"
            };
            let response = guard.serve(&url).await?;
            println!(
                "{} {} via {} ({} bytes)",
                response.status,
                url,
                route,
                response.body.len()
            );
        }
    }

    Ok(())
}
