use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Tempshare 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 构建命令行客户端 (release)
    Build,
    /// 以调试日志监视一个会话
    Watch {
        /// 会话服务器地址
        #[arg(short, long, default_value = "http://127.0.0.1:5000")]
        server: String,
        /// 日志级别 (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "debug")]
        log_level: String,
    },
    /// 运行 clippy 和格式检查
    Lint,
    /// 运行测试
    Test,
    /// 运行测试并生成覆盖率报告
    Coverage,
    /// 安装到 ~/.cargo/bin
    Install,
    /// 打包发布 (tar.gz)
    Dist,
    /// 清理构建产物
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(project_root()?);

    match cli.command {
        Commands::Build => build(&sh)?,
        Commands::Watch { server, log_level } => watch(&sh, &server, &log_level)?,
        Commands::Lint => lint(&sh)?,
        Commands::Test => test(&sh)?,
        Commands::Coverage => coverage(&sh)?,
        Commands::Install => install(&sh)?,
        Commands::Dist => dist(&sh)?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

/// 工作区根目录（xtask 的上一级）
fn project_root() -> Result<PathBuf> {
    if let Some(root) = std::env::var_os("CARGO_MANIFEST_DIR")
        .map(PathBuf::from)
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    {
        return Ok(root);
    }
    std::env::current_dir().context("无法确定项目根目录")
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 构建 tempshare...");
    cmd!(sh, "cargo build --release -p tempshare-cli").run()?;
    println!("✅ 构建完成: target/release/tempshare");
    Ok(())
}

fn watch(sh: &Shell, server: &str, log_level: &str) -> Result<()> {
    println!("👀 监视会话: {}", server);
    println!("   日志级别: {}", log_level);

    let rust_log = format!("{level},tempshare_core={level}", level = log_level);
    let _env = sh.push_env("RUST_LOG", rust_log);
    cmd!(sh, "cargo run -p tempshare-cli -- --server {server} watch").run()?;
    Ok(())
}

fn lint(sh: &Shell) -> Result<()> {
    println!("🔍 格式检查...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;

    println!("🔍 Clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;

    println!("✅ 检查通过");
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("🧪 运行测试...");
    cmd!(sh, "cargo test --workspace").run()?;
    println!("✅ 测试完成");
    Ok(())
}

fn coverage(sh: &Shell) -> Result<()> {
    println!("📊 运行测试覆盖率分析...");

    if cmd!(sh, "cargo tarpaulin --version").quiet().run().is_err() {
        println!("📦 安装 cargo-tarpaulin...");
        cmd!(sh, "cargo install cargo-tarpaulin").run()?;
    }

    cmd!(
        sh,
        "cargo tarpaulin --packages tempshare-core --out Html --output-dir target/coverage"
    )
    .run()?;

    println!("✅ 覆盖率报告: target/coverage/tarpaulin-report.html");
    Ok(())
}

fn install(sh: &Shell) -> Result<()> {
    println!("📦 安装 tempshare...");
    cmd!(sh, "cargo install --path crates/tempshare-cli --locked").run()?;
    println!("✅ 安装完成，使用 'tempshare --help' 查看命令");
    Ok(())
}

fn dist(sh: &Shell) -> Result<()> {
    println!("📦 打包发布...");
    build(sh)?;

    let version = env!("CARGO_PKG_VERSION");
    let dist_name = format!("tempshare-{}-{}", version, std::env::consts::ARCH);
    let staging = format!("dist/{}", dist_name);

    sh.create_dir(&staging)?;
    sh.copy_file("target/release/tempshare", &staging)?;
    if sh.path_exists("README.md") {
        sh.copy_file("README.md", &staging)?;
    }

    {
        let _dir = sh.push_dir("dist");
        cmd!(sh, "tar -czf {dist_name}.tar.gz {dist_name}").run()?;
    }

    println!("✅ 打包完成: dist/{}.tar.gz", dist_name);
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;
    sh.remove_path("dist")?;
    println!("✅ 清理完成");
    Ok(())
}
