//! 客户端配置和持久化
//!
//! 提供服务器地址、离线缓存清单、重连策略等设置的存储和读取。

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认服务器地址
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

/// 默认缓存名前缀
pub const DEFAULT_CACHE_PREFIX: &str = "tempshare";

/// 默认预缓存的静态资源
pub const DEFAULT_PRECACHE_ASSETS: &[&str] = &[
    "/",
    "/static/css/style.css",
    "/static/js/app.js",
    "https://fonts.googleapis.com/icon?family=Material+Icons",
    "https://fonts.googleapis.com/css2?family=Roboto:wght@300;400;500&display=swap",
    "https://cdnjs.cloudflare.com/ajax/libs/socket.io/4.0.1/socket.io.js",
];

/// 客户端设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// 会话服务器地址
    pub server_url: String,
    /// 缓存名前缀（实际名称附加资源清单摘要）
    pub cache_prefix: String,
    /// 显式指定缓存名（覆盖自动生成的名称）
    pub cache_name: Option<String>,
    /// 安装时预缓存的静态资源（相对路径或绝对 URL）
    pub precache_assets: Vec<String>,
    /// 是否启用离线缓存
    pub offline_cache: bool,
    /// HTTP 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 推送通道首次重连延迟（毫秒）
    pub reconnect_initial_ms: u64,
    /// 推送通道最大重连延迟（毫秒）
    pub reconnect_max_ms: u64,
    /// 下载目录
    pub download_dir: PathBuf,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            cache_name: None,
            precache_assets: DEFAULT_PRECACHE_ASSETS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            offline_cache: true,
            connect_timeout_secs: 10,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

impl ClientSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tempshare")
            .join("settings.toml")
    }

    /// 离线缓存存放目录
    pub fn cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tempshare")
    }

    /// 加载设置（如果文件不存在或无法解析则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// 从指定文件加载设置
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置到默认配置文件
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&Self::config_path())
    }

    /// 保存设置到指定文件
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_initial_ms))
    }
}
