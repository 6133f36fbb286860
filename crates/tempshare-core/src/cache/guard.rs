//! 离线缓存策略
//!
//! 只缓存与会话无关的静态资源，会话相关的接口永远直达网络。
//!
//! # 判定规则
//!
//! 1. URL 的任一路径段命中会话接口（`files`、`upload`、`remove`、`download`、
//!    `get-qr`、`get-url`、`socket.io`）→ 旁路
//! 2. URL 不在预缓存清单中 → 旁路
//! 3. 其余请求先查缓存，未命中再走网络（网络结果不回写）
//!
//! 缓存名为 `<前缀>-<清单摘要>`，清单变化时自动产生新的一代，
//! [`OfflineCacheGuard::activate`] 删除其余所有代。

use log::{debug, info, warn};

use crate::cache::digest_hex;
use crate::cache::storage::{CacheError, CacheStorage};
use crate::config::ClientSettings;
use crate::transfer::{Fetcher, HttpResponse, SessionError};
use std::sync::Arc;
use url::Url;

/// 会话相关的路径段，命中即旁路
pub const SESSION_ENDPOINTS: &[&str] = &[
    "files",
    "upload",
    "remove",
    "download",
    "get-qr",
    "get-url",
    "socket.io",
];

/// 清单摘要在缓存名中保留的长度
const VERSION_LEN: usize = 12;

/// URL 是否指向会话接口
pub fn is_session_endpoint(url: &Url) -> bool {
    if matches!(url.scheme(), "ws" | "wss") {
        return true;
    }
    url.path_segments()
        .is_some_and(|mut segments| segments.any(|s| SESSION_ENDPOINTS.contains(&s)))
}

/// 预缓存资源清单
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    urls: Vec<Url>,
}

impl AssetManifest {
    /// 以服务器地址解析清单中的相对路径
    ///
    /// 会话接口不会进入清单。
    pub fn resolve<S: AsRef<str>>(base: &Url, assets: &[S]) -> Result<Self, url::ParseError> {
        let mut urls = Vec::with_capacity(assets.len());
        for asset in assets {
            let mut url = base.join(asset.as_ref())?;
            url.set_fragment(None);
            if is_session_endpoint(&url) {
                warn!("Refusing to precache session endpoint: {}", url);
                continue;
            }
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        Ok(Self { urls })
    }

    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    pub fn contains(&self, url: &Url) -> bool {
        let mut url = url.clone();
        url.set_fragment(None);
        self.urls.contains(&url)
    }

    /// 清单摘要，用作缓存版本号
    pub fn version(&self) -> String {
        let joined = self
            .urls
            .iter()
            .map(Url::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        let mut digest = digest_hex(joined.as_bytes());
        digest.truncate(VERSION_LEN);
        digest
    }
}

/// 离线缓存策略
pub struct OfflineCacheGuard {
    cache_name: String,
    manifest: AssetManifest,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Fetcher>,
}

impl OfflineCacheGuard {
    pub fn new(
        cache_name: impl Into<String>,
        manifest: AssetManifest,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            cache_name: cache_name.into(),
            manifest,
            storage,
            network,
        }
    }

    /// 按设置创建：解析清单，生成（或使用显式指定的）缓存名
    pub fn from_settings(
        base: &Url,
        settings: &ClientSettings,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Fetcher>,
    ) -> Result<Self, url::ParseError> {
        let manifest = AssetManifest::resolve(base, settings.precache_assets.as_slice())?;
        let cache_name = settings
            .cache_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", settings.cache_prefix, manifest.version()));
        Ok(Self::new(cache_name, manifest, storage, network))
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn manifest(&self) -> &AssetManifest {
        &self.manifest
    }

    /// 请求是否必须绕过缓存
    pub fn should_bypass(&self, url: &Url) -> bool {
        is_session_endpoint(url) || !self.manifest.contains(url)
    }

    /// 处理一个 GET 请求
    pub async fn serve(&self, url: &Url) -> Result<HttpResponse, SessionError> {
        if self.should_bypass(url) {
            debug!("Cache bypass: {}", url);
            return self.network.get(url).await;
        }

        match self.storage.match_url(&self.cache_name, url).await {
            Ok(Some(response)) => {
                debug!("Cache hit: {}", url);
                return Ok(response);
            }
            Ok(None) => debug!("Cache miss: {}", url),
            Err(e) => warn!("Cache lookup failed for {}: {}", url, e),
        }
        self.network.get(url).await
    }

    /// 下载清单中的全部资源并一次性写入当前缓存
    ///
    /// 任一资源失败则不写入任何内容。
    pub async fn install(&self) -> Result<usize, CacheError> {
        let fetches = self.manifest.urls().iter().map(|url| async move {
            let response = self.network.get(url).await.map_err(|e| CacheError::Install {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            if !response.is_success() {
                return Err(CacheError::Install {
                    url: url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }
            Ok::<_, CacheError>((url.clone(), response))
        });

        let entries = futures_util::future::try_join_all(fetches).await?;
        let count = entries.len();
        self.storage.put_all(&self.cache_name, entries).await?;

        info!("Cached {} assets in {}", count, self.cache_name);
        Ok(count)
    }

    /// 删除当前缓存以外的所有缓存，返回被删除的缓存名
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        let mut removed = Vec::new();
        for name in self.storage.keys().await? {
            if name != self.cache_name && self.storage.delete(&name).await? {
                debug!("Deleted stale cache {}", name);
                removed.push(name);
            }
        }
        Ok(removed)
    }

    /// 安装并激活；失败时只记录日志，退化为无离线支持
    pub async fn prepare(&self) -> bool {
        if let Err(e) = self.install().await {
            warn!("Offline cache unavailable: {}", e);
            return false;
        }
        match self.activate().await {
            Ok(removed) if !removed.is_empty() => {
                info!("Removed {} stale cache generation(s)", removed.len());
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to clean up old caches: {}", e),
        }
        true
    }

    /// 当前缓存中的条目数量
    pub async fn cached_entries(&self) -> Result<usize, CacheError> {
        self.storage.entry_count(&self.cache_name).await
    }

    /// 存储中所有缓存名
    pub async fn generations(&self) -> Result<Vec<String>, CacheError> {
        self.storage.keys().await
    }
}
