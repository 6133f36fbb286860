//! 缓存存储
//!
//! 以缓存名分组的 URL → 响应存储。同一时间可以存在多个缓存（代），
//! 由 [`OfflineCacheGuard::activate`](super::OfflineCacheGuard::activate) 清理旧代。
//!
//! - [`MemoryCacheStorage`]: 进程内存储，用于测试和临时会话
//! - [`DiskCacheStorage`]: 落盘存储，每个缓存一个目录，`index.json` 记录元数据

use log::debug;

use crate::cache::digest_hex;
use crate::transfer::HttpResponse;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use url::Url;

/// 缓存错误
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Failed to cache {url}: {reason}")]
    Install { url: String, reason: String },

    #[error("Invalid cache name: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid cache index: {0}")]
    Index(#[from] serde_json::Error),
}

/// 缓存存储接口
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// 所有缓存名（已排序）
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// 原子地写入一组条目，替换同名缓存的全部内容
    async fn put_all(
        &self,
        cache: &str,
        entries: Vec<(Url, HttpResponse)>,
    ) -> Result<(), CacheError>;

    /// 查找缓存条目
    async fn match_url(&self, cache: &str, url: &Url) -> Result<Option<HttpResponse>, CacheError>;

    /// 删除缓存，返回缓存是否存在
    async fn delete(&self, cache: &str) -> Result<bool, CacheError>;

    /// 缓存中的条目数量
    async fn entry_count(&self, cache: &str) -> Result<usize, CacheError>;
}

/// 缓存条目键：去掉 fragment 的完整 URL
pub(crate) fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// 进程内存储
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: Mutex<HashMap<String, HashMap<String, HttpResponse>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<String, HttpResponse>>> {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn put_all(
        &self,
        cache: &str,
        entries: Vec<(Url, HttpResponse)>,
    ) -> Result<(), CacheError> {
        let generation = entries
            .into_iter()
            .map(|(url, response)| (cache_key(&url), response))
            .collect();
        self.lock().insert(cache.to_string(), generation);
        Ok(())
    }

    async fn match_url(&self, cache: &str, url: &Url) -> Result<Option<HttpResponse>, CacheError> {
        Ok(self
            .lock()
            .get(cache)
            .and_then(|entries| entries.get(&cache_key(url)))
            .cloned())
    }

    async fn delete(&self, cache: &str) -> Result<bool, CacheError> {
        Ok(self.lock().remove(cache).is_some())
    }

    async fn entry_count(&self, cache: &str) -> Result<usize, CacheError> {
        Ok(self.lock().get(cache).map_or(0, HashMap::len))
    }
}

/// `index.json` 中的一条记录
#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    file: String,
    #[serde(flatten)]
    response: HttpResponse,
}

const INDEX_FILE: &str = "index.json";

/// 落盘存储
///
/// 目录结构: `<root>/<cache>/index.json` + `<root>/<cache>/<sha256(url)>.bin`。
/// 写入先落到 `<root>/.<cache>.partial`，完成后整体改名。
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn cache_dir(&self, cache: &str) -> Result<PathBuf, CacheError> {
        if cache.is_empty() || cache.starts_with('.') || cache.contains(['/', '\\']) {
            return Err(CacheError::InvalidName(cache.to_string()));
        }
        Ok(self.root.join(cache))
    }

    async fn read_index(
        &self,
        cache: &str,
    ) -> Result<Option<BTreeMap<String, IndexEntry>>, CacheError> {
        let path = self.cache_dir(cache)?.join(INDEX_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn put_all(
        &self,
        cache: &str,
        entries: Vec<(Url, HttpResponse)>,
    ) -> Result<(), CacheError> {
        let target = self.cache_dir(cache)?;
        let staging = self.root.join(format!(".{}.partial", cache));

        if tokio::fs::try_exists(&staging).await? {
            tokio::fs::remove_dir_all(&staging).await?;
        }
        tokio::fs::create_dir_all(&staging).await?;

        let mut index = BTreeMap::new();
        for (url, response) in entries {
            let key = cache_key(&url);
            let file = format!("{}.bin", digest_hex(key.as_bytes()));
            tokio::fs::write(staging.join(&file), &response.body).await?;
            index.insert(key, IndexEntry { file, response });
        }
        tokio::fs::write(staging.join(INDEX_FILE), serde_json::to_vec_pretty(&index)?).await?;

        if tokio::fs::try_exists(&target).await? {
            tokio::fs::remove_dir_all(&target).await?;
        }
        tokio::fs::rename(&staging, &target).await?;

        debug!("Stored {} entries in cache {:?}", index.len(), target);
        Ok(())
    }

    async fn match_url(&self, cache: &str, url: &Url) -> Result<Option<HttpResponse>, CacheError> {
        let Some(mut index) = self.read_index(cache).await? else {
            return Ok(None);
        };
        let Some(entry) = index.remove(&cache_key(url)) else {
            return Ok(None);
        };

        let body = tokio::fs::read(self.cache_dir(cache)?.join(&entry.file)).await?;
        let mut response = entry.response;
        response.body = body;
        Ok(Some(response))
    }

    async fn delete(&self, cache: &str) -> Result<bool, CacheError> {
        let dir = self.cache_dir(cache)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn entry_count(&self, cache: &str) -> Result<usize, CacheError> {
        Ok(self.read_index(cache).await?.map_or(0, |index| index.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> HttpResponse {
        HttpResponse::new(200, Some("text/css".into()), body.as_bytes().to_vec())
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryCacheStorage::new();
        storage
            .put_all("v1", vec![(url("http://h/static/a.css"), response("a"))])
            .await
            .unwrap();

        let hit = storage
            .match_url("v1", &url("http://h/static/a.css#top"))
            .await
            .unwrap();
        assert_eq!(hit, Some(response("a")));
        assert_eq!(storage.match_url("v2", &url("http://h/static/a.css")).await.unwrap(), None);

        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disk_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path());

        storage
            .put_all(
                "tempshare-v1",
                vec![
                    (url("http://h/static/a.css"), response("a")),
                    (url("http://h/static/b.js"), response("b")),
                ],
            )
            .await
            .unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["tempshare-v1"]);
        assert_eq!(storage.entry_count("tempshare-v1").await.unwrap(), 2);

        let hit = storage
            .match_url("tempshare-v1", &url("http://h/static/b.js"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.body, b"b");
        assert_eq!(hit.content_type.as_deref(), Some("text/css"));
        assert!(
            storage
                .match_url("tempshare-v1", &url("http://h/files"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_disk_storage_replaces_generation() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path());

        storage
            .put_all("v1", vec![(url("http://h/a.css"), response("old"))])
            .await
            .unwrap();
        storage
            .put_all("v1", vec![(url("http://h/b.css"), response("new"))])
            .await
            .unwrap();

        assert!(storage.match_url("v1", &url("http://h/a.css")).await.unwrap().is_none());
        assert_eq!(storage.entry_count("v1").await.unwrap(), 1);
        // 暂存目录不会出现在缓存列表中
        assert_eq!(storage.keys().await.unwrap(), vec!["v1"]);
    }

    #[tokio::test]
    async fn test_disk_storage_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path().join("absent"));
        assert!(storage.keys().await.unwrap().is_empty());
        assert!(!storage.delete("v1").await.unwrap());
        assert_eq!(storage.entry_count("v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disk_storage_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        let err = storage.delete("../etc").await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidName(_)));
    }
}
