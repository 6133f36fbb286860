//! 离线缓存模块
//!
//! 包含:
//! - 缓存策略（旁路判定、安装、激活）
//! - 内存和磁盘两种缓存存储

pub mod guard;
pub mod storage;

pub use guard::{AssetManifest, OfflineCacheGuard, SESSION_ENDPOINTS, is_session_endpoint};
pub use storage::{CacheError, CacheStorage, DiskCacheStorage, MemoryCacheStorage};

use sha2::{Digest, Sha256};
use std::fmt::Write;

/// SHA-256 十六进制摘要
pub(crate) fn digest_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
