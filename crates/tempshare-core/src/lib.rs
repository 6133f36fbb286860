//! Tempshare Core Library
//!
//! 临时多人文件共享会话的客户端核心库：保持本地文件列表与服务端一致，
//! 并为静态资源提供离线缓存。
//!
//! # 模块
//!
//! - **view**: 文件条目、快照、变更事件和渲染接口
//! - **sync**: 同步控制器，合并快照与推送事件
//! - **transfer**: 会话 HTTP 接口和 Socket.IO 推送通道
//! - **cache**: 静态资源离线缓存，会话接口始终旁路
//! - **config**: 客户端设置
//! - **notice**: 提示级别与提示条目
//!
//! # 使用示例
//!
//! ```ignore
//! use tempshare_core::{ClientSettings, HttpSessionClient, PushChannel, SyncController};
//!
//! let settings = ClientSettings::load();
//! let client = HttpSessionClient::from_settings(&settings)?;
//! let channel = PushChannel::new(client.base_url(), &settings)?;
//!
//! // 1. 加载快照
//! let mut controller = SyncController::new(client, my_view);
//! controller.bootstrap().await;
//!
//! // 2. 订阅推送并持续应用
//! let signals = controller.subscribe(channel);
//! controller.run(signals).await;
//! ```

pub mod cache;
pub mod config;
pub mod notice;
pub mod sync;
pub mod transfer;
pub mod view;

// Cache re-exports
pub use cache::{
    AssetManifest, CacheError, CacheStorage, DiskCacheStorage, MemoryCacheStorage,
    OfflineCacheGuard,
};

// Config re-exports
pub use config::ClientSettings;

// Notice re-exports
pub use notice::{Notice, Severity};

// Sync re-exports
pub use sync::{ReconcilePlan, SyncController};

// Transfer re-exports
pub use transfer::{
    HttpFetcher, HttpSessionClient, PushChannel, PushError, PushSignal, SessionApi,
    SessionError, Subscription, UploadFile, UploadReceipt,
};

// View re-exports
pub use view::{
    FileEntry, FileView, MutationEvent, SessionSnapshot, ViewSink, is_valid_filename,
};
