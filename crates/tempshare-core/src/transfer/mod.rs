//! 会话传输模块
//!
//! 包含:
//! - HTTP 会话接口客户端（列表、上传、删除、下载、分享）
//! - Socket.IO 推送通道及其消息格式
//! - 离线缓存与会话客户端共用的网络读取层

pub mod api;
pub mod fetch;
pub mod protocol;
pub mod push_channel;

pub use api::{HttpSessionClient, SessionApi, SessionError, UploadFile, UploadReceipt};
pub use fetch::{Fetcher, HttpFetcher, HttpResponse};
pub use protocol::{EnginePacket, SocketPacket};
pub use push_channel::{Backoff, PushChannel, PushError, PushSignal, Subscription};
