//! 推送通道消息格式
//!
//! 服务端使用 Socket.IO v4（Engine.IO v4 WebSocket 传输）推送变更。
//!
//! Engine.IO 帧: `<type><data>`
//! - `0{json}`: open，携带 `pingInterval` / `pingTimeout`
//! - `1`: close
//! - `2` / `3`: ping / pong
//! - `4<socket packet>`: message
//!
//! Socket.IO 包: `<type>[/nsp,][ackId][json]`
//! - `40`: 连接命名空间
//! - `41`: 断开
//! - `42["file_added",{"filename":"a.txt"}]`: 事件

use crate::view::MutationEvent;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;

static SOCKET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d)(?:(/[^,]*),)?(\d+)?(.*)$").unwrap());

/// 服务端推送的文件新增事件名
pub const EVENT_FILE_ADDED: &str = "file_added";
/// 服务端推送的文件删除事件名
pub const EVENT_FILE_REMOVED: &str = "file_removed";

/// Engine.IO open 帧载荷
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl OpenInfo {
    /// 两次 ping 之间允许的最长静默时间
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// Engine.IO 帧
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// Socket.IO 包（仅默认命名空间）
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, args: Vec<Value> },
    Ack { id: u64, args: Vec<Value> },
    ConnectError(Option<Value>),
}

impl EnginePacket {
    /// 解析一个文本帧
    pub fn parse(text: &str) -> Option<Self> {
        let mut chars = text.chars();
        let kind = chars.next()?;
        let rest = chars.as_str();

        match kind {
            '0' => serde_json::from_str(rest).ok().map(EnginePacket::Open),
            '1' => Some(EnginePacket::Close),
            '2' => Some(EnginePacket::Ping),
            '3' => Some(EnginePacket::Pong),
            '4' => SocketPacket::parse(rest).map(EnginePacket::Message),
            '5' => Some(EnginePacket::Upgrade),
            '6' => Some(EnginePacket::Noop),
            _ => None,
        }
    }
}

impl std::fmt::Display for EnginePacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnginePacket::Open(info) => write!(
                f,
                "0{}",
                serde_json::json!({
                    "sid": info.sid,
                    "upgrades": info.upgrades,
                    "pingInterval": info.ping_interval,
                    "pingTimeout": info.ping_timeout,
                })
            ),
            EnginePacket::Close => write!(f, "1"),
            EnginePacket::Ping => write!(f, "2"),
            EnginePacket::Pong => write!(f, "3"),
            EnginePacket::Message(packet) => write!(f, "4{}", packet),
            EnginePacket::Upgrade => write!(f, "5"),
            EnginePacket::Noop => write!(f, "6"),
        }
    }
}

impl SocketPacket {
    /// 解析 Socket.IO 包，非默认命名空间的包被忽略
    pub fn parse(text: &str) -> Option<Self> {
        let caps = SOCKET_PATTERN.captures(text)?;

        let kind = caps.get(1)?.as_str();
        if let Some(nsp) = caps.get(2)
            && nsp.as_str() != "/"
        {
            return None;
        }
        let ack_id = caps.get(3).and_then(|m| m.as_str().parse::<u64>().ok());
        let body = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
        let payload: Option<Value> = if body.is_empty() {
            None
        } else {
            Some(serde_json::from_str(body).ok()?)
        };

        match kind {
            "0" => Some(SocketPacket::Connect(payload)),
            "1" => Some(SocketPacket::Disconnect),
            "2" => {
                let mut items = match payload? {
                    Value::Array(items) => items,
                    _ => return None,
                };
                if items.is_empty() {
                    return None;
                }
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    _ => return None,
                };
                Some(SocketPacket::Event { name, args: items })
            }
            "3" => {
                let args = match payload {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                Some(SocketPacket::Ack { id: ack_id?, args })
            }
            "4" => Some(SocketPacket::ConnectError(payload)),
            _ => None,
        }
    }

    /// 创建事件包
    pub fn event(name: &str, payload: Value) -> Self {
        SocketPacket::Event {
            name: name.to_string(),
            args: vec![payload],
        }
    }

    /// 转换为文件变更事件，无关事件返回 `None`
    pub fn to_mutation(&self) -> Option<MutationEvent> {
        let SocketPacket::Event { name, args } = self else {
            return None;
        };
        let payload: FilePayload = serde_json::from_value(args.first()?.clone()).ok()?;

        match name.as_str() {
            EVENT_FILE_ADDED => Some(MutationEvent::Added(payload.filename)),
            EVENT_FILE_REMOVED => Some(MutationEvent::Removed(payload.filename)),
            _ => None,
        }
    }
}

impl std::fmt::Display for SocketPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketPacket::Connect(payload) => {
                write!(f, "0")?;
                if let Some(payload) = payload {
                    write!(f, "{}", payload)?;
                }
                Ok(())
            }
            SocketPacket::Disconnect => write!(f, "1"),
            SocketPacket::Event { name, args } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                write!(f, "2{}", Value::Array(items))
            }
            SocketPacket::Ack { id, args } => write!(f, "3{}{}", id, Value::Array(args.clone())),
            SocketPacket::ConnectError(payload) => {
                write!(f, "4")?;
                if let Some(payload) = payload {
                    write!(f, "{}", payload)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&MutationEvent> for SocketPacket {
    fn from(event: &MutationEvent) -> Self {
        let (name, filename) = match event {
            MutationEvent::Added(f) => (EVENT_FILE_ADDED, f),
            MutationEvent::Removed(f) => (EVENT_FILE_REMOVED, f),
        };
        SocketPacket::event(name, serde_json::json!({ "filename": filename }))
    }
}

/// 文件事件载荷
#[derive(Debug, Deserialize)]
struct FilePayload {
    filename: String,
}
