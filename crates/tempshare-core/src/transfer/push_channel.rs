//! 推送通道
//!
//! 通过 Socket.IO WebSocket 接收服务端的 `file_added` / `file_removed` 事件。
//!
//! # 流程
//!
//! 1. 连接 `/socket.io/?EIO=4&transport=websocket`
//! 2. 收到 Engine.IO open 帧后发送 `40` 加入默认命名空间
//! 3. 收到 `40` 确认后通知 [`PushSignal::Connected`]（重连时为 [`PushSignal::Reconnected`]）
//! 4. 应答服务端 ping，转发文件事件
//!
//! 连接断开后按指数退避重连，直到接收端被丢弃。

use log::{debug, info, warn};

use crate::config::ClientSettings;
use crate::transfer::protocol::{EnginePacket, SocketPacket};
use crate::view::MutationEvent;
use futures_util::{SinkExt, Stream, StreamExt};
use rand::Rng;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// 握手前等待服务端首帧的时间
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// 信号缓冲区大小
const SIGNAL_BUFFER: usize = 256;

/// 推送通道错误
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Connection closed by server")]
    Closed,

    #[error("No ping from server within {0:?}")]
    Timeout(Duration),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// 推送通道向控制器发出的信号
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushSignal {
    /// 首次连接成功
    Connected,
    /// 断线后重新连接成功，期间的事件可能已丢失
    Reconnected,
    /// 文件变更
    Event(MutationEvent),
    /// 连接断开，稍后重连
    Disconnected(String),
}

/// 重连退避
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// 下一次等待时间（附加最多 1/4 的随机抖动）
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);

        let jitter_ms = u64::try_from(base.as_millis() / 4).unwrap_or(0);
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// 一个打开的推送订阅
///
/// 按到达顺序产出信号；丢弃时关闭后台连接。
pub struct Subscription {
    signals: ReceiverStream<PushSignal>,
    task: JoinHandle<()>,
}

impl Stream for Subscription {
    type Item = PushSignal;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.signals).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 推送通道
pub struct PushChannel {
    url: Url,
    backoff: Backoff,
    connected_once: bool,
}

impl PushChannel {
    pub fn new(server: &Url, settings: &ClientSettings) -> Result<Self, PushError> {
        Ok(Self {
            url: Self::handshake_url(server)?,
            backoff: Backoff::new(settings.reconnect_initial(), settings.reconnect_max()),
            connected_once: false,
        })
    }

    /// 由服务器地址推导 WebSocket 握手地址
    pub fn handshake_url(server: &Url) -> Result<Url, PushError> {
        let mut url = server.join("/socket.io/")?;
        url.set_query(Some("EIO=4&transport=websocket"));
        url.set_fragment(None);

        let scheme = match server.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(PushError::Handshake(format!(
                    "unsupported scheme: {}",
                    other
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| PushError::Handshake(format!("cannot use scheme {}", scheme)))?;
        Ok(url)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// 在后台任务中运行，返回信号流
    pub fn open(self) -> Subscription {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        let task = tokio::spawn(self.run(tx));
        Subscription {
            signals: ReceiverStream::new(rx),
            task,
        }
    }

    async fn run(mut self, tx: mpsc::Sender<PushSignal>) {
        loop {
            match self.run_session(&tx).await {
                Ok(()) => {
                    debug!("Push channel receiver dropped, stopping");
                    return;
                }
                Err(e) => {
                    warn!("Push channel disconnected: {}", e);
                    if tx.send(PushSignal::Disconnected(e.to_string())).await.is_err() {
                        return;
                    }
                }
            }

            let delay = self.backoff.next_delay();
            debug!("Reconnecting push channel in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// 单次连接；信号接收端关闭时返回 `Ok(())`
    async fn run_session(&mut self, tx: &mpsc::Sender<PushSignal>) -> Result<(), PushError> {
        info!("Connecting to push channel: {}", self.url);
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let mut window = HANDSHAKE_TIMEOUT;
        let mut joined = false;

        loop {
            let msg = match tokio::time::timeout(window, read.next()).await {
                Ok(Some(msg)) => msg?,
                Ok(None) => return Err(PushError::Closed),
                Err(_) => return Err(PushError::Timeout(window)),
            };

            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => return Err(PushError::Closed),
                _ => continue,
            };

            let Some(packet) = EnginePacket::parse(&text) else {
                warn!("Invalid push frame: {}", text);
                continue;
            };

            match packet {
                EnginePacket::Open(open) => {
                    debug!("Engine.IO open: sid={}", open.sid);
                    window = open.liveness_window();
                    let connect = EnginePacket::Message(SocketPacket::Connect(None));
                    write.send(Message::Text(connect.to_string())).await?;
                }
                EnginePacket::Ping => {
                    write.send(Message::Text(EnginePacket::Pong.to_string())).await?;
                }
                EnginePacket::Close => return Err(PushError::Closed),
                EnginePacket::Message(SocketPacket::Connect(_)) => {
                    joined = true;
                    self.backoff.reset();
                    let signal = if self.connected_once {
                        PushSignal::Reconnected
                    } else {
                        PushSignal::Connected
                    };
                    self.connected_once = true;
                    info!("Push channel joined ({:?})", signal);
                    if tx.send(signal).await.is_err() {
                        return Ok(());
                    }
                }
                EnginePacket::Message(SocketPacket::ConnectError(payload)) => {
                    return Err(PushError::Handshake(format!("{:?}", payload)));
                }
                EnginePacket::Message(SocketPacket::Disconnect) => {
                    return Err(PushError::Closed);
                }
                EnginePacket::Message(socket) => {
                    if !joined {
                        debug!("Ignoring packet before namespace join: {}", socket);
                        continue;
                    }
                    match socket.to_mutation() {
                        Some(event) => {
                            debug!("Push event: {:?}", event);
                            if tx.send(PushSignal::Event(event)).await.is_err() {
                                return Ok(());
                            }
                        }
                        None => debug!("Ignoring push packet: {}", socket),
                    }
                }
                EnginePacket::Pong | EnginePacket::Upgrade | EnginePacket::Noop => {}
            }
        }
    }
}
