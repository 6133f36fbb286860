//! 集成测试 - 与会话服务器的同步
//!
//! 启动一个本地会话服务器（HTTP 接口 + Socket.IO 推送），验证客户端视图
//! 只随推送事件变化，并且离线缓存从不拦截会话接口。

use axum::{
    Json, Router,
    extract::{
        Multipart, Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use futures_util::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempshare_core::{
    ClientSettings, FileEntry, HttpSessionClient, MemoryCacheStorage, OfflineCacheGuard,
    PushChannel, PushSignal, SessionApi, Severity, Subscription, SyncController, UploadFile,
    ViewSink, is_valid_filename,
};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, broadcast};
use url::Url;

const QR_PNG: &[u8] = b"\x89PNG\r\n\x1a\nqr-code";

const OPEN_FRAME: &str =
    r#"0{"sid":"engine-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

// ============================================================================
// 测试服务器
// ============================================================================

struct ServerState {
    files: Mutex<Vec<(String, Vec<u8>)>>,
    events: broadcast::Sender<String>,
    /// 让所有在线推送连接立即断开
    kick: broadcast::Sender<()>,
    base: String,
}

type Shared = Arc<ServerState>;

impl ServerState {
    async fn set_files(&self, names: &[&str]) {
        *self.files.lock().await = names.iter().map(|n| (n.to_string(), Vec::new())).collect();
    }

    fn broadcast(&self, event: &str, filename: &str) {
        let frame = format!("42{}", json!([event, { "filename": filename }]));
        let _ = self.events.send(frame);
    }
}

async fn start_server(files: &[&str]) -> (Url, Shared) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let base = format!("http://127.0.0.1:{}", port);

    let (events, _) = broadcast::channel(64);
    let (kick, _) = broadcast::channel(4);
    let state = Arc::new(ServerState {
        files: Mutex::new(Vec::new()),
        events,
        kick,
        base: base.clone(),
    });
    state.set_files(files).await;

    let app = Router::new()
        .route("/", get(|| async { "<html>tempshare</html>" }))
        .route("/static/app.js", get(|| async { "console.log('tempshare')" }))
        .route("/files", get(files_handler))
        .route("/upload", post(upload_handler))
        .route("/remove/:name", get(remove_handler))
        .route("/download/:name", get(download_handler))
        .route("/get-url", get(url_handler))
        .route(
            "/get-qr",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], QR_PNG) }),
        )
        .route("/socket.io/", get(socket_handler))
        .with_state(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (Url::parse(&base).unwrap(), state)
}

async fn files_handler(State(state): State<Shared>) -> impl IntoResponse {
    let names: Vec<String> = state.files.lock().await.iter().map(|(n, _)| n.clone()).collect();
    Json(names)
}

async fn upload_handler(State(state): State<Shared>, mut multipart: Multipart) -> impl IntoResponse {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap_or_default().to_vec();

        if !is_valid_filename(&filename) {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid filename" })));
        }

        let mut files = state.files.lock().await;
        files.retain(|(n, _)| n != &filename);
        files.push((filename.clone(), bytes));
        drop(files);

        state.broadcast("file_added", &filename);
        return (
            StatusCode::OK,
            Json(json!({ "message": "File uploaded successfully", "filename": filename })),
        );
    }
    (StatusCode::BAD_REQUEST, Json(json!({ "error": "No file part" })))
}

async fn remove_handler(State(state): State<Shared>, Path(name): Path<String>) -> impl IntoResponse {
    let mut files = state.files.lock().await;
    let Some(pos) = files.iter().position(|(n, _)| n == &name) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "File not found" })));
    };
    files.remove(pos);
    drop(files);

    state.broadcast("file_removed", &name);
    (StatusCode::OK, Json(json!({ "message": "File removed successfully" })))
}

async fn download_handler(
    State(state): State<Shared>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let files = state.files.lock().await;
    match files.iter().find(|(n, _)| n == &name) {
        Some((_, bytes)) => (StatusCode::OK, bytes.clone()),
        None => (StatusCode::NOT_FOUND, Vec::new()),
    }
}

async fn url_handler(State(state): State<Shared>) -> impl IntoResponse {
    Json(json!({ "url": state.base }))
}

async fn socket_handler(ws: WebSocketUpgrade, State(state): State<Shared>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| engine_session(socket, state))
}

/// 最小的 Engine.IO / Socket.IO 服务端会话
async fn engine_session(mut socket: WebSocket, state: Shared) {
    let mut events = state.events.subscribe();
    let mut kicks = state.kick.subscribe();

    if socket.send(Message::Text(OPEN_FRAME.to_string())).await.is_err() {
        return;
    }

    // 等待客户端加入默认命名空间
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) if text == "40" => break,
            Some(Ok(_)) => continue,
            _ => return,
        }
    }
    let ack = Message::Text(r#"40{"sid":"socket-sid"}"#.to_string());
    if socket.send(ack).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = events.recv() => match frame {
                Ok(frame) => {
                    if socket.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
                Err(_) => return,
            },
            msg = socket.recv() => match msg {
                Some(Ok(_)) => continue,
                _ => return,
            },
            _ = kicks.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        }
    }
}

// ============================================================================
// 客户端辅助
// ============================================================================

#[derive(Default)]
struct RecordingView {
    rendered: Vec<String>,
    notices: Vec<(String, Severity)>,
}

impl ViewSink for RecordingView {
    fn render(&mut self, entry: &FileEntry) {
        self.rendered.push(entry.filename.clone());
    }

    fn unrender(&mut self, filename: &str) {
        self.rendered.retain(|f| f != filename);
    }

    fn notify(&mut self, message: &str, severity: Severity) {
        self.notices.push((message.to_string(), severity));
    }
}

async fn next_signal(signals: &mut Subscription) -> PushSignal {
    tokio::time::timeout(Duration::from_secs(5), signals.next())
        .await
        .expect("timed out waiting for push signal")
        .expect("push signal stream ended")
}

fn names(controller: &SyncController<HttpSessionClient, RecordingView>) -> Vec<&str> {
    controller.files().iter().map(|e| e.filename.as_str()).collect()
}

// ============================================================================
// 测试
// ============================================================================

/// 完整流程：快照、订阅、上传、删除
#[tokio::test]
async fn test_sync_with_live_server() {
    let (base, _state) = start_server(&["a.txt", "b.txt"]).await;
    let settings = ClientSettings::default();

    let client = HttpSessionClient::new(base.clone(), &settings).unwrap();
    let mut controller = SyncController::new(client, RecordingView::default());

    // 1. 先订阅再加载快照
    let mut signals = controller.subscribe(PushChannel::new(&base, &settings).unwrap());
    assert_eq!(controller.bootstrap().await, 2);
    assert_eq!(names(&controller), vec!["a.txt", "b.txt"]);

    // 2. 加入通道后重新同步，视图不变
    let signal = next_signal(&mut signals).await;
    assert_eq!(signal, PushSignal::Connected);
    controller.handle_signal(signal).await;
    assert_eq!(controller.sink().rendered, vec!["a.txt", "b.txt"]);

    // 3. 上传后等待推送确认
    controller
        .request_upload(UploadFile::new("c.txt", b"hello".to_vec()))
        .await
        .unwrap();
    assert!(!controller.contains("c.txt"));

    let signal = next_signal(&mut signals).await;
    assert!(matches!(signal, PushSignal::Event(_)));
    controller.handle_signal(signal).await;
    assert!(controller.contains("c.txt"));

    // 4. 删除后等待推送确认
    controller.request_removal("a.txt").await.unwrap();
    assert!(controller.contains("a.txt"));

    let signal = next_signal(&mut signals).await;
    controller.handle_signal(signal).await;
    assert_eq!(names(&controller), vec!["b.txt", "c.txt"]);
    assert_eq!(controller.sink().rendered, vec!["b.txt", "c.txt"]);
    assert!(controller.sink().notices.is_empty());
}

/// 服务端拒绝上传时显示服务端给出的原因
#[tokio::test]
async fn test_rejected_upload_shows_server_message() {
    let (base, _state) = start_server(&[]).await;
    let client = HttpSessionClient::new(base, &ClientSettings::default()).unwrap();
    let mut controller = SyncController::new(client, RecordingView::default());
    controller.bootstrap().await;

    let err = controller
        .request_upload(UploadFile::new("noextension", b"x".to_vec()))
        .await
        .unwrap_err();
    assert_eq!(err.server_message(), Some("Invalid filename"));
    assert!(controller.files().is_empty());
    assert_eq!(
        controller.sink().notices,
        vec![("Invalid filename".to_string(), Severity::Error)]
    );
}

/// 删除不存在的文件
#[tokio::test]
async fn test_removing_missing_file_notifies() {
    let (base, _state) = start_server(&["a.txt"]).await;
    let client = HttpSessionClient::new(base, &ClientSettings::default()).unwrap();
    let mut controller = SyncController::new(client, RecordingView::default());
    controller.bootstrap().await;

    assert!(controller.request_removal("ghost.txt").await.is_err());
    assert_eq!(names(&controller), vec!["a.txt"]);
    assert_eq!(
        controller.sink().notices,
        vec![("Error removing file".to_string(), Severity::Error)]
    );
}

/// 服务器不可达时以空视图启动
#[tokio::test]
async fn test_unreachable_server_starts_empty() {
    // 绑定后立即释放端口，保证无人监听
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let base = Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap();
    let client = HttpSessionClient::new(base, &ClientSettings::default()).unwrap();
    let mut controller = SyncController::new(client, RecordingView::default());

    assert_eq!(controller.bootstrap().await, 0);
    assert!(controller.files().is_empty());
    assert_eq!(
        controller.sink().notices,
        vec![("Error loading files".to_string(), Severity::Error)]
    );
}

/// 分享链接和下载
#[tokio::test]
async fn test_share_url_and_download() {
    let (base, state) = start_server(&[]).await;
    let client = HttpSessionClient::new(base.clone(), &ClientSettings::default()).unwrap();

    client
        .upload(UploadFile::new("notes.txt", b"shared notes".to_vec()))
        .await
        .unwrap();
    assert_eq!(client.share_url().await.unwrap(), state.base);

    let dir = tempfile::tempdir().unwrap();
    let path = client.download("notes.txt", dir.path()).await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"shared notes");

    let err = client.download("missing.txt", dir.path()).await.unwrap_err();
    assert!(err.to_string().contains("404"));
}

/// 重复下载不会覆盖已有文件，也不留下临时文件
#[tokio::test]
async fn test_download_keeps_existing_file() {
    let (base, _state) = start_server(&[]).await;
    let client = HttpSessionClient::new(base, &ClientSettings::default()).unwrap();
    client
        .upload(UploadFile::new("notes.txt", b"new notes".to_vec()))
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"local edits").unwrap();

    let path = client.download("notes.txt", dir.path()).await.unwrap();
    assert_eq!(path, dir.path().join("notes (1).txt"));
    assert_eq!(std::fs::read(&path).unwrap(), b"new notes");
    assert_eq!(std::fs::read(dir.path().join("notes.txt")).unwrap(), b"local edits");

    let mut saved: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    saved.sort();
    assert_eq!(saved, vec!["notes (1).txt", "notes.txt"]);
}

/// 分享二维码
#[tokio::test]
async fn test_qr_code() {
    let (base, _state) = start_server(&[]).await;
    let client = HttpSessionClient::new(base, &ClientSettings::default()).unwrap();

    let png = client.qr_code().await.unwrap();
    assert_eq!(png, QR_PNG);
}

/// 服务端断开推送连接后自动重连，并补上断线期间的变化
#[tokio::test]
async fn test_reconnect_after_server_drops_socket() {
    let (base, state) = start_server(&["a.txt", "b.txt"]).await;
    let settings = ClientSettings {
        reconnect_initial_ms: 50,
        reconnect_max_ms: 200,
        ..ClientSettings::default()
    };

    let client = HttpSessionClient::new(base.clone(), &settings).unwrap();
    let mut controller = SyncController::new(client, RecordingView::default());
    let mut signals = controller.subscribe(PushChannel::new(&base, &settings).unwrap());
    controller.bootstrap().await;

    let signal = next_signal(&mut signals).await;
    assert_eq!(signal, PushSignal::Connected);
    controller.handle_signal(signal).await;

    // 断线期间的变化没有推送
    state.set_files(&["b.txt", "c.txt"]).await;
    state.kick.send(()).unwrap();

    let signal = next_signal(&mut signals).await;
    assert!(matches!(signal, PushSignal::Disconnected(_)));
    controller.handle_signal(signal).await;
    assert_eq!(names(&controller), vec!["a.txt", "b.txt"]);

    let signal = next_signal(&mut signals).await;
    assert_eq!(signal, PushSignal::Reconnected);
    controller.handle_signal(signal).await;

    assert_eq!(names(&controller), vec!["b.txt", "c.txt"]);
    assert_eq!(controller.sink().rendered, vec!["b.txt", "c.txt"]);
    assert!(controller.sink().notices.is_empty());
}

/// 离线缓存只保存静态资源，会话接口始终访问网络
#[tokio::test]
async fn test_offline_cache_never_serves_session_data() {
    let (base, state) = start_server(&["a.txt"]).await;
    let settings = ClientSettings {
        precache_assets: vec!["/".into(), "/static/app.js".into(), "/files".into()],
        ..ClientSettings::default()
    };

    let client = HttpSessionClient::new(base.clone(), &settings).unwrap();
    let guard = Arc::new(
        OfflineCacheGuard::from_settings(
            &base,
            &settings,
            Arc::new(MemoryCacheStorage::new()),
            Arc::new(client.network()),
        )
        .unwrap(),
    );
    assert!(guard.prepare().await);
    assert_eq!(guard.cached_entries().await.unwrap(), 2);

    let client = client.with_guard(guard.clone());
    assert_eq!(client.list_files().await.unwrap().len(), 1);

    // 服务端状态变化必须立即可见
    state.set_files(&["a.txt", "b.txt"]).await;
    let snapshot = client.list_files().await.unwrap();
    assert!(snapshot.contains("b.txt"));
    assert!(guard.should_bypass(&base.join("/files").unwrap()));
    assert!(!guard.should_bypass(&base.join("/static/app.js").unwrap()));
}
