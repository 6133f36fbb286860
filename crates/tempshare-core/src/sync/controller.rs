//! 文件列表同步控制器
//!
//! 控制器独占客户端视图，是唯一修改它的地方：
//!
//! 1. [`SyncController::bootstrap`] 拉取完整快照并渲染
//! 2. [`SyncController::subscribe`] 打开推送通道
//! 3. 每个推送事件经 [`SyncController::apply`] 作为增量应用
//! 4. 每次加入推送通道（首次连接或重连）后重新拉取快照并按集合差异合并，
//!    补上加入之前或断线期间错过的变更
//!
//! 上传和删除请求不会乐观地修改视图，只有服务端推回的事件才会。
//! 因此操作者本人和其他参与者走同一条路径，所有应用操作都是幂等的。

use log::{debug, error, info, warn};

use crate::notice::Severity;
use crate::sync::reconcile::{PushLedger, ReconcilePlan};
use crate::transfer::{PushChannel, PushSignal, SessionApi, SessionError, Subscription};
use crate::transfer::{UploadFile, UploadReceipt};
use crate::view::{FileEntry, FileView, MutationEvent, SessionSnapshot, ViewSink};
use futures_util::{Stream, StreamExt};

/// 快照加载失败时的提示
pub const LOAD_FAILED: &str = "Error loading files";
/// 上传失败且服务端未给出原因时的提示
pub const UPLOAD_FAILED: &str = "Error uploading file";
/// 删除失败时的提示
pub const REMOVE_FAILED: &str = "Error removing file";

/// 同步控制器
pub struct SyncController<A, V> {
    api: A,
    sink: V,
    view: FileView,
    ledger: PushLedger,
    /// 自上次加入或断线以来是否已合并过快照
    synced: bool,
}

impl<A: SessionApi, V: ViewSink> SyncController<A, V> {
    pub fn new(api: A, sink: V) -> Self {
        Self {
            api,
            sink,
            view: FileView::new(),
            ledger: PushLedger::default(),
            synced: false,
        }
    }

    /// 当前视图（按显示顺序）
    pub fn files(&self) -> &[FileEntry] {
        self.view.entries()
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.view.contains(filename)
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn sink(&self) -> &V {
        &self.sink
    }

    /// 拉取快照并渲染
    ///
    /// 失败时视图保持不变（首次加载即为空），并提示一次；不重试。
    /// 返回新渲染的条目数。
    pub async fn bootstrap(&mut self) -> usize {
        match self.api.list_files().await {
            Ok(snapshot) => {
                let rendered = self.reconcile(&snapshot).fresh.len();
                info!(
                    "Loaded snapshot: {} file(s), {} newly rendered",
                    snapshot.len(),
                    rendered
                );
                rendered
            }
            Err(e) => {
                error!("Failed to load file list: {}", e);
                self.sink.notify(LOAD_FAILED, Severity::Error);
                0
            }
        }
    }

    /// 打开推送通道
    pub fn subscribe(&self, channel: PushChannel) -> Subscription {
        info!("Subscribing to push channel: {}", channel.url());
        channel.open()
    }

    /// 幂等插入：已渲染时不做任何事
    pub fn on_added(&mut self, filename: &str) -> bool {
        self.apply(&MutationEvent::Added(filename.to_string()))
    }

    /// 幂等删除：未渲染时不做任何事
    pub fn on_removed(&mut self, filename: &str) -> bool {
        self.apply(&MutationEvent::Removed(filename.to_string()))
    }

    /// 应用一个推送事件，返回视图是否改变
    pub fn apply(&mut self, event: &MutationEvent) -> bool {
        // 快照已合并后，事件与快照的先后关系已确定，无需再记录
        if !self.synced {
            self.ledger.record(event);
        }

        let changed = match event {
            MutationEvent::Added(filename) => self.render(FileEntry::new(filename.as_str())),
            MutationEvent::Removed(filename) => self.unrender(filename),
        };
        if !changed {
            debug!("Event already reflected in view: {:?}", event);
        }
        changed
    }

    /// 将视图与新快照按文件名集合差异合并
    ///
    /// 移除快照中已不存在的条目，按快照顺序追加新条目，其余条目保持原位。
    /// 尚未合并快照期间推送事件给出的结论优先于快照。
    pub fn reconcile(&mut self, snapshot: &SessionSnapshot) -> ReconcilePlan {
        let plan = ReconcilePlan::compute(&self.view, snapshot, &self.ledger);

        for filename in &plan.stale {
            self.unrender(filename);
        }
        for entry in &plan.fresh {
            self.render(entry.clone());
        }

        self.ledger.clear();
        self.synced = true;
        plan
    }

    /// 处理一个推送信号
    pub async fn handle_signal(&mut self, signal: PushSignal) {
        match signal {
            PushSignal::Connected => {
                info!("Push channel connected, resynchronizing");
                self.forget_push_facts();
                self.resync().await;
            }
            PushSignal::Reconnected => {
                info!("Push channel reconnected, resynchronizing");
                self.forget_push_facts();
                self.resync().await;
            }
            PushSignal::Event(event) => {
                self.apply(&event);
            }
            PushSignal::Disconnected(reason) => {
                warn!("Push channel lost, view may be stale: {}", reason);
                self.forget_push_facts();
            }
        }
    }

    /// 按到达顺序处理信号，直到信号流结束
    pub async fn run<S>(&mut self, mut signals: S)
    where
        S: Stream<Item = PushSignal> + Unpin,
    {
        while let Some(signal) = signals.next().await {
            self.handle_signal(signal).await;
        }
        debug!("Push signal stream ended");
    }

    /// 断线前的推送事实不能覆盖之后拉取的快照
    fn forget_push_facts(&mut self) {
        self.ledger.clear();
        self.synced = false;
    }

    /// 加入推送通道后重新同步；失败只记录日志
    async fn resync(&mut self) {
        match self.api.list_files().await {
            Ok(snapshot) => {
                let plan = self.reconcile(&snapshot);
                if !plan.is_empty() {
                    info!(
                        "Resync removed {} and added {} file(s)",
                        plan.stale.len(),
                        plan.fresh.len()
                    );
                }
            }
            Err(e) => warn!("Resync failed, keeping current view: {}", e),
        }
    }

    /// 上传文件
    ///
    /// 不会乐观渲染；失败时提示一次并返回错误。
    pub async fn request_upload(
        &mut self,
        file: UploadFile,
    ) -> Result<UploadReceipt, SessionError> {
        let filename = file.filename.clone();
        match self.api.upload(file).await {
            Ok(receipt) => {
                info!("Uploaded {}, waiting for confirmation event", filename);
                Ok(receipt)
            }
            Err(e) => {
                error!("Upload of {} failed: {}", filename, e);
                self.sink
                    .notify(&e.user_message(UPLOAD_FAILED), Severity::Error);
                Err(e)
            }
        }
    }

    /// 请求删除文件
    ///
    /// 不会乐观移除；失败时提示一次并返回错误。
    pub async fn request_removal(&mut self, filename: &str) -> Result<(), SessionError> {
        match self.api.remove(filename).await {
            Ok(()) => {
                info!("Removal of {} requested, waiting for confirmation event", filename);
                Ok(())
            }
            Err(e) => {
                error!("Removal of {} failed: {}", filename, e);
                self.sink.notify(REMOVE_FAILED, Severity::Error);
                Err(e)
            }
        }
    }

    fn render(&mut self, entry: FileEntry) -> bool {
        if self.view.contains(&entry.filename) {
            return false;
        }
        self.sink.render(&entry);
        self.view.insert(entry)
    }

    fn unrender(&mut self, filename: &str) -> bool {
        if self.view.remove(filename).is_none() {
            return false;
        }
        self.sink.unrender(filename);
        true
    }
}
