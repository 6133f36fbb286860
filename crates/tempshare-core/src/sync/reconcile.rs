//! 快照与推送事件的合并
//!
//! 快照请求和推送通道是两个互不排序的来源。推送事件在通道内严格有序，
//! 所以一个文件名最近一次推送事件比任何一次快照都更新：
//!
//! - 最近事件为 `Added` 的文件即使不在快照中也保留
//! - 最近事件为 `Removed` 的文件即使在快照中也不渲染
//!
//! 其余文件以快照为准。

use crate::view::{FileEntry, FileView, MutationEvent, SessionSnapshot};
use std::collections::{HashMap, HashSet};

/// 某个文件名最近一次推送事件给出的事实
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFact {
    Present,
    Absent,
}

/// 自上次快照合并以来已应用的推送事件
#[derive(Debug, Default)]
pub struct PushLedger {
    facts: HashMap<String, PushFact>,
}

impl PushLedger {
    pub fn record(&mut self, event: &MutationEvent) {
        let fact = match event {
            MutationEvent::Added(_) => PushFact::Present,
            MutationEvent::Removed(_) => PushFact::Absent,
        };
        self.facts.insert(event.filename().to_string(), fact);
    }

    pub fn fact(&self, filename: &str) -> Option<PushFact> {
        self.facts.get(filename).copied()
    }

    pub fn clear(&mut self) {
        self.facts.clear();
    }
}

/// 将视图调整为快照所需的操作
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// 需要移除的文件（视图中有、快照中没有）
    pub stale: Vec<String>,
    /// 需要追加的文件（按快照顺序）
    pub fresh: Vec<FileEntry>,
}

impl ReconcilePlan {
    /// 计算文件名集合差异
    pub fn compute(view: &FileView, snapshot: &SessionSnapshot, ledger: &PushLedger) -> Self {
        let stale = view
            .filenames()
            .filter(|name| !snapshot.contains(name))
            .filter(|name| ledger.fact(name) != Some(PushFact::Present))
            .map(str::to_string)
            .collect();

        let mut seen = HashSet::new();
        let fresh = snapshot
            .entries
            .iter()
            .filter(|entry| seen.insert(entry.filename.as_str()))
            .filter(|entry| !view.contains(&entry.filename))
            .filter(|entry| ledger.fact(&entry.filename) != Some(PushFact::Absent))
            .cloned()
            .collect();

        Self { stale, fresh }
    }

    pub fn is_empty(&self) -> bool {
        self.stale.is_empty() && self.fresh.is_empty()
    }
}
