//! 会话文件视图
//!
//! 客户端对"当前会话中有哪些文件"的唯一权威视图。
//!
//! - [`FileEntry`]: 以文件名为主键的条目，不跟踪大小、修改时间等属性
//! - [`SessionSnapshot`]: `GET /files` 返回的完整列表
//! - [`MutationEvent`]: 推送通道送达的增量变更
//! - [`FileView`]: 按插入顺序排列、按文件名去重的已渲染集合
//! - [`ViewSink`]: 由展示层实现的渲染接口

use crate::notice::Severity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 会话中的一个文件
///
/// 文件名在会话内唯一，直接作为主键使用。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileEntry {
    pub filename: String,
}

impl FileEntry {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
        }
    }
}

/// 完整文件列表快照
///
/// 顺序由服务端决定，仅在加载时作为显示顺序。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionSnapshot {
    pub entries: Vec<FileEntry>,
}

impl SessionSnapshot {
    pub fn from_filenames<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: names.into_iter().map(FileEntry::new).collect(),
        }
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.entries.iter().any(|e| e.filename == filename)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 推送通道送达的变更事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
    Added(String),
    Removed(String),
}

impl MutationEvent {
    pub fn filename(&self) -> &str {
        match self {
            MutationEvent::Added(name) | MutationEvent::Removed(name) => name,
        }
    }
}

/// 已渲染的文件集合
///
/// 保持插入顺序；同一文件名最多出现一次。
#[derive(Debug, Default)]
pub struct FileView {
    entries: Vec<FileEntry>,
    index: HashSet<String>,
}

impl FileView {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加条目，已存在时返回 `false`
    pub fn insert(&mut self, entry: FileEntry) -> bool {
        if !self.index.insert(entry.filename.clone()) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// 移除条目，不存在时返回 `None`
    pub fn remove(&mut self, filename: &str) -> Option<FileEntry> {
        if !self.index.remove(filename) {
            return None;
        }
        let pos = self.entries.iter().position(|e| e.filename == filename)?;
        Some(self.entries.remove(pos))
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.index.contains(filename)
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.filename.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 展示层接口
///
/// 由控制器调用，展示层负责具体渲染（终端、GUI 或测试记录器）。
pub trait ViewSink {
    /// 渲染一个新条目（追加到末尾）
    fn render(&mut self, entry: &FileEntry);

    /// 移除已渲染的条目
    fn unrender(&mut self, filename: &str);

    /// 显示一条短暂提示
    fn notify(&mut self, message: &str, severity: Severity);
}

/// 检查文件名是否会被服务端接受
///
/// 规则：必须包含扩展名，扩展名非空且只含字母数字，主文件名非空。
pub fn is_valid_filename(filename: &str) -> bool {
    let Some((stem, ext)) = filename.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty() && !ext.is_empty() && ext.chars().all(char::is_alphanumeric)
}
