//! 终端视图 - 把控制器的渲染调用输出到终端

use tempshare_core::{FileEntry, Notice, Severity, ViewSink};

/// 逐行打印视图变化
pub struct TerminalView {
    /// 是否显示增量前缀（`+` / `-`）
    show_changes: bool,
    shown: usize,
}

impl TerminalView {
    /// 列表模式：只打印文件名
    pub fn listing() -> Self {
        Self {
            show_changes: false,
            shown: 0,
        }
    }

    /// 监视模式：打印每次新增和移除
    pub fn watching() -> Self {
        Self {
            show_changes: true,
            shown: 0,
        }
    }

    /// 当前显示的文件数
    pub fn shown(&self) -> usize {
        self.shown
    }
}

impl ViewSink for TerminalView {
    fn render(&mut self, entry: &FileEntry) {
        self.shown += 1;
        if self.show_changes {
            println!("  + {}", entry.filename);
        } else {
            println!("   {}", entry.filename);
        }
    }

    fn unrender(&mut self, filename: &str) {
        self.shown = self.shown.saturating_sub(1);
        println!("  - {}", filename);
    }

    fn notify(&mut self, message: &str, severity: Severity) {
        let notice = Notice::new(severity, message);
        match severity {
            Severity::Error | Severity::Warning => eprintln!("{}", notice),
            Severity::Info | Severity::Success => println!("{}", notice),
        }
    }
}
