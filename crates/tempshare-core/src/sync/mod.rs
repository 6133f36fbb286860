//! 同步模块
//!
//! 快照来源和推送来源合并到同一个视图归约函数上。

pub mod controller;
pub mod reconcile;

pub use controller::{LOAD_FAILED, REMOVE_FAILED, SyncController, UPLOAD_FAILED};
pub use reconcile::{PushFact, PushLedger, ReconcilePlan};
