//! 用量账本（Quota Ledger）模块。
//!
//! 记录每个投递端点当日的发送量与耗尽状态，并据此为单发选择端点、为批量生成分配计划。
//! 纯内存状态，无 I/O；跨日清零由 `reset` 负责。

mod distributor;
mod ledger;
mod reset;
mod selector;
mod types;

pub use ledger::{Reservation, UsageLedger};
pub use reset::next_reset_after;
pub use types::{
    Assignment, DistributionPlan, EndpointUsage, LedgerSnapshot, Limits, SelectionPlan,
};
