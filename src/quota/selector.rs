//! 单发选择：在未耗尽、且低于软阈值的端点中选负载最小者。
//!
//! 软阈值给临近上限的端点留出余量，避免它在请求途中被打满。

use crate::endpoint::Endpoint;
use crate::quota::ledger::LedgerState;
use crate::quota::types::{Limits, SelectionPlan};

/// 负载相同时取序号最小者，保证结果确定。不修改账本。
pub(crate) fn select_one(
    state: &LedgerState,
    endpoints: &[Endpoint],
    limits: Limits,
) -> Option<SelectionPlan> {
    endpoints
        .iter()
        .filter(|e| !state.is_exhausted(&e.address))
        .map(|e| (e, state.load(&e.address)))
        .filter(|(_, load)| limits.below_soft_threshold(*load))
        .min_by_key(|(e, load)| (*load, e.ordinal))
        .map(|(e, _)| SelectionPlan {
            ordinal: e.ordinal,
            address: e.address.clone(),
            usage_before: state.usage(&e.address),
        })
}
