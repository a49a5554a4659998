//! 批量分配：一次从左到右的遍历，把批次切成连续的几段分给不同端点。
//!
//! 每个候选分到 `ceil(剩余单元 / 剩余候选)` 个，同时不超过它的剩余额度。
//! 这是近似均分，不是最优装箱：前面的候选因为向上取整可能多拿，
//! 排在最后的候选可能分得偏少甚至为零，这属于已接受的行为。
//! 批量分配不使用单发的软阈值，任何剩余额度都可以用。

use crate::endpoint::Endpoint;
use crate::quota::ledger::LedgerState;
use crate::quota::types::{Assignment, DistributionPlan, Limits};

pub(crate) fn distribute(
    state: &LedgerState,
    endpoints: &[Endpoint],
    unit_count: usize,
    limits: Limits,
) -> DistributionPlan {
    let mut plan = DistributionPlan {
        assignments: Vec::new(),
        total_units: unit_count,
    };

    let mut candidates: Vec<(&Endpoint, usize)> = endpoints
        .iter()
        .filter(|e| !state.is_exhausted(&e.address))
        .map(|e| (e, limits.remaining(state.load(&e.address)) as usize))
        .filter(|(_, remaining)| *remaining > 0)
        .collect();
    if candidates.is_empty() {
        return plan;
    }

    // 剩余额度多的优先；相同则序号小的优先。
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.ordinal.cmp(&b.0.ordinal)));

    let total = candidates.len();
    let mut cursor = 0usize;
    for (visited, (endpoint, remaining)) in candidates.into_iter().enumerate() {
        if cursor >= unit_count {
            break;
        }
        let units_left = unit_count - cursor;
        let want = units_left.div_ceil(total - visited);
        let take = want.min(remaining).min(units_left);
        if take == 0 {
            continue;
        }
        plan.assignments.push(Assignment {
            ordinal: endpoint.ordinal,
            address: endpoint.address.clone(),
            start: cursor,
            len: take,
        });
        cursor += take;
    }

    plan
}
