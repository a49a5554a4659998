use chrono::{DateTime, Local};
use std::ops::Range;
use std::sync::Arc;

/// 所有端点共享的额度参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// 单个端点每日最多可投递数量。
    pub daily_limit: u32,
    /// 单发选择的软阈值（百分比）：负载达到该比例的端点不再参与单发选择。
    pub soft_percent: u32,
}

impl Limits {
    pub fn new(daily_limit: u32, soft_percent: u32) -> Self {
        Self {
            daily_limit: daily_limit.max(1),
            soft_percent: soft_percent.clamp(1, 100),
        }
    }

    /// load < daily_limit * soft_percent / 100（整数比较，边界值本身被排除）。
    pub fn below_soft_threshold(&self, load: u32) -> bool {
        u64::from(load) * 100 < u64::from(self.daily_limit) * u64::from(self.soft_percent)
    }

    pub fn remaining(&self, load: u32) -> u32 {
        self.daily_limit.saturating_sub(load)
    }
}

/// 单发选择结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPlan {
    pub ordinal: usize,
    pub address: Arc<str>,
    /// 选择时已确认的用量。投递期间可能有并发投递或重置，
    /// 回执里的发送后用量以结算时账本返回的值为准，不是这里 +1。
    pub usage_before: u32,
}

/// 批量分配中的一段：输入批次里连续的一段单元交给同一个端点。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub ordinal: usize,
    pub address: Arc<str>,
    pub start: usize,
    pub len: usize,
}

impl Assignment {
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.len
    }

    pub fn units<'a, T>(&self, batch: &'a [T]) -> &'a [T] {
        &batch[self.range()]
    }
}

/// 批量分配计划。各段按输入顺序首尾相接，覆盖批次的一个前缀。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionPlan {
    pub assignments: Vec<Assignment>,
    pub total_units: usize,
}

impl DistributionPlan {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn assigned(&self) -> usize {
        self.assignments.iter().map(|a| a.len).sum()
    }

    /// 没有任何端点能承接的单元（批次尾部）。
    pub fn undistributed(&self) -> Range<usize> {
        self.assigned()..self.total_units
    }
}

/// 单个端点的用量视图。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUsage {
    pub address: Arc<str>,
    pub usage: u32,
    pub in_flight: u32,
    pub exhausted: bool,
}

/// 账本只读快照（/stats 与无可用端点时的响应）。
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub limits: Limits,
    pub endpoints: Vec<EndpointUsage>,
    pub last_reset: DateTime<Local>,
}

impl LedgerSnapshot {
    pub fn usage_of(&self, address: &str) -> Option<&EndpointUsage> {
        self.endpoints.iter().find(|e| &*e.address == address)
    }

    pub fn is_exhausted(&self, address: &str) -> bool {
        self.usage_of(address).is_some_and(|e| e.exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_threshold_boundary_is_excluded() {
        let limits = Limits::new(1400, 90);
        assert!(limits.below_soft_threshold(1259));
        assert!(!limits.below_soft_threshold(1260));
        assert!(!limits.below_soft_threshold(1300));
    }

    #[test]
    fn limits_are_clamped() {
        let limits = Limits::new(0, 250);
        assert_eq!(limits.daily_limit, 1);
        assert_eq!(limits.soft_percent, 100);
    }
}
