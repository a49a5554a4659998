use crate::delivery::MailUnit;
use crate::endpoint::{CacheStatus, FetchError};
use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// 没有任何端点还有额度：属于“明天再试”，不是服务故障。
    #[error("所有 WebApp 均已达到每日上限或接近上限，请明天再试")]
    NoCapacity {
        endpoints: Vec<EndpointStat>,
        next_reset: DateTime<Local>,
    },

    /// 选中的端点自报额度耗尽（账本已更新）。
    #[error("WebApp #{webapp} 额度已耗尽")]
    EndpointQuotaExceeded {
        webapp: usize,
        available_apps: usize,
        detail: String,
    },

    /// 与额度无关的投递失败（账本不变，调用方可重试）。
    #[error("邮件发送失败")]
    Dispatch { webapp: usize, detail: String },

    #[error(transparent)]
    ProviderUnavailable(#[from] FetchError),
}

/// 端点级别的统计信息。`webapp` 为当前列表中的 1 起始编号，不在列表中时为 None。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStat {
    pub webapp: Option<usize>,
    pub address: Arc<str>,
    pub usage: u32,
    pub in_flight: u32,
    pub limit: u32,
    pub remaining: u32,
    pub exhausted: bool,
}

/// 全局计数与可用端点数。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub total_sent: u64,
    pub total_failed: u64,
    pub available_apps: usize,
    pub rate_limited_apps: usize,
}

#[derive(Debug, Clone)]
pub struct SingleReceipt {
    pub webapp: usize,
    /// 本次发送后的用量。
    pub usage_after: u32,
    pub limit: u32,
    pub counters: Counters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Sent,
    Failed,
    Undistributed,
}

#[derive(Debug, Clone)]
pub struct UnitResult {
    pub to: String,
    pub status: UnitStatus,
    pub webapp: Option<usize>,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl UnitResult {
    pub(super) fn sent(unit: &MailUnit, webapp: usize) -> Self {
        Self {
            to: unit.to.clone(),
            status: UnitStatus::Sent,
            webapp: Some(webapp),
            reason: None,
            timestamp: Utc::now(),
        }
    }

    pub(super) fn failed(unit: &MailUnit, webapp: usize, reason: String) -> Self {
        Self {
            to: unit.to.clone(),
            status: UnitStatus::Failed,
            webapp: Some(webapp),
            reason: Some(reason),
            timestamp: Utc::now(),
        }
    }

    pub(super) fn undistributed(unit: &MailUnit) -> Self {
        Self {
            to: unit.to.clone(),
            status: UnitStatus::Undistributed,
            webapp: None,
            reason: Some("没有可用额度承接该邮件".to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// 批量计划中一个端点的汇总。
#[derive(Debug, Clone)]
pub struct SliceSummary {
    pub webapp: usize,
    pub assigned: usize,
    pub usage_after: u32,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub total: usize,
    pub delivered: usize,
    pub failed: usize,
    pub undistributed: usize,
    pub limit: u32,
    pub distribution: Vec<SliceSummary>,
    /// 与输入顺序一致。
    pub results: Vec<UnitResult>,
}

#[derive(Debug, Clone)]
pub struct StatsReport {
    pub counters: Counters,
    pub total_endpoints: usize,
    pub daily_limit: u32,
    pub uptime_secs: u64,
    pub last_reset: DateTime<Local>,
    pub cache: CacheStatus,
    pub endpoints: Vec<EndpointStat>,
}
