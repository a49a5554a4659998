use crate::relay::{
    BatchReport, Counters, EndpointStat, SingleReceipt, SliceSummary, StatsReport, UnitResult,
    UnitStatus, percentage,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct EmailQuery {
    pub to: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
}

fn iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_iso() -> String {
    iso(Utc::now())
}

/// 单个 WebApp 的用量明细（/stats 与无可用端点时的响应共用）。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebAppStat {
    /// 当前列表中的 1 起始编号；地址已不在列表中时为 null。
    pub web_app: Option<usize>,
    pub usage: u32,
    pub in_flight: u32,
    pub limit: u32,
    pub percentage: String,
    pub remaining: u32,
    pub is_limited: bool,
}

impl From<&EndpointStat> for WebAppStat {
    fn from(s: &EndpointStat) -> Self {
        Self {
            web_app: s.webapp,
            usage: s.usage,
            in_flight: s.in_flight,
            limit: s.limit,
            percentage: percentage(s.usage, s.limit),
            remaining: s.remaining,
            is_limited: s.exhausted,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersBody {
    pub total_sent: u64,
    pub total_failed: u64,
    pub available_apps: usize,
    pub rate_limited_apps: usize,
}

impl From<Counters> for CountersBody {
    fn from(c: Counters) -> Self {
        Self {
            total_sent: c.total_sent,
            total_failed: c.total_failed,
            available_apps: c.available_apps,
            rate_limited_apps: c.rate_limited_apps,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleData {
    pub to: String,
    pub subject: String,
    pub from: String,
    pub web_app_used: usize,
    pub web_app_usage: u32,
    pub web_app_limit: u32,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct SingleResponse {
    pub success: bool,
    pub message: &'static str,
    pub data: SingleData,
    pub stats: CountersBody,
}

impl SingleResponse {
    pub fn new(to: String, subject: String, from: String, receipt: SingleReceipt) -> Self {
        Self {
            success: true,
            message: "邮件发送成功",
            data: SingleData {
                to,
                subject,
                from,
                web_app_used: receipt.webapp,
                web_app_usage: receipt.usage_after,
                web_app_limit: receipt.limit,
                timestamp: now_iso(),
            },
            stats: receipt.counters.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub undistributed: usize,
    pub success_rate: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDistribution {
    pub web_app: usize,
    pub emails_assigned: usize,
    pub current_usage: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub email: String,
    pub status: &'static str,
    pub web_app: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl From<UnitResult> for BulkResult {
    fn from(r: UnitResult) -> Self {
        Self {
            email: r.to,
            status: match r.status {
                UnitStatus::Sent => "sent",
                UnitStatus::Failed => "failed",
                UnitStatus::Undistributed => "undistributed",
            },
            web_app: r.webapp,
            error: r.reason,
            timestamp: iso(r.timestamp),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BulkResponse {
    pub success: bool,
    pub message: &'static str,
    pub summary: BulkSummary,
    pub distribution: Vec<BulkDistribution>,
    pub results: Vec<BulkResult>,
}

impl From<BatchReport> for BulkResponse {
    fn from(r: BatchReport) -> Self {
        let success_rate = if r.total == 0 {
            "0.0%".to_string()
        } else {
            format!("{:.1}%", r.delivered as f64 * 100.0 / r.total as f64)
        };
        let limit = r.limit;
        Self {
            success: true,
            message: "批量发送已完成",
            summary: BulkSummary {
                total: r.total,
                sent: r.delivered,
                failed: r.failed,
                undistributed: r.undistributed,
                success_rate,
            },
            distribution: r
                .distribution
                .into_iter()
                .map(|d: SliceSummary| BulkDistribution {
                    web_app: d.webapp,
                    emails_assigned: d.assigned,
                    current_usage: d.usage_after,
                    limit,
                })
                .collect(),
            results: r.results.into_iter().map(BulkResult::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatusBody {
    pub urls_cached: usize,
    pub last_fetch: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsBody {
    pub total_sent: u64,
    pub total_failed: u64,
    pub total_web_apps: usize,
    pub available_apps: usize,
    pub rate_limited_apps: usize,
    pub daily_limit: u32,
    pub uptime: u64,
    pub last_reset: String,
    pub cache_status: CacheStatusBody,
    pub web_app_details: Vec<WebAppStat>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: StatsBody,
}

impl From<StatsReport> for StatsResponse {
    fn from(r: StatsReport) -> Self {
        Self {
            success: true,
            stats: StatsBody {
                total_sent: r.counters.total_sent,
                total_failed: r.counters.total_failed,
                total_web_apps: r.total_endpoints,
                available_apps: r.counters.available_apps,
                rate_limited_apps: r.counters.rate_limited_apps,
                daily_limit: r.daily_limit,
                uptime: r.uptime_secs,
                last_reset: iso(r.last_reset.with_timezone(&Utc)),
                cache_status: CacheStatusBody {
                    urls_cached: r.cache.urls_cached,
                    last_fetch: r.cache.last_fetch.map(iso),
                },
                web_app_details: r.endpoints.iter().map(WebAppStat::from).collect(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub message: &'static str,
    pub timestamp: String,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub success: bool,
    pub message: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub success: bool,
    pub message: &'static str,
    pub urls_loaded: usize,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bulk_response_shape() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).single().unwrap();
        let report = BatchReport {
            total: 3,
            delivered: 1,
            failed: 1,
            undistributed: 1,
            limit: 1400,
            distribution: vec![SliceSummary {
                webapp: 2,
                assigned: 2,
                usage_after: 41,
            }],
            results: vec![
                UnitResult {
                    to: "a@example.com".to_string(),
                    status: UnitStatus::Sent,
                    webapp: Some(2),
                    reason: None,
                    timestamp: ts,
                },
                UnitResult {
                    to: "b@example.com".to_string(),
                    status: UnitStatus::Failed,
                    webapp: Some(2),
                    reason: Some("HTTP 500".to_string()),
                    timestamp: ts,
                },
                UnitResult {
                    to: "c@example.com".to_string(),
                    status: UnitStatus::Undistributed,
                    webapp: None,
                    reason: Some("no capacity".to_string()),
                    timestamp: ts,
                },
            ],
        };

        let v = serde_json::to_value(BulkResponse::from(report)).unwrap();
        assert_eq!(v["summary"]["successRate"], "33.3%");
        assert_eq!(v["summary"]["undistributed"], 1);
        assert_eq!(v["distribution"][0]["webApp"], 2);
        assert_eq!(v["distribution"][0]["emailsAssigned"], 2);
        assert_eq!(v["distribution"][0]["currentUsage"], 41);
        assert_eq!(v["results"][0]["status"], "sent");
        assert!(v["results"][0].get("error").is_none());
        assert_eq!(v["results"][1]["error"], "HTTP 500");
        assert!(v["results"][2]["webApp"].is_null());
        assert_eq!(v["results"][0]["timestamp"], "2026-03-10T08:00:00.000Z");
    }
}
