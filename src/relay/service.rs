use crate::delivery::{Deliverer, DeliveryOutcome, MailUnit};
use crate::endpoint::{Endpoint, EndpointSource};
use crate::quota::{LedgerSnapshot, Limits, Reservation, UsageLedger, next_reset_after};
use crate::relay::types::{
    BatchReport, Counters, EndpointStat, RelayError, SingleReceipt, SliceSummary, StatsReport,
    UnitResult, UnitStatus,
};
use chrono::{DateTime, Local};
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 投递中枢：串起端点列表、用量账本与投递能力。
///
/// 每个入口先做跨日检查，再取端点列表，然后选择/分配并预留额度，
/// 投递后按结果回写账本。
#[derive(Debug)]
pub struct Relay<S, D> {
    ledger: UsageLedger,
    source: S,
    deliverer: D,
    /// 批量发送时同一端点两次投递之间的最小间隔。
    spacing: Duration,
    started: Instant,
    total_sent: AtomicU64,
    total_failed: AtomicU64,
}

impl<S: EndpointSource, D: Deliverer> Relay<S, D> {
    pub fn new(ledger: UsageLedger, source: S, deliverer: D, spacing: Duration) -> Self {
        Self {
            ledger,
            source,
            deliverer,
            spacing,
            started: Instant::now(),
            total_sent: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> Limits {
        self.ledger.limits()
    }

    async fn current_endpoints(&self) -> Result<Vec<Endpoint>, RelayError> {
        let addresses = self.source.endpoints().await?;
        Ok(Endpoint::from_addresses(&addresses))
    }

    /// 单发：选负载最小的端点投递一封。
    pub async fn send_one(&self, unit: &MailUnit) -> Result<SingleReceipt, RelayError> {
        self.ledger.maybe_reset(Local::now());
        let endpoints = self.current_endpoints().await?;

        let Some((plan, mut reservation)) = self.ledger.reserve_one(&endpoints) else {
            return Err(self.no_capacity(&endpoints));
        };
        let webapp = plan.ordinal + 1;

        let outcome = self.deliverer.deliver(&plan.address, unit).await;
        let usage_after = reservation.settle(&outcome);
        drop(reservation);

        match outcome {
            DeliveryOutcome::Delivered => {
                self.total_sent.fetch_add(1, Ordering::Relaxed);
                let limit = self.limits().daily_limit;
                tracing::info!(
                    "已发送至 {} （WebApp #{webapp}，用量 {}→{usage_after}/{limit}，{}）",
                    unit.to,
                    plan.usage_before,
                    percentage(usage_after, limit)
                );
                Ok(SingleReceipt {
                    webapp,
                    usage_after,
                    limit,
                    counters: self.counters(&endpoints, Local::now()),
                })
            }
            DeliveryOutcome::QuotaExceeded(detail) => {
                self.total_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(detail = %detail, "WebApp #{webapp} 意外触发额度上限");
                let available_apps = self.counters(&endpoints, Local::now()).available_apps;
                Err(RelayError::EndpointQuotaExceeded {
                    webapp,
                    available_apps,
                    detail,
                })
            }
            DeliveryOutcome::OtherFailure(detail) => {
                self.total_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(detail = %detail, "发送至 {} 失败（WebApp #{webapp}）", unit.to);
                Err(RelayError::Dispatch { webapp, detail })
            }
        }
    }

    /// 批量：一次性生成分配计划，各端点的分段并发执行，段内按间隔顺序投递。
    ///
    /// 部分失败不是错误；只有一个单元都分配不出去时才返回 NoCapacity。
    pub async fn send_batch(&self, units: &[MailUnit]) -> Result<BatchReport, RelayError> {
        self.ledger.maybe_reset(Local::now());
        let endpoints = self.current_endpoints().await?;

        let (plan, reservations) = self.ledger.reserve_batch(&endpoints, units.len());
        if plan.is_empty() {
            return Err(self.no_capacity(&endpoints));
        }

        let slices = plan
            .assignments
            .iter()
            .zip(reservations)
            .map(|(a, r)| self.run_slice(a.units(units), r));
        let mut results: Vec<UnitResult> = join_all(slices).await.into_iter().flatten().collect();
        results.extend(units[plan.undistributed()].iter().map(UnitResult::undistributed));

        if !plan.undistributed().is_empty() {
            tracing::warn!(
                "批量发送有 {} 封因额度不足未分配",
                plan.undistributed().len()
            );
        }

        let snapshot = self.ledger.snapshot(Local::now());
        let distribution = plan
            .assignments
            .iter()
            .map(|a| SliceSummary {
                webapp: a.ordinal + 1,
                assigned: a.len,
                usage_after: snapshot.usage_of(&a.address).map(|u| u.usage).unwrap_or(0),
            })
            .collect();

        let count = |s: UnitStatus| results.iter().filter(|r| r.status == s).count();
        Ok(BatchReport {
            total: units.len(),
            delivered: count(UnitStatus::Sent),
            failed: count(UnitStatus::Failed),
            undistributed: count(UnitStatus::Undistributed),
            limit: self.limits().daily_limit,
            distribution,
            results,
        })
    }

    async fn run_slice(&self, units: &[MailUnit], mut reservation: Reservation<'_>) -> Vec<UnitResult> {
        let webapp = reservation.ordinal() + 1;
        tracing::info!("WebApp #{webapp} 开始处理 {} 封邮件", units.len());

        let mut results = Vec::with_capacity(units.len());
        // 端点中途报告耗尽后，剩余单元不再发送，直接记为失败。
        let mut halted: Option<String> = None;

        for (i, unit) in units.iter().enumerate() {
            if let Some(detail) = &halted {
                self.total_failed.fetch_add(1, Ordering::Relaxed);
                results.push(UnitResult::failed(
                    unit,
                    webapp,
                    format!("WebApp #{webapp} 额度已耗尽，未发送: {detail}"),
                ));
                continue;
            }
            if i > 0 && !self.spacing.is_zero() {
                tokio::time::sleep(self.spacing).await;
            }

            let outcome = self.deliverer.deliver(reservation.address(), unit).await;
            reservation.settle(&outcome);

            match outcome {
                DeliveryOutcome::Delivered => {
                    self.total_sent.fetch_add(1, Ordering::Relaxed);
                    tracing::info!("已发送: {} （WebApp #{webapp}）", unit.to);
                    results.push(UnitResult::sent(unit, webapp));
                }
                DeliveryOutcome::QuotaExceeded(detail) => {
                    self.total_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(detail = %detail, "WebApp #{webapp} 在批量发送中触发额度上限");
                    reservation.release_remaining();
                    results.push(UnitResult::failed(unit, webapp, detail.clone()));
                    halted = Some(detail);
                }
                DeliveryOutcome::OtherFailure(detail) => {
                    self.total_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(detail = %detail, "发送失败: {} （WebApp #{webapp}）", unit.to);
                    results.push(UnitResult::failed(unit, webapp, detail));
                }
            }
        }

        results
    }

    /// 只读统计；端点列表拉取失败时按 0 个端点呈现，不影响账本数据。
    pub async fn stats(&self) -> StatsReport {
        let now = Local::now();
        let endpoints = match self.current_endpoints().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "统计时无法获取端点列表");
                Vec::new()
            }
        };
        let snapshot = self.ledger.snapshot(now);

        StatsReport {
            counters: self.counters_from(&snapshot, &endpoints),
            total_endpoints: endpoints.len(),
            daily_limit: snapshot.limits.daily_limit,
            uptime_secs: self.started.elapsed().as_secs(),
            last_reset: snapshot.last_reset,
            cache: self.source.cache_status().await,
            endpoints: endpoint_stats(&snapshot, &endpoints),
        }
    }

    /// 管理员手动重置，返回重置时间。
    pub fn reset(&self) -> DateTime<Local> {
        let now = Local::now();
        self.ledger.reset(now);
        now
    }

    /// 丢弃端点列表缓存并重新加载，返回加载到的地址数。
    pub async fn refresh(&self) -> Result<usize, RelayError> {
        let urls = self.source.refresh().await?;
        tracing::info!("WebApp 地址缓存已刷新（{} 个）", urls.len());
        Ok(urls.len())
    }

    fn no_capacity(&self, endpoints: &[Endpoint]) -> RelayError {
        let now = Local::now();
        let snapshot = self.ledger.snapshot(now);
        tracing::warn!("没有可用的 WebApp（共 {} 个）", endpoints.len());
        RelayError::NoCapacity {
            endpoints: endpoint_stats(&snapshot, endpoints),
            next_reset: next_reset_after(now),
        }
    }

    fn counters(&self, endpoints: &[Endpoint], now: DateTime<Local>) -> Counters {
        self.counters_from(&self.ledger.snapshot(now), endpoints)
    }

    fn counters_from(&self, snapshot: &LedgerSnapshot, endpoints: &[Endpoint]) -> Counters {
        let rate_limited_apps = endpoints
            .iter()
            .filter(|e| snapshot.is_exhausted(&e.address))
            .count();
        Counters {
            total_sent: self.total_sent.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            available_apps: endpoints.len() - rate_limited_apps,
            rate_limited_apps,
        }
    }
}

/// 当前列表中的端点按顺序列出（含用量为 0 的），随后是已不在列表中但仍有记录的地址。
fn endpoint_stats(snapshot: &LedgerSnapshot, endpoints: &[Endpoint]) -> Vec<EndpointStat> {
    let limits = snapshot.limits;
    let mut out: Vec<EndpointStat> = endpoints
        .iter()
        .map(|e| {
            let (usage, in_flight, exhausted) = snapshot
                .usage_of(&e.address)
                .map(|u| (u.usage, u.in_flight, u.exhausted))
                .unwrap_or((0, 0, false));
            EndpointStat {
                webapp: Some(e.display_index()),
                address: e.address.clone(),
                usage,
                in_flight,
                limit: limits.daily_limit,
                remaining: limits.remaining(usage),
                exhausted,
            }
        })
        .collect();

    for u in &snapshot.endpoints {
        if endpoints.iter().any(|e| e.address == u.address) {
            continue;
        }
        out.push(EndpointStat {
            webapp: None,
            address: u.address.clone(),
            usage: u.usage,
            in_flight: u.in_flight,
            limit: limits.daily_limit,
            remaining: limits.remaining(u.usage),
            exhausted: u.exhausted,
        });
    }
    out
}

pub fn percentage(usage: u32, limit: u32) -> String {
    if limit == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", f64::from(usage) * 100.0 / f64::from(limit))
}
