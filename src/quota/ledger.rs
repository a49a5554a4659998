use crate::delivery::DeliveryOutcome;
use crate::endpoint::Endpoint;
use crate::quota::types::{DistributionPlan, EndpointUsage, LedgerSnapshot, Limits, SelectionPlan};
use crate::quota::{distributor, reset, selector};
use chrono::{DateTime, Local};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 账本内部状态。所有字段只在 `UsageLedger` 的锁内读写。
#[derive(Debug)]
pub(crate) struct LedgerState {
    pub(super) usage: HashMap<Arc<str>, u32>,
    /// 已被选中/分配、但结果尚未归类的投递数。
    pub(super) in_flight: HashMap<Arc<str>, u32>,
    pub(super) exhausted: HashSet<Arc<str>>,
    pub(super) last_reset: DateTime<Local>,
}

impl LedgerState {
    pub(crate) fn new(now: DateTime<Local>) -> Self {
        Self {
            usage: HashMap::new(),
            in_flight: HashMap::new(),
            exhausted: HashSet::new(),
            last_reset: now,
        }
    }

    pub(crate) fn usage(&self, address: &str) -> u32 {
        self.usage.get(address).copied().unwrap_or(0)
    }

    pub(crate) fn in_flight(&self, address: &str) -> u32 {
        self.in_flight.get(address).copied().unwrap_or(0)
    }

    /// 选择/分配时使用的有效负载：已确认用量 + 在途预留。
    pub(crate) fn load(&self, address: &str) -> u32 {
        self.usage(address).saturating_add(self.in_flight(address))
    }

    pub(crate) fn is_exhausted(&self, address: &str) -> bool {
        self.exhausted.contains(address)
    }

    /// 清空用量与耗尽标记；在途预留属于仍在进行的请求，保留。
    pub(super) fn clear(&mut self, now: DateTime<Local>) {
        self.usage.clear();
        self.exhausted.clear();
        self.last_reset = now;
    }

    fn reserve(&mut self, address: &Arc<str>, count: u32) {
        if count == 0 {
            return;
        }
        *self.in_flight.entry(address.clone()).or_insert(0) += count;
    }

    fn release(&mut self, address: &str, count: u32) {
        let Some(n) = self.in_flight.get_mut(address) else {
            return;
        };
        *n = n.saturating_sub(count);
        if *n == 0 {
            self.in_flight.remove(address);
        }
    }

    /// 按投递结果修改账本，返回该端点当前用量。
    fn apply(&mut self, address: &Arc<str>, outcome: &DeliveryOutcome, limits: Limits) -> u32 {
        match outcome {
            DeliveryOutcome::Delivered => {
                let n = self.usage.entry(address.clone()).or_insert(0);
                *n = n.saturating_add(1);
                let usage = *n;
                if usage >= limits.daily_limit && self.exhausted.insert(address.clone()) {
                    tracing::warn!(
                        endpoint = %address,
                        usage,
                        limit = limits.daily_limit,
                        "端点已达到每日上限"
                    );
                }
                usage
            }
            DeliveryOutcome::QuotaExceeded(detail) => {
                if self.exhausted.insert(address.clone()) {
                    tracing::warn!(endpoint = %address, detail = %detail, "端点报告额度耗尽，提前标记");
                }
                self.usage(address)
            }
            DeliveryOutcome::OtherFailure(_) => self.usage(address),
        }
    }
}

/// 进程内唯一的用量账本。
///
/// 由 main 构造一次后注入 Relay；用量修改都经过 `Reservation::settle`，
/// 锁策略集中在这里。
#[derive(Debug)]
pub struct UsageLedger {
    limits: Limits,
    state: Mutex<LedgerState>,
}

impl UsageLedger {
    pub fn new(limits: Limits, now: DateTime<Local>) -> Self {
        Self {
            limits,
            state: Mutex::new(LedgerState::new(now)),
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // 临界区内没有会 panic 的路径；即便中毒，状态本身仍然自洽。
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 跨日检查：日期前进时清零，返回是否发生了重置。
    pub fn maybe_reset(&self, now: DateTime<Local>) -> bool {
        let reset = reset::maybe_reset(&mut self.lock(), now);
        if reset {
            tracing::info!("每日用量计数与耗尽标记已重置");
        }
        reset
    }

    /// 管理员手动重置，不做日期判断。
    pub fn reset(&self, now: DateTime<Local>) {
        self.lock().clear(now);
        tracing::info!("用量计数与耗尽标记已手动重置");
    }

    /// 为单发选择一个端点，并在同一临界区内预留一个名额。
    pub fn reserve_one(&self, endpoints: &[Endpoint]) -> Option<(SelectionPlan, Reservation<'_>)> {
        let mut state = self.lock();
        let plan = selector::select_one(&state, endpoints, self.limits)?;
        state.reserve(&plan.address, 1);
        let reservation = Reservation {
            ledger: self,
            ordinal: plan.ordinal,
            address: plan.address.clone(),
            held: 1,
        };
        Some((plan, reservation))
    }

    /// 为一批单元生成分配计划，并按计划为每段预留名额（与 plan.assignments 一一对应）。
    pub fn reserve_batch(
        &self,
        endpoints: &[Endpoint],
        unit_count: usize,
    ) -> (DistributionPlan, Vec<Reservation<'_>>) {
        let mut state = self.lock();
        let plan = distributor::distribute(&state, endpoints, unit_count, self.limits);
        let mut reservations = Vec::with_capacity(plan.assignments.len());
        for a in &plan.assignments {
            let held = u32::try_from(a.len).unwrap_or(u32::MAX);
            state.reserve(&a.address, held);
            reservations.push(Reservation {
                ledger: self,
                ordinal: a.ordinal,
                address: a.address.clone(),
                held,
            });
        }
        (plan, reservations)
    }

    /// 只读快照。若 `now` 已跨日，按“已重置”呈现但不修改账本。
    pub fn snapshot(&self, now: DateTime<Local>) -> LedgerSnapshot {
        let state = self.lock();
        let stale = reset::is_stale(&state, now);

        let mut keys: BTreeSet<&Arc<str>> = state.in_flight.keys().collect();
        if !stale {
            keys.extend(state.usage.keys());
            keys.extend(state.exhausted.iter());
        }

        let endpoints = keys
            .into_iter()
            .map(|addr| EndpointUsage {
                address: addr.clone(),
                usage: if stale { 0 } else { state.usage(addr) },
                in_flight: state.in_flight(addr),
                exhausted: !stale && state.is_exhausted(addr),
            })
            .collect();

        LedgerSnapshot {
            limits: self.limits,
            endpoints,
            last_reset: state.last_reset,
        }
    }
}

/// 某个端点上的在途预留。
///
/// 每次 `settle` 消耗一个名额并按结果修改账本；未消耗的名额在 drop 时归还，
/// 这样请求中途被取消也不会永久占住额度。
#[derive(Debug)]
pub struct Reservation<'a> {
    ledger: &'a UsageLedger,
    ordinal: usize,
    address: Arc<str>,
    held: u32,
}

impl Reservation<'_> {
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn held(&self) -> u32 {
        self.held
    }

    /// 归类一次投递结果，返回该端点当前用量。
    pub fn settle(&mut self, outcome: &DeliveryOutcome) -> u32 {
        let mut state = self.ledger.lock();
        if self.held > 0 {
            state.release(&self.address, 1);
            self.held -= 1;
        }
        state.apply(&self.address, outcome, self.ledger.limits)
    }

    /// 提前归还剩余名额（例如端点中途报告耗尽，剩余单元不再发送）。
    pub fn release_remaining(&mut self) {
        if self.held == 0 {
            return;
        }
        self.ledger.lock().release(&self.address, self.held);
        self.held = 0;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.release_remaining();
    }
}
