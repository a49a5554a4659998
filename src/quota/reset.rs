//! 每日重置策略：按本地日历日期判断是否需要清零。

use crate::quota::ledger::LedgerState;
use chrono::{DateTime, Duration, Local, TimeZone};

/// `now` 的日期是否晚于上次重置的日期。
///
/// 时钟回拨（日期变小）不触发重置，上次重置日期只会前进。
pub(crate) fn is_stale(state: &LedgerState, now: DateTime<Local>) -> bool {
    now.date_naive() > state.last_reset.date_naive()
}

/// 跨日则清空用量与耗尽标记并返回 true；同一天内重复调用不做任何修改。
pub(crate) fn maybe_reset(state: &mut LedgerState, now: DateTime<Local>) -> bool {
    if !is_stale(state, now) {
        return false;
    }
    state.clear(now);
    true
}

/// 下一个本地零点（无容量时提示调用方的重试时间）。
pub fn next_reset_after(now: DateTime<Local>) -> DateTime<Local> {
    now.date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .unwrap_or_else(|| now + Duration::hours(24))
}
