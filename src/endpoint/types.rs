use std::collections::HashSet;
use std::sync::Arc;

/// 当前加载列表中的一个投递端点（WebApp）。
///
/// `ordinal` 仅代表本次列表中的位置，展示时 +1；用量记账按 `address` 归档。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub ordinal: usize,
    pub address: Arc<str>,
}

impl Endpoint {
    /// 按列表顺序为地址分配序号。
    ///
    /// 同一地址重复出现时只保留第一次（及其序号），一个地址只对应一个候选端点。
    pub fn from_addresses(addresses: &[String]) -> Vec<Endpoint> {
        let mut seen = HashSet::new();
        addresses
            .iter()
            .enumerate()
            .filter(|(_, addr)| seen.insert(addr.as_str()))
            .map(|(ordinal, addr)| Endpoint {
                ordinal,
                address: Arc::from(addr.as_str()),
            })
            .collect()
    }

    /// 面向调用方展示的 1 起始编号。
    pub fn display_index(&self) -> usize {
        self.ordinal + 1
    }
}

/// 端点列表缓存状态（用于 /stats）。
#[derive(Debug, Clone, Default)]
pub struct CacheStatus {
    pub urls_cached: usize,
    pub last_fetch: Option<chrono::DateTime<chrono::Utc>>,
}
