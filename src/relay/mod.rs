mod service;
mod types;

pub use service::{Relay, percentage};
pub use types::{
    BatchReport, Counters, EndpointStat, RelayError, SingleReceipt, SliceSummary, StatsReport,
    UnitResult, UnitStatus,
};
