//! 投递端点列表（WebApp 地址）。

mod source;
mod types;

pub use source::{DriveSource, EndpointSource, FetchError};
pub use types::{CacheStatus, Endpoint};
